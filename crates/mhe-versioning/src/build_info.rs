//! ---
//! mhe_section: "14-versioning"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Compile-time build metadata for the gateway."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use serde::Serialize;

use crate::build_version::BuildVersion;

/// Compile-time version metadata captured via `vergen`.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    /// Workspace semantic version.
    pub semver: String,
    /// Monotonic build number supplied by CI through `MHE_BUILD_NUMBER`.
    pub build_number: u64,
    /// Git commit hash captured at build time.
    pub git_sha: String,
    /// Build timestamp from the compilation environment.
    pub build_timestamp: String,
    /// Target triple used for the build.
    pub target: String,
}

impl VersionInfo {
    /// Construct a new [`VersionInfo`] instance using environment metadata.
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            build_number: option_env!("MHE_BUILD_NUMBER")
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(0),
            git_sha: option_env!("VERGEN_GIT_SHA")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            target: option_env!("VERGEN_CARGO_TARGET_TRIPLE")
                .unwrap_or("UNKNOWN")
                .to_owned(),
        }
    }

    /// Short git hash used inside version strings.
    #[must_use]
    pub fn short_sha(&self) -> &str {
        let end = self
            .git_sha
            .char_indices()
            .nth(7)
            .map(|(idx, _)| idx)
            .unwrap_or(self.git_sha.len());
        &self.git_sha[..end]
    }

    /// The build version entities created by this gateway are stamped with.
    ///
    /// Falls back to `0.0.0` only if the crate version itself is not valid semver,
    /// which cargo rejects at manifest parse time.
    #[must_use]
    pub fn build_version(&self) -> BuildVersion {
        let semver = semver::Version::parse(&self.semver)
            .unwrap_or_else(|_| semver::Version::new(0, 0, 0));
        BuildVersion::new(semver, self.build_number, self.short_sha())
    }

    /// Returns a concise CLI string combining semantic version and git hash.
    #[must_use]
    pub fn cli_string(&self) -> String {
        format!("{} ({})", self.semver, self.git_sha)
    }

    /// Human readable banner used in logging surfaces.
    #[must_use]
    pub fn banner(&self) -> String {
        format!("MHE gateway {}", self.build_version())
    }

    /// Extended string containing build metadata suitable for `--version` flags.
    #[must_use]
    pub fn extended(&self) -> String {
        format!(
            "{banner}\nCommit: {sha}\nBuilt: {built}\nTarget: {target}",
            banner = self.banner(),
            sha = self.git_sha,
            built = self.build_timestamp,
            target = self.target,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_contains_semver() {
        let info = VersionInfo::current();
        let extended = info.extended();
        assert!(extended.contains(&info.semver));
    }

    #[test]
    fn short_sha_truncates_long_hashes() {
        let mut info = VersionInfo::current();
        info.git_sha = "0123456789abcdef".into();
        assert_eq!(info.short_sha(), "0123456");
        info.git_sha = "abc".into();
        assert_eq!(info.short_sha(), "abc");
    }

    #[test]
    fn build_version_round_trips_through_short_form() {
        let mut info = VersionInfo::current();
        info.build_number = 4211;
        info.git_sha = "deadbeefcafe".into();
        let version = info.build_version();
        let parsed: BuildVersion = version.to_string().parse().expect("parsable");
        assert_eq!(parsed, version);
        assert_eq!(parsed.build(), 4211);
    }
}
