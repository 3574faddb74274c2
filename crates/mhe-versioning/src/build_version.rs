//! ---
//! mhe_section: "14-versioning"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Build versions stamped into persisted entity configuration."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing a short version string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    /// The string did not follow `v<semver>-<build>-<commit>`.
    #[error("malformed version {raw:?}: expected v<semver>-<build>-<commit>")]
    Malformed { raw: String },
    /// The build number segment was not an unsigned integer.
    #[error("invalid build number {segment:?} in version {raw:?}")]
    BuildNumber { raw: String, segment: String },
    /// The semantic version segment failed to parse.
    #[error("invalid semantic version in {raw:?}: {reason}")]
    Semver { raw: String, reason: String },
}

/// Version of the gateway build that created or last reconfigured an entity.
///
/// Rendered and parsed in the short form `v1.2.0-4211-deadbee`. Release ordering
/// compares the semantic version first and the build number second; the commit
/// hash is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildVersion {
    semver: Version,
    build: u64,
    commit: String,
}

impl BuildVersion {
    /// Construct a build version from its parts.
    pub fn new(semver: Version, build: u64, commit: impl Into<String>) -> Self {
        Self {
            semver,
            build,
            commit: commit.into(),
        }
    }

    /// Semantic version component.
    pub fn semver(&self) -> &Version {
        &self.semver
    }

    /// CI build number component.
    pub fn build(&self) -> u64 {
        self.build
    }

    /// Commit hash component.
    pub fn commit(&self) -> &str {
        &self.commit
    }

    /// Order two builds as releases, ignoring the commit hash.
    pub fn cmp_release(&self, other: &Self) -> Ordering {
        self.semver
            .cmp(&other.semver)
            .then_with(|| self.build.cmp(&other.build))
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}-{}-{}", self.semver, self.build, self.commit)
    }
}

impl FromStr for BuildVersion {
    type Err = VersionParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || VersionParseError::Malformed {
            raw: raw.to_owned(),
        };
        let trimmed = raw.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);

        // Pre-release tags may contain '-', so split from the right.
        let mut parts = body.rsplitn(3, '-');
        let commit = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let build = parts.next().ok_or_else(malformed)?;
        let semver = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;

        if !commit.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed());
        }
        let build = build
            .parse::<u64>()
            .map_err(|_| VersionParseError::BuildNumber {
                raw: raw.to_owned(),
                segment: build.to_owned(),
            })?;
        let semver = Version::parse(semver).map_err(|err| VersionParseError::Semver {
            raw: raw.to_owned(),
            reason: err.to_string(),
        })?;

        Ok(Self::new(semver, build, commit))
    }
}

impl TryFrom<String> for BuildVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BuildVersion> for String {
    fn from(value: BuildVersion) -> Self {
        value.to_string()
    }
}
