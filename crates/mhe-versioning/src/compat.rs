//! ---
//! mhe_section: "14-versioning"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Version skew classification between gateway and entity."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use tracing::trace;

use crate::build_version::BuildVersion;

/// Relationship between the gateway build and the build recorded on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "detail", rename_all = "snake_case")]
pub enum CompatibilityVerdict {
    /// Entity was produced by the same release.
    UpToDate,
    /// Entity is older and can be moved forward to the contained version.
    Upgradeable(BuildVersion),
    /// Entity was produced by a newer gateway than this one.
    EntityNewer,
    /// Versions could not be compared.
    Unknown(String),
}

impl CompatibilityVerdict {
    /// Whether an in-place upgrade may proceed under this verdict.
    pub fn permits_upgrade(&self) -> bool {
        matches!(self, Self::UpToDate | Self::Upgradeable(_))
    }

    /// Whether the two sides disagree on the release, including unknown cases.
    pub fn is_skewed(&self) -> bool {
        !matches!(self, Self::UpToDate)
    }
}

impl fmt::Display for CompatibilityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => f.write_str("up to date"),
            Self::Upgradeable(target) => write!(f, "upgradeable to {target}"),
            Self::EntityNewer => f.write_str("entity has newer version"),
            Self::Unknown(reason) => write!(f, "unknown: {reason}"),
        }
    }
}

/// Classify the entity's recorded build version against the local build.
///
/// `entity` is the raw string persisted on the entity; `None` means the entity
/// predates version stamping or the field was lost.
pub fn check(local: &BuildVersion, entity: Option<&str>) -> CompatibilityVerdict {
    let Some(raw) = entity.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return CompatibilityVerdict::Unknown("entity version is not recorded".to_owned());
    };
    let entity = match raw.parse::<BuildVersion>() {
        Ok(version) => version,
        Err(err) => return CompatibilityVerdict::Unknown(err.to_string()),
    };

    let verdict = match local.cmp_release(&entity) {
        Ordering::Equal => CompatibilityVerdict::UpToDate,
        Ordering::Greater => CompatibilityVerdict::Upgradeable(local.clone()),
        Ordering::Less => CompatibilityVerdict::EntityNewer,
    };
    trace!(
        local = %local,
        entity = %entity,
        verdict = %verdict,
        "version compatibility classified"
    );
    verdict
}
