//! ---
//! mhe_section: "14-versioning"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Version metadata and compatibility helpers."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Build metadata for the running gateway, the build version stamped into each
//! entity's persisted configuration, and the classifier comparing the two.

pub mod build_info;
pub mod build_version;
pub mod compat;

pub use build_info::VersionInfo;
pub use build_version::{BuildVersion, VersionParseError};
pub use compat::{check, CompatibilityVerdict};
