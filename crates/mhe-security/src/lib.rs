//! ---
//! mhe_section: "06-security-access-control"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Certificate issuance and inspection utilities."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Key material handling for entity endpoints.

pub mod certificates;

pub use certificates::{
    fingerprint_pem, looks_like_pem, CertificateAuthority, CertificateError, CertificateIssuer,
    CertificateRequest, IssuedCertificate,
};
