//! ---
//! mhe_section: "06-security-access-control"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Server certificate generation for entity endpoints."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// Failures raised while producing key material.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// The request itself was unusable.
    #[error("invalid certificate request: {0}")]
    InvalidRequest(String),
    /// The underlying generator failed.
    #[error("certificate generation failed: {0}")]
    Generation(String),
}

/// Parameters for a server certificate the gateway generates on the caller's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Common name, also added as the DNS subject alternative name.
    pub common_name: String,
    /// Organization attributes written into the subject.
    #[serde(default)]
    pub organization: Vec<String>,
}

impl CertificateRequest {
    /// Request for `common_name` with no organization attributes.
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organization: Vec::new(),
        }
    }

    /// Append an organization attribute.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization.push(organization.into());
        self
    }
}

/// PEM encoded key material returned by an issuer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    /// Leaf certificate.
    pub certificate_pem: String,
    /// Private key matching the leaf certificate.
    pub private_key_pem: String,
    /// Certificate of the issuing authority, for client trust stores.
    pub authority_pem: String,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("fingerprint", &fingerprint_pem(&self.certificate_pem))
            .finish_non_exhaustive()
    }
}

/// Collaborator producing server key pairs when the caller does not supply one.
pub trait CertificateIssuer: Send + Sync {
    /// Issue a certificate and private key for the request.
    fn issue(&self, request: &CertificateRequest) -> Result<IssuedCertificate, CertificateError>;
}

/// Self-signed authority generating ECDSA P-256 leaf certificates.
pub struct CertificateAuthority {
    ca: Certificate,
    ca_pem: String,
}

impl CertificateAuthority {
    /// Create a fresh authority with the given common name.
    pub fn generate(common_name: &str) -> Result<Self, CertificateError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca = Certificate::from_params(params)
            .map_err(|err| CertificateError::Generation(err.to_string()))?;
        let ca_pem = ca
            .serialize_pem()
            .map_err(|err| CertificateError::Generation(err.to_string()))?;
        Ok(Self { ca, ca_pem })
    }

    /// PEM encoding of the authority certificate.
    pub fn authority_pem(&self) -> &str {
        &self.ca_pem
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("fingerprint", &fingerprint_pem(&self.ca_pem))
            .finish_non_exhaustive()
    }
}

impl CertificateIssuer for CertificateAuthority {
    fn issue(&self, request: &CertificateRequest) -> Result<IssuedCertificate, CertificateError> {
        let common_name = request.common_name.trim();
        if common_name.is_empty() {
            return Err(CertificateError::InvalidRequest(
                "common name cannot be empty".to_owned(),
            ));
        }

        let mut params = CertificateParams::new(vec![common_name.to_owned()]);
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        for organization in &request.organization {
            params
                .distinguished_name
                .push(DnType::OrganizationName, organization.as_str());
        }
        params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;

        let cert = Certificate::from_params(params)
            .map_err(|err| CertificateError::Generation(err.to_string()))?;
        let certificate_pem = cert
            .serialize_pem_with_signer(&self.ca)
            .map_err(|err| CertificateError::Generation(err.to_string()))?;
        let private_key_pem = cert.serialize_private_key_pem();
        debug!(common_name, "issued server certificate");

        Ok(IssuedCertificate {
            certificate_pem,
            private_key_pem,
            authority_pem: self.ca_pem.clone(),
        })
    }
}

/// Whether `pem` contains at least one PEM certificate block.
pub fn looks_like_pem(pem: &str) -> bool {
    pem_body(pem).is_some()
}

/// SHA-256 fingerprint over the DER bytes of the first certificate in `pem`.
pub fn fingerprint_pem(pem: &str) -> Option<String> {
    let der = pem_body(pem)?;
    let mut hasher = Sha256::new();
    hasher.update(&der);
    Some(hex::encode(hasher.finalize()))
}

fn pem_body(pem: &str) -> Option<Vec<u8>> {
    let start = pem.find(PEM_CERT_BEGIN)? + PEM_CERT_BEGIN.len();
    let end = start + pem[start..].find(PEM_CERT_END)?;
    let encoded: String = pem[start..end]
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if encoded.is_empty() {
        return None;
    }
    STANDARD.decode(encoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_leaf_signed_by_authority() {
        let ca = CertificateAuthority::generate("MHE Test CA").unwrap();
        let request = CertificateRequest::new("mhe-one.example.test").with_organization("MHE");
        let issued = ca.issue(&request).unwrap();
        assert!(looks_like_pem(&issued.certificate_pem));
        assert!(issued.private_key_pem.contains("PRIVATE KEY"));
        assert_eq!(issued.authority_pem, ca.authority_pem());
        assert_ne!(
            fingerprint_pem(&issued.certificate_pem),
            fingerprint_pem(ca.authority_pem())
        );
    }

    #[test]
    fn rejects_blank_common_name() {
        let ca = CertificateAuthority::generate("MHE Test CA").unwrap();
        let err = ca.issue(&CertificateRequest::new("  ")).unwrap_err();
        assert!(matches!(err, CertificateError::InvalidRequest(_)));
    }

    #[test]
    fn fingerprint_requires_certificate_block() {
        assert!(fingerprint_pem("not a certificate").is_none());
        let empty = "-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----";
        assert!(fingerprint_pem(empty).is_none());
        let ca = CertificateAuthority::generate("MHE Test CA").unwrap();
        let fingerprint = fingerprint_pem(ca.authority_pem()).unwrap();
        assert_eq!(fingerprint.len(), 64);
    }

    #[test]
    fn debug_output_omits_private_key() {
        let ca = CertificateAuthority::generate("MHE Test CA").unwrap();
        let issued = ca.issue(&CertificateRequest::new("host")).unwrap();
        assert!(!format!("{issued:?}").contains("PRIVATE KEY"));
    }
}
