//! ---
//! mhe_section: "05-networking-external-interfaces"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Translation of wire requests into lifecycle configuration."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::sync::Arc;

use mhe_lifecycle::{
    ComputeConfig, ConfigDelta, ContainerNetwork, DeleteScope, EntityConfig, NetworkConfig,
    RegistryConfig, SecurityConfig, StorageConfig, VolumeStore,
};
use mhe_security::{looks_like_pem, CertificateError, CertificateIssuer, CertificateRequest};
use mhe_versioning::BuildVersion;
use thiserror::Error;
use url::Url;

use crate::wire::{
    ChangeRequest, ComputeSpec, ContainerDeletion, CreateRequest, DeleteRequest, NetworkSpec,
    RegistrySpec, SecuritySpec, StorageSpec, VolumeStoreDeletion,
};

/// Longest display name the platform accepts for an entity.
pub const MAX_NAME_LEN: usize = 31;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("client version {client} does not match gateway version {gateway}")]
    VersionMismatch { client: String, gateway: String },
    #[error("compute resource is required")]
    MissingComputeResource,
    #[error("invalid volume store {0:?}: expected label:location")]
    InvalidVolumeStore(String),
    #[error("invalid proxy {url:?}: {reason}")]
    InvalidProxy { url: String, reason: String },
    #[error("invalid server certificate: {0}")]
    InvalidCertificate(String),
    #[error(transparent)]
    Issuer(#[from] CertificateError),
}

impl TranslateError {
    /// Whether the caller can fix the request.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            TranslateError::Issuer(CertificateError::Generation(_))
        )
    }
}

/// Maps wire requests into the lifecycle configuration types.
///
/// Checks are syntactic only. Whether a resource exists is decided later by
/// the target validator.
#[derive(Clone)]
pub struct Translator {
    local_version: BuildVersion,
    enforce_client_version: bool,
    organization: String,
    issuer: Arc<dyn CertificateIssuer>,
}

impl Translator {
    pub fn new(local_version: BuildVersion, issuer: Arc<dyn CertificateIssuer>) -> Self {
        Self {
            local_version,
            enforce_client_version: true,
            organization: "MHE Gateway".to_owned(),
            issuer,
        }
    }

    pub fn enforce_client_version(mut self, enforce: bool) -> Self {
        self.enforce_client_version = enforce;
        self
    }

    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = organization.into();
        self
    }

    /// Build the desired configuration for a create request.
    ///
    /// `default_resource` is the compute resource named on the target, used
    /// when the body does not name one.
    pub fn create(
        &self,
        request: CreateRequest,
        default_resource: Option<&str>,
    ) -> Result<EntityConfig, TranslateError> {
        if let Some(client) = request.version.as_deref().filter(|v| !v.trim().is_empty()) {
            self.check_client_version(client)?;
        }
        let name = validate_name(&request.name)?;

        let compute = request.compute.unwrap_or_default();
        let endpoint = request.endpoint.unwrap_or_default();
        let resource_path = compute
            .resource
            .clone()
            .or_else(|| default_resource.map(str::to_owned))
            .filter(|r| !r.trim().is_empty())
            .ok_or(TranslateError::MissingComputeResource)?;

        let registry = request
            .registry
            .map(|spec| registry(RegistryConfig::default(), spec))
            .transpose()?
            .unwrap_or_default();

        Ok(EntityConfig {
            security: self.security(&name, request.security)?,
            name,
            version: None,
            compute: ComputeConfig {
                resource_path,
                cpu_limit_mhz: compute.cpu.or(endpoint.cpu).map(|l| l.limit),
                memory_limit_mb: compute.memory.or(endpoint.memory).map(|l| l.limit),
            },
            network: request.network.map(network).unwrap_or_default(),
            storage: request
                .storage
                .map(storage)
                .transpose()?
                .unwrap_or_default(),
            registry,
        })
    }

    /// Build the delta for an upgrade or rollback.
    pub fn change(&self, request: ChangeRequest) -> Result<ConfigDelta, TranslateError> {
        let mut delta = ConfigDelta::default();
        if let Some(ComputeSpec { cpu, memory, .. }) = request.compute {
            delta.cpu_limit_mhz = cpu.map(|l| l.limit);
            delta.memory_limit_mb = memory.map(|l| l.limit);
        }
        if let Some(network) = request.network {
            delta.container_networks = network
                .container
                .into_iter()
                .map(|n| ContainerNetwork {
                    alias: n.alias,
                    port_group: n.port_group,
                })
                .collect();
        }
        if let Some(storage) = request.storage {
            delta.volume_stores = storage
                .volume_stores
                .iter()
                .map(|raw| volume_store(raw))
                .collect::<Result<_, _>>()?;
        }
        if let Some(spec) = request.registry {
            if let Some(proxy) = &spec.http_proxy {
                validate_proxy(proxy)?;
            }
            if let Some(proxy) = &spec.https_proxy {
                validate_proxy(proxy)?;
            }
            delta.insecure_registries = spec.insecure;
            delta.registry_whitelist = spec.whitelist;
            delta.http_proxy = spec.http_proxy;
            delta.https_proxy = spec.https_proxy;
        }
        Ok(delta)
    }

    fn check_client_version(&self, client: &str) -> Result<(), TranslateError> {
        if !self.enforce_client_version {
            return Ok(());
        }
        let matches = client
            .trim()
            .parse::<BuildVersion>()
            .map(|parsed| parsed == self.local_version)
            .unwrap_or(false);
        if matches {
            Ok(())
        } else {
            Err(TranslateError::VersionMismatch {
                client: client.to_owned(),
                gateway: self.local_version.to_string(),
            })
        }
    }

    fn security(
        &self,
        name: &str,
        spec: Option<SecuritySpec>,
    ) -> Result<SecurityConfig, TranslateError> {
        let spec = spec.unwrap_or_default();
        let server = spec.server.unwrap_or_default();
        let supplied = server.certificate.is_some() || server.private_key.is_some();

        let (certificate, key) = match (supplied, server.generate) {
            (true, Some(_)) => {
                return Err(TranslateError::InvalidCertificate(
                    "supply a certificate or ask for one to be generated, not both".to_owned(),
                ))
            }
            (true, None) => match (server.certificate, server.private_key) {
                (Some(certificate), Some(key)) => {
                    if !looks_like_pem(&certificate) {
                        return Err(TranslateError::InvalidCertificate(
                            "certificate is not PEM encoded".to_owned(),
                        ));
                    }
                    (certificate, key)
                }
                _ => {
                    return Err(TranslateError::InvalidCertificate(
                        "certificate and private key must be supplied together".to_owned(),
                    ))
                }
            },
            (false, generate) => {
                let generate = generate.unwrap_or_default();
                let cname = generate.cname.unwrap_or_else(|| name.to_owned());
                let mut request = CertificateRequest::new(cname);
                let organizations = if generate.organization.is_empty() {
                    vec![self.organization.clone()]
                } else {
                    generate.organization
                };
                for organization in organizations {
                    request = request.with_organization(organization);
                }
                let issued = self.issuer.issue(&request)?;
                (issued.certificate_pem, issued.private_key_pem)
            }
        };

        Ok(SecurityConfig {
            server_certificate_pem: Some(certificate),
            server_key_pem: Some(key),
            client_authorities: spec.client_authorities,
            tls_verify: spec.tls_verify,
        })
    }
}

impl std::fmt::Debug for Translator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("local_version", &self.local_version)
            .field("enforce_client_version", &self.enforce_client_version)
            .finish_non_exhaustive()
    }
}

/// Delete scope from the optional request body.
pub fn delete_scope(request: Option<DeleteRequest>) -> DeleteScope {
    let request = request.unwrap_or_default();
    DeleteScope {
        remove_containers: request.containers == ContainerDeletion::All,
        remove_volume_stores: request.volume_stores == VolumeStoreDeletion::All,
    }
}

pub fn validate_name(name: &str) -> Result<String, TranslateError> {
    let invalid = |reason| TranslateError::InvalidName {
        name: name.to_owned(),
        reason,
    };
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(invalid("name exceeds 31 characters"));
    }
    if trimmed.contains('%') {
        return Err(invalid("name cannot contain '%'"));
    }
    Ok(trimmed.to_owned())
}

fn network(spec: NetworkSpec) -> NetworkConfig {
    NetworkConfig {
        bridge: spec.bridge,
        client: spec.client.or_else(|| spec.public.clone()),
        management: spec.management.or_else(|| spec.public.clone()),
        public: spec.public,
        container_networks: spec
            .container
            .into_iter()
            .map(|n| ContainerNetwork {
                alias: n.alias,
                port_group: n.port_group,
            })
            .collect(),
    }
}

fn storage(spec: StorageSpec) -> Result<StorageConfig, TranslateError> {
    Ok(StorageConfig {
        image_stores: spec.image_stores,
        volume_stores: spec
            .volume_stores
            .iter()
            .map(|raw| volume_store(raw))
            .collect::<Result<_, _>>()?,
        base_image_size_mb: spec.base_image_size_mb,
    })
}

fn volume_store(raw: &str) -> Result<VolumeStore, TranslateError> {
    let invalid = || TranslateError::InvalidVolumeStore(raw.to_owned());
    let (label, location) = raw.split_once(':').ok_or_else(invalid)?;
    let label_ok = !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !label_ok || location.trim().is_empty() {
        return Err(invalid());
    }
    Ok(VolumeStore {
        label: label.to_owned(),
        location: location.to_owned(),
    })
}

fn registry(
    mut config: RegistryConfig,
    spec: RegistrySpec,
) -> Result<RegistryConfig, TranslateError> {
    if let Some(insecure) = spec.insecure {
        config.insecure = insecure;
    }
    if let Some(whitelist) = spec.whitelist {
        config.whitelist = whitelist;
    }
    if let Some(proxy) = spec.http_proxy {
        validate_proxy(&proxy)?;
        config.http_proxy = Some(proxy);
    }
    if let Some(proxy) = spec.https_proxy {
        validate_proxy(&proxy)?;
        config.https_proxy = Some(proxy);
    }
    Ok(config)
}

fn validate_proxy(raw: &str) -> Result<(), TranslateError> {
    let invalid = |reason: String| TranslateError::InvalidProxy {
        url: raw.to_owned(),
        reason,
    };
    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}
