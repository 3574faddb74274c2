//! ---
//! mhe_section: "05-networking-external-interfaces"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "JSON request and response bodies of the REST API."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use mhe_lifecycle::{EntitySummary, TaskRef, TaskStatus};
use serde::{Deserialize, Serialize};

/// Body of `POST .../vch`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CreateRequest {
    /// Gateway version the client was built against.
    #[serde(default)]
    pub version: Option<String>,
    pub name: String,
    #[serde(default)]
    pub compute: Option<ComputeSpec>,
    #[serde(default)]
    pub network: Option<NetworkSpec>,
    #[serde(default)]
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub security: Option<SecuritySpec>,
    #[serde(default)]
    pub endpoint: Option<EndpointSpec>,
    #[serde(default)]
    pub registry: Option<RegistrySpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ComputeSpec {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub cpu: Option<Limit>,
    #[serde(default)]
    pub memory: Option<Limit>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Limit {
    pub limit: u64,
}

/// Sizing of the appliance itself. Used when `compute` sets no limits.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EndpointSpec {
    #[serde(default)]
    pub cpu: Option<Limit>,
    #[serde(default)]
    pub memory: Option<Limit>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NetworkSpec {
    #[serde(default)]
    pub bridge: Option<String>,
    #[serde(default)]
    pub public: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub management: Option<String>,
    #[serde(default)]
    pub container: Vec<ContainerNetworkSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerNetworkSpec {
    pub alias: String,
    pub port_group: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageSpec {
    #[serde(default)]
    pub image_stores: Vec<String>,
    /// `label:location` pairs.
    #[serde(default)]
    pub volume_stores: Vec<String>,
    #[serde(default)]
    pub base_image_size_mb: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecuritySpec {
    #[serde(default)]
    pub server: Option<ServerCertificateSpec>,
    #[serde(default)]
    pub client_authorities: Vec<String>,
    #[serde(default)]
    pub tls_verify: bool,
}

/// Either a supplied key pair or a request to generate one.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct ServerCertificateSpec {
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub generate: Option<GenerateSpec>,
}

impl std::fmt::Debug for ServerCertificateSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCertificateSpec")
            .field("certificate", &self.certificate.is_some())
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("generate", &self.generate)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GenerateSpec {
    #[serde(default)]
    pub cname: Option<String>,
    #[serde(default)]
    pub organization: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistrySpec {
    #[serde(default)]
    pub insecure: Option<Vec<String>>,
    #[serde(default)]
    pub whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
}

/// Body of `POST .../vch/{id}?action=upgrade|rollback`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChangeRequest {
    #[serde(default)]
    pub compute: Option<ComputeSpec>,
    #[serde(default)]
    pub network: Option<NetworkSpec>,
    #[serde(default)]
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub registry: Option<RegistrySpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerDeletion {
    All,
    #[default]
    Off,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStoreDeletion {
    All,
    #[default]
    None,
}

/// Body of `DELETE .../vch/{id}`.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub containers: ContainerDeletion,
    #[serde(default)]
    pub volume_stores: VolumeStoreDeletion,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub vchs: Vec<EntitySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task: TaskRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task: TaskRef,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
