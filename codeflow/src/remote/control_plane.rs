//! The transport seam between the deployment client and the platform.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::archive::ModuleRole;
use crate::errors::RemoteError;

/// Status string the platform reports for a running pipeline.
pub const DEPLOYED_STATUS: &str = "deployed";

/// A pipeline definition as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInfo {
    /// Pipeline name.
    pub name: String,
    /// Definition text.
    #[serde(default)]
    pub definition: String,
    /// Deployment status (`deployed`, `deploying`, `undeployed`, ...).
    #[serde(default)]
    pub status: Option<String>,
}

impl PipelineInfo {
    /// Whether the platform reports the pipeline as deployed.
    #[must_use]
    pub fn is_deployed(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(DEPLOYED_STATUS))
    }
}

/// A module as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Module name.
    pub name: String,
    /// Module role.
    #[serde(rename = "type")]
    pub role: ModuleRole,
}

/// Raw control-plane operations.
///
/// Implementations report platform conditions as [`RemoteError`] variants;
/// interpreting "already exists" and "not found" is left to
/// [`DeploymentClient`](super::DeploymentClient).
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Lists every pipeline definition.
    async fn list_pipelines(&self) -> Result<Vec<PipelineInfo>, RemoteError>;

    /// Lists modules, optionally only those whose name starts with `name_prefix`.
    async fn list_modules(&self, name_prefix: Option<&str>) -> Result<Vec<ModuleInfo>, RemoteError>;

    /// Creates a pipeline definition, optionally deploying it.
    async fn create_pipeline(&self, name: &str, definition: &str, deploy: bool) -> Result<(), RemoteError>;

    /// Destroys a pipeline definition.
    async fn destroy_pipeline(&self, name: &str) -> Result<(), RemoteError>;

    /// Uploads a module archive.
    async fn upload_module(&self, role: ModuleRole, name: &str, archive: Vec<u8>) -> Result<(), RemoteError>;

    /// Fetches a module's description.
    async fn module_info(&self, role: ModuleRole, name: &str) -> Result<ModuleInfo, RemoteError>;

    /// Deletes a module.
    async fn delete_module(&self, role: ModuleRole, name: &str) -> Result<(), RemoteError>;
}
