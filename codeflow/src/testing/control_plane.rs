//! An in-memory control plane.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

use crate::archive::ModuleRole;
use crate::errors::RemoteError;
use crate::remote::{ControlPlane, ModuleInfo, PipelineInfo, DEPLOYED_STATUS};

/// One recorded control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCall {
    /// `list_pipelines`.
    ListPipelines,
    /// `list_modules`.
    ListModules {
        /// Requested name prefix.
        prefix: Option<String>,
    },
    /// `create_pipeline`.
    CreatePipeline {
        /// Pipeline name.
        name: String,
        /// Definition text.
        definition: String,
        /// Whether deployment was requested.
        deploy: bool,
    },
    /// `destroy_pipeline`.
    DestroyPipeline {
        /// Pipeline name.
        name: String,
    },
    /// `upload_module`.
    UploadModule {
        /// Module role.
        role: ModuleRole,
        /// Module name.
        name: String,
        /// Archive size in bytes.
        size: usize,
    },
    /// `module_info`.
    ModuleInfo {
        /// Module role.
        role: ModuleRole,
        /// Module name.
        name: String,
    },
    /// `delete_module`.
    DeleteModule {
        /// Module role.
        role: ModuleRole,
        /// Module name.
        name: String,
    },
}

/// An accepted module upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Module role.
    pub role: ModuleRole,
    /// Module name.
    pub name: String,
    /// Archive bytes.
    pub archive: Vec<u8>,
}

#[derive(Debug)]
struct StoredPipeline {
    name: String,
    definition: String,
    deploy: bool,
    pending_listings: u32,
}

impl StoredPipeline {
    fn status(&self) -> &'static str {
        if !self.deploy {
            "undeployed"
        } else if self.pending_listings > 0 {
            "deploying"
        } else {
            DEPLOYED_STATUS
        }
    }

    fn info(&self) -> PipelineInfo {
        PipelineInfo {
            name: self.name.clone(),
            definition: self.definition.clone(),
            status: Some(self.status().to_string()),
        }
    }
}

/// A [`ControlPlane`] that keeps pipelines and modules in memory.
///
/// Creation and deletion take effect immediately. Deployment can be made
/// to lag with [`with_deploy_delay`](Self::with_deploy_delay), and queued
/// failures make the next calls fail.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    pipelines: Mutex<Vec<StoredPipeline>>,
    modules: Mutex<Vec<Upload>>,
    uploads: Mutex<Vec<Upload>>,
    calls: Mutex<Vec<ControlPlaneCall>>,
    failures: Mutex<VecDeque<RemoteError>>,
    rejected_uploads: Mutex<HashSet<String>>,
    deploy_delay: u32,
}

impl InMemoryControlPlane {
    /// Creates an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports newly deployed pipelines as `deploying` for this many listings.
    #[must_use]
    pub const fn with_deploy_delay(mut self, listings: u32) -> Self {
        self.deploy_delay = listings;
        self
    }

    /// Seeds an existing pipeline.
    #[must_use]
    pub fn with_pipeline(self, name: impl Into<String>, definition: impl Into<String>, deployed: bool) -> Self {
        self.pipelines.lock().push(StoredPipeline {
            name: name.into(),
            definition: definition.into(),
            deploy: deployed,
            pending_listings: 0,
        });
        self
    }

    /// Seeds an existing module.
    #[must_use]
    pub fn with_module(self, role: ModuleRole, name: impl Into<String>) -> Self {
        self.modules.lock().push(Upload {
            role,
            name: name.into(),
            archive: Vec::new(),
        });
        self
    }

    /// Makes the next call fail with `error`. Queued failures are used in order.
    pub fn fail_next(&self, error: RemoteError) {
        self.failures.lock().push_back(error);
    }

    /// Makes every upload of the named module fail with a 500 status.
    pub fn reject_upload(&self, name: impl Into<String>) {
        self.rejected_uploads.lock().insert(name.into());
    }

    /// Current pipelines, without advancing deployment.
    #[must_use]
    pub fn pipelines(&self) -> Vec<PipelineInfo> {
        self.pipelines.lock().iter().map(StoredPipeline::info).collect()
    }

    /// Current modules.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.modules
            .lock()
            .iter()
            .map(|m| ModuleInfo {
                name: m.name.clone(),
                role: m.role,
            })
            .collect()
    }

    /// Every accepted upload, including modules deleted since.
    #[must_use]
    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().clone()
    }

    /// Every call received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: ControlPlaneCall) -> Result<(), RemoteError> {
        self.calls.lock().push(call);
        self.failures.lock().pop_front().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn list_pipelines(&self) -> Result<Vec<PipelineInfo>, RemoteError> {
        self.record(ControlPlaneCall::ListPipelines)?;
        let mut pipelines = self.pipelines.lock();
        Ok(pipelines
            .iter_mut()
            .map(|p| {
                let info = p.info();
                if p.deploy {
                    p.pending_listings = p.pending_listings.saturating_sub(1);
                }
                info
            })
            .collect())
    }

    async fn list_modules(&self, name_prefix: Option<&str>) -> Result<Vec<ModuleInfo>, RemoteError> {
        self.record(ControlPlaneCall::ListModules {
            prefix: name_prefix.map(str::to_string),
        })?;
        Ok(self
            .modules()
            .into_iter()
            .filter(|m| name_prefix.map_or(true, |p| m.name.starts_with(p)))
            .collect())
    }

    async fn create_pipeline(&self, name: &str, definition: &str, deploy: bool) -> Result<(), RemoteError> {
        self.record(ControlPlaneCall::CreatePipeline {
            name: name.to_string(),
            definition: definition.to_string(),
            deploy,
        })?;
        let mut pipelines = self.pipelines.lock();
        if pipelines.iter().any(|p| p.name == name) {
            return Err(RemoteError::AlreadyExists(format!(
                "There is already a stream named '{name}'"
            )));
        }
        pipelines.push(StoredPipeline {
            name: name.to_string(),
            definition: definition.to_string(),
            deploy,
            pending_listings: if deploy { self.deploy_delay } else { 0 },
        });
        Ok(())
    }

    async fn destroy_pipeline(&self, name: &str) -> Result<(), RemoteError> {
        self.record(ControlPlaneCall::DestroyPipeline { name: name.to_string() })?;
        let mut pipelines = self.pipelines.lock();
        let before = pipelines.len();
        pipelines.retain(|p| p.name != name);
        if pipelines.len() == before {
            return Err(RemoteError::NotFound(format!("There is no stream definition named '{name}'")));
        }
        Ok(())
    }

    async fn upload_module(&self, role: ModuleRole, name: &str, archive: Vec<u8>) -> Result<(), RemoteError> {
        self.record(ControlPlaneCall::UploadModule {
            role,
            name: name.to_string(),
            size: archive.len(),
        })?;
        if self.rejected_uploads.lock().contains(name) {
            return Err(RemoteError::Status {
                status: 500,
                message: format!("upload of '{name}' rejected"),
            });
        }
        let mut modules = self.modules.lock();
        if modules.iter().any(|m| m.role == role && m.name == name) {
            return Err(RemoteError::AlreadyExists(format!(
                "There is already a module named '{name}' with type '{role}'"
            )));
        }
        let upload = Upload {
            role,
            name: name.to_string(),
            archive,
        };
        self.uploads.lock().push(upload.clone());
        modules.push(upload);
        Ok(())
    }

    async fn module_info(&self, role: ModuleRole, name: &str) -> Result<ModuleInfo, RemoteError> {
        self.record(ControlPlaneCall::ModuleInfo {
            role,
            name: name.to_string(),
        })?;
        self.modules
            .lock()
            .iter()
            .find(|m| m.role == role && m.name == name)
            .map(|m| ModuleInfo {
                name: m.name.clone(),
                role: m.role,
            })
            .ok_or_else(|| RemoteError::NotFound(format!("There is no {role} module named '{name}'")))
    }

    async fn delete_module(&self, role: ModuleRole, name: &str) -> Result<(), RemoteError> {
        self.record(ControlPlaneCall::DeleteModule {
            role,
            name: name.to_string(),
        })?;
        let mut modules = self.modules.lock();
        let before = modules.len();
        modules.retain(|m| !(m.role == role && m.name == name));
        if modules.len() == before {
            return Err(RemoteError::NotFound(format!("There is no {role} module named '{name}'")));
        }
        Ok(())
    }
}
