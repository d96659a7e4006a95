//! Deploying assembled pipelines.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::archive::{archive_fingerprint, ModuleRole};
use crate::errors::{AssemblyError, DeployError, RemoteError};
use crate::remote::DeploymentClient;

use super::{CodeKind, CodeModuleFactory, DeployablePipeline};

#[allow(clippy::expect_used)]
static VALID_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("name pattern is valid"));

fn default_code_prefix() -> String {
    "code".to_string()
}

/// Checks that a name is usable for a remote pipeline or module.
///
/// # Errors
///
/// Returns [`AssemblyError::InvalidName`] otherwise.
pub fn validate_name(name: &str) -> Result<(), AssemblyError> {
    if VALID_NAME.is_match(name) {
        Ok(())
    } else {
        Err(AssemblyError::InvalidName(name.to_string()))
    }
}

/// A code module published during a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedModule {
    /// Remote module name.
    pub name: String,
    /// Module role.
    pub role: ModuleRole,
    /// Closure kind.
    pub kind: CodeKind,
    /// SHA-256 of the uploaded archive.
    pub fingerprint: String,
    /// Archive size in bytes.
    pub size: usize,
}

/// What a deployment did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    /// Unique id of this deployment attempt.
    pub deployment_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Definition text sent to the platform.
    pub definition: String,
    /// Code modules published, in step order.
    pub modules: Vec<PublishedModule>,
    /// Whether a pipeline definition was requested in this attempt.
    pub created: bool,
    /// When the deployment started.
    pub started_at: DateTime<Utc>,
    /// When the deployment finished.
    pub finished_at: DateTime<Utc>,
}

/// Publishes code modules and creates pipelines.
#[derive(Debug, Clone)]
pub struct Deployer {
    client: DeploymentClient,
    factory: Arc<CodeModuleFactory>,
    code_prefix: String,
    tidy_before_deploy: bool,
}

impl Deployer {
    /// Creates a deployer.
    #[must_use]
    pub fn new(client: DeploymentClient, factory: Arc<CodeModuleFactory>) -> Self {
        Self {
            client,
            factory,
            code_prefix: default_code_prefix(),
            tidy_before_deploy: false,
        }
    }

    /// Builds an HTTP-backed deployer from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    #[cfg(feature = "http")]
    pub fn from_config(config: &crate::config::CodeflowConfig) -> Result<Self, RemoteError> {
        let client = DeploymentClient::from_config(&config.remote)?;
        let factory = Arc::new(CodeModuleFactory::from_config(&config.packaging));
        Ok(Self::new(client, factory)
            .with_code_prefix(config.deploy.code_prefix.clone())
            .with_tidy_before_deploy(config.deploy.tidy_before_deploy))
    }

    /// Sets the name prefix purged by [`cleanup`](Self::cleanup).
    #[must_use]
    pub fn with_code_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.code_prefix = prefix.into();
        self
    }

    /// Purges the code prefix before every deployment.
    #[must_use]
    pub const fn with_tidy_before_deploy(mut self, tidy: bool) -> Self {
        self.tidy_before_deploy = tidy;
        self
    }

    /// The deployment client.
    #[must_use]
    pub const fn client(&self) -> &DeploymentClient {
        &self.client
    }

    /// The code module factory.
    #[must_use]
    pub fn factory(&self) -> &Arc<CodeModuleFactory> {
        &self.factory
    }

    /// Deploys a pipeline under `name`.
    ///
    /// With `replace_existing`, any pipeline of that name and its code
    /// modules are removed first, on a best-effort basis; if the old
    /// pipeline is still there at creation time the deployment fails
    /// rather than adopting it. Code modules are
    /// each packaged and confirmed published before the pipeline definition
    /// is requested. A failure part way through leaves already published
    /// modules in place; deploying again resumes.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, a module cannot be packaged
    /// or is not confirmed published, the definition is not confirmed
    /// created, or a control-plane call fails.
    pub async fn deploy(
        &self,
        pipeline: &mut DeployablePipeline,
        name: &str,
        replace_existing: bool,
    ) -> Result<DeployedPipeline, DeployError> {
        let deployment_id = Uuid::new_v4();
        let span = tracing::info_span!("deploy", pipeline = name, %deployment_id);
        self.deploy_inner(pipeline, name, replace_existing, deployment_id)
            .instrument(span)
            .await
    }

    async fn deploy_inner(
        &self,
        pipeline: &mut DeployablePipeline,
        name: &str,
        replace_existing: bool,
        deployment_id: Uuid,
    ) -> Result<DeployedPipeline, DeployError> {
        let started_at = Utc::now();
        validate_name(name)?;
        if !pipeline.state().is_deployable() {
            return Err(AssemblyError::NotDeployable.into());
        }

        if replace_existing {
            if let Err(err) = self.client.destroy_pipeline_and_modules(name).await {
                warn!(error = %err, "Removing existing pipeline failed, continuing");
            }
        }
        if self.tidy_before_deploy {
            if let Err(err) = self.client.purge_by_name_prefix(&self.code_prefix).await {
                warn!(prefix = %self.code_prefix, error = %err, "Tidy before deploy failed, continuing");
            }
        }

        let state = pipeline.state_mut();
        let mut modules = Vec::new();
        if state.uses_code_modules() {
            state.bind_code_modules(name)?;
            for module in state.code_modules() {
                let remote_name = module.remote_name()?;
                let archive = self.factory.package(module).map_err(|source| DeployError::Packaging {
                    module: remote_name.clone(),
                    source,
                })?;
                let published = PublishedModule {
                    name: remote_name.clone(),
                    role: module.role(),
                    kind: module.kind(),
                    fingerprint: archive_fingerprint(&archive),
                    size: archive.len(),
                };
                if !self
                    .client
                    .publish_module(&remote_name, module.role(), archive)
                    .await?
                {
                    return Err(DeployError::PublicationUnconfirmed { module: remote_name });
                }
                modules.push(published);
            }
        }

        let definition = state.definition()?;
        let create = replace_existing || !state.is_created();
        if create {
            let confirmed = if replace_existing {
                match self.client.create_new_pipeline(name, &definition, true).await {
                    Err(err) if err.is_already_exists() => {
                        warn!(pipeline = name, "Pipeline still present after removal, not replaced");
                        false
                    }
                    result => result?,
                }
            } else {
                self.client.create_pipeline(name, &definition, true).await?
            };
            if !confirmed {
                return Err(DeployError::CreationUnconfirmed(name.to_string()));
            }
            state.mark_created();
        }

        let report = DeploymentReport {
            deployment_id,
            pipeline: name.to_string(),
            definition: definition.clone(),
            modules,
            created: create,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            definition = %definition,
            modules = report.modules.len(),
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Pipeline deployed"
        );

        Ok(DeployedPipeline {
            name: name.to_string(),
            definition,
            report,
            client: self.client.clone(),
        })
    }

    /// Removes every pipeline and module under the code prefix.
    ///
    /// # Errors
    ///
    /// Returns the first control-plane failure.
    pub async fn cleanup(&self) -> Result<usize, RemoteError> {
        self.client.purge_by_name_prefix(&self.code_prefix).await
    }
}

/// A pipeline that was deployed.
#[derive(Debug, Clone)]
pub struct DeployedPipeline {
    name: String,
    definition: String,
    report: DeploymentReport,
    client: DeploymentClient,
}

impl DeployedPipeline {
    /// Pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Definition text.
    #[must_use]
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// The deployment report.
    #[must_use]
    pub const fn report(&self) -> &DeploymentReport {
        &self.report
    }

    /// Whether the platform currently reports the pipeline as deployed.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    pub async fn is_deployed(&self) -> Result<bool, RemoteError> {
        self.client.pipeline_exists(&self.name, true).await
    }

    /// Destroys the pipeline and its code modules.
    ///
    /// # Errors
    ///
    /// Returns the first control-plane failure.
    pub async fn destroy(&self) -> Result<bool, RemoteError> {
        self.client.destroy_pipeline_and_modules(&self.name).await
    }
}
