//! Idempotent deployment operations.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::control_plane::ControlPlane;
use super::poll::{poll_until, Clock, PollPolicy, SystemClock};
use crate::archive::{archive_fingerprint, ModuleRole};
use crate::errors::RemoteError;
use crate::pipeline::code_module_prefix;

/// Deployment operations over a [`ControlPlane`].
///
/// Every operation is safe to retry. Conditions that are part of normal
/// idempotent flow (destroying something already gone, creating something
/// already there) are not errors. A `false` result means the expected
/// state was not observed within the poll window; the platform may still
/// converge afterwards.
#[derive(Clone)]
pub struct DeploymentClient {
    plane: Arc<dyn ControlPlane>,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
}

impl std::fmt::Debug for DeploymentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentClient")
            .field("clock", &self.clock)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DeploymentClient {
    /// Creates a client polling on the system clock with the default policy.
    #[must_use]
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            plane,
            clock: Arc::new(SystemClock::new()),
            policy: PollPolicy::default(),
        }
    }

    /// Builds an HTTP-backed client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    #[cfg(feature = "http")]
    pub fn from_config(config: &crate::config::RemoteConfig) -> Result<Self, RemoteError> {
        let plane = super::HttpControlPlane::from_config(config)?;
        Ok(Self::new(Arc::new(plane)).with_poll_policy(config.poll))
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the poll policy.
    #[must_use]
    pub const fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The underlying transport.
    #[must_use]
    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.plane
    }

    /// The poll policy.
    #[must_use]
    pub const fn poll_policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Uploads a module and waits for it to become visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload or an existence check fails.
    pub async fn publish_module(&self, name: &str, role: ModuleRole, archive: Vec<u8>) -> Result<bool, RemoteError> {
        info!(
            module = name,
            role = %role,
            size = archive.len(),
            fingerprint = %archive_fingerprint(&archive),
            "Publishing module"
        );
        match self.plane.upload_module(role, name, archive).await {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => {
                warn!(module = name, role = %role, "Module already present, waiting for it");
            }
            Err(err) => return Err(err),
        }
        poll_until(&self.policy, self.clock.as_ref(), name, || self.module_exists(name, role)).await
    }

    /// Whether a module is visible on the platform.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than "not found".
    pub async fn module_exists(&self, name: &str, role: ModuleRole) -> Result<bool, RemoteError> {
        match self.plane.module_info(role, name).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Whether a pipeline is listed, optionally requiring it to be deployed.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    pub async fn pipeline_exists(&self, name: &str, require_deployed: bool) -> Result<bool, RemoteError> {
        let pipelines = self.plane.list_pipelines().await?;
        Ok(pipelines
            .iter()
            .any(|p| p.name == name && (!require_deployed || p.is_deployed())))
    }

    /// Creates a pipeline and waits for it to appear (deployed, if requested).
    ///
    /// # Errors
    ///
    /// Returns an error if the request or an existence check fails.
    pub async fn create_pipeline(&self, name: &str, definition: &str, deploy: bool) -> Result<bool, RemoteError> {
        info!(pipeline = name, definition, deploy, "Creating pipeline");
        match self.plane.create_pipeline(name, definition, deploy).await {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => {
                warn!(pipeline = name, "Pipeline already exists, waiting for it");
            }
            Err(err) => return Err(err),
        }
        self.await_pipeline(name, deploy).await
    }

    /// Creates a pipeline that must not exist yet and waits for it to appear.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::AlreadyExists`] if a pipeline of that name is
    /// still present, or any request or existence check error.
    pub async fn create_new_pipeline(&self, name: &str, definition: &str, deploy: bool) -> Result<bool, RemoteError> {
        info!(pipeline = name, definition, deploy, "Creating new pipeline");
        self.plane.create_pipeline(name, definition, deploy).await?;
        self.await_pipeline(name, deploy).await
    }

    async fn await_pipeline(&self, name: &str, deploy: bool) -> Result<bool, RemoteError> {
        poll_until(&self.policy, self.clock.as_ref(), name, || {
            self.pipeline_exists(name, deploy)
        })
        .await
    }

    /// Destroys a pipeline and waits for it to disappear.
    ///
    /// Returns `Ok(false)` when there was no such pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or a listing fails.
    pub async fn destroy_pipeline(&self, name: &str) -> Result<bool, RemoteError> {
        debug!(pipeline = name, "Destroying pipeline");
        match self.plane.destroy_pipeline(name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(pipeline = name, "No such pipeline");
                return Ok(false);
            }
            Err(err) => return Err(err),
        }
        poll_until(&self.policy, self.clock.as_ref(), name, || async {
            self.pipeline_exists(name, false).await.map(|exists| !exists)
        })
        .await
    }

    /// Destroys a pipeline and deletes its code modules.
    ///
    /// Module deletion is attempted even if the pipeline was absent or
    /// could not be destroyed.
    ///
    /// # Errors
    ///
    /// Returns the destroy error if there was one, else any module deletion error.
    pub async fn destroy_pipeline_and_modules(&self, name: &str) -> Result<bool, RemoteError> {
        let destroyed = self.destroy_pipeline(name).await;
        let deleted = self.delete_code_modules_for(name).await;
        match (destroyed, deleted) {
            (Err(err), Err(module_err)) => {
                warn!(pipeline = name, error = %module_err, "Code module cleanup failed");
                Err(err)
            }
            (Err(err), Ok(_)) => Err(err),
            (Ok(_), Err(err)) => Err(err),
            (Ok(destroyed), Ok(count)) => {
                debug!(pipeline = name, destroyed, modules = count, "Pipeline torn down");
                Ok(destroyed)
            }
        }
    }

    /// Deletes every `{pipeline}-code-*` module. Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or a deletion fails.
    pub async fn delete_code_modules_for(&self, pipeline: &str) -> Result<usize, RemoteError> {
        let prefix = code_module_prefix(pipeline);
        self.delete_modules_with_prefix(&prefix).await
    }

    /// Destroys every pipeline and deletes every module whose name starts
    /// with `prefix`. Returns the number of items removed.
    ///
    /// Not transactional: a failure part way through leaves a partial purge.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub async fn purge_by_name_prefix(&self, prefix: &str) -> Result<usize, RemoteError> {
        info!(prefix, "Purging pipelines and modules");
        let pipelines = self.plane.list_pipelines().await?;
        let mut count = 0;
        for pipeline in pipelines.iter().filter(|p| p.name.starts_with(prefix)) {
            match self.plane.destroy_pipeline(&pipeline.name).await {
                Ok(()) => count += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        if count > 0 {
            let gone = poll_until(&self.policy, self.clock.as_ref(), prefix, || async {
                let remaining = self.plane.list_pipelines().await?;
                Ok::<_, RemoteError>(!remaining.iter().any(|p| p.name.starts_with(prefix)))
            })
            .await?;
            if !gone {
                warn!(prefix, "Purged pipelines still listed after timeout");
            }
        }
        count += self.delete_modules_with_prefix(prefix).await?;
        info!(prefix, removed = count, "Purge complete");
        Ok(count)
    }

    async fn delete_modules_with_prefix(&self, prefix: &str) -> Result<usize, RemoteError> {
        let modules = self.plane.list_modules(Some(prefix)).await?;
        let mut count = 0;
        for module in modules.iter().filter(|m| m.name.starts_with(prefix)) {
            debug!(module = %module.name, role = %module.role, "Deleting module");
            match self.plane.delete_module(module.role, &module.name).await {
                Ok(()) => count += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(count)
    }
}
