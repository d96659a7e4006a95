//! REST transport for the control plane.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use super::control_plane::{ControlPlane, ModuleInfo, PipelineInfo};
use crate::archive::ModuleRole;
use crate::config::RemoteConfig;
use crate::errors::RemoteError;

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    content: Vec<T>,
    #[serde(default)]
    page: Option<PageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageMetadata {
    #[serde(default)]
    number: u32,
    #[serde(default)]
    total_pages: u32,
}

/// Control plane reached over HTTP.
///
/// Endpoints follow the stream platform's REST layout:
/// `/streams/definitions` for pipelines and `/modules/{role}/{name}` for
/// modules.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl HttpControlPlane {
    /// Creates a transport with a default client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Creates a transport over an existing client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: 100,
        }
    }

    /// Builds a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] if the HTTP client cannot be built.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self::with_client(client, config.base_url.clone()).with_page_size(config.page_size))
    }

    /// Sets the listing page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// The base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Appends each segment to the base URL, percent-encoding it.
    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| RemoteError::Transport(format!("invalid base URL '{}': {err}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| RemoteError::Transport(format!("base URL '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Fetches every page of a listing.
    ///
    /// Pages are requested in order until `totalPages` is reached. A server
    /// that answers with a different page than the one requested ends the
    /// listing, so a server ignoring the `page` parameter cannot loop it.
    async fn list_paged<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Vec<T>, RemoteError> {
        let path = segments.join("/");
        let mut items = Vec::new();
        let mut page = 0u32;
        loop {
            let response = self
                .client
                .get(self.url(segments)?)
                .query(&[("page", page), ("size", self.page_size)])
                .send()
                .await?;
            let body: Paged<T> = check(response, &path).await?.json().await?;
            let fetched = body.content.len();
            items.extend(body.content);
            trace!(path = %path, page, fetched, "Fetched listing page");

            let Some(meta) = body.page else { break };
            if meta.number != page {
                warn!(path = %path, requested = page, returned = meta.number, "Server ignored page request, stopping listing");
                break;
            }
            page += 1;
            if fetched == 0 || page >= meta.total_pages {
                break;
            }
        }
        Ok(items)
    }
}

/// Turns a non-success response into the matching [`RemoteError`].
async fn check(response: Response, target: &str) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = extract_message(&body);
    debug!(target, status = status.as_u16(), message = %message, "Control plane rejected request");
    Err(classify(status, target, message))
}

fn classify(status: StatusCode, target: &str, message: String) -> RemoteError {
    let lower = message.to_ascii_lowercase();
    if status == StatusCode::NOT_FOUND || lower.starts_with("there is no ") {
        RemoteError::NotFound(target.to_string())
    } else if status == StatusCode::CONFLICT
        || lower.contains("already exists")
        || lower.starts_with("there is already ")
    {
        RemoteError::AlreadyExists(target.to_string())
    } else {
        RemoteError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

/// Pulls the human-readable message out of an error body.
///
/// Error bodies are either `[{"logref": .., "message": ..}]`, a single such
/// object, or plain text.
fn extract_message(body: &str) -> String {
    let from_value = |v: &serde_json::Value| v.get("message").and_then(|m| m.as_str()).map(str::to_string);
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Array(items)) => items.first().and_then(from_value),
        Ok(value) => from_value(&value),
        Err(_) => None,
    }
    .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn list_pipelines(&self) -> Result<Vec<PipelineInfo>, RemoteError> {
        self.list_paged(&["streams", "definitions"]).await
    }

    async fn list_modules(&self, name_prefix: Option<&str>) -> Result<Vec<ModuleInfo>, RemoteError> {
        let modules: Vec<ModuleInfo> = self.list_paged(&["modules"]).await?;
        Ok(match name_prefix {
            Some(prefix) => modules.into_iter().filter(|m| m.name.starts_with(prefix)).collect(),
            None => modules,
        })
    }

    async fn create_pipeline(&self, name: &str, definition: &str, deploy: bool) -> Result<(), RemoteError> {
        let deploy = if deploy { "true" } else { "false" };
        let response = self
            .client
            .post(self.url(&["streams", "definitions"])?)
            .form(&[("name", name), ("definition", definition), ("deploy", deploy)])
            .send()
            .await?;
        check(response, name).await.map(drop)
    }

    async fn destroy_pipeline(&self, name: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.url(&["streams", "definitions", name])?)
            .send()
            .await?;
        check(response, name).await.map(drop)
    }

    async fn upload_module(&self, role: ModuleRole, name: &str, archive: Vec<u8>) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.url(&["modules", role.as_str(), name])?)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(archive)
            .send()
            .await?;
        check(response, name).await.map(drop)
    }

    async fn module_info(&self, role: ModuleRole, name: &str) -> Result<ModuleInfo, RemoteError> {
        let response = self
            .client
            .get(self.url(&["modules", role.as_str(), name])?)
            .send()
            .await?;
        Ok(check(response, name).await?.json().await?)
    }

    async fn delete_module(&self, role: ModuleRole, name: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.url(&["modules", role.as_str(), name])?)
            .send()
            .await?;
        check(response, name).await.map(drop)
    }
}
