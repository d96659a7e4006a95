//! Configuration for packaging and deployment.
//!
//! Every field has a default, so an empty JSON object is a complete
//! configuration pointing at a local platform.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::{DriverLayout, ModuleRole, TemplateCatalog, TemplateSource};
use crate::errors::ConfigError;
use crate::introspect::CAPSULE_RESOURCE_NAME;
use crate::pipeline::{validate_name, CodeKind};
use crate::remote::PollPolicy;
use crate::resources::SymbolPath;

/// Environment variable overriding [`RemoteConfig::base_url`].
pub const API_URL_ENV: &str = "CODEFLOW_API_URL";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeflowConfig {
    /// Remote control plane.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Module packaging.
    #[serde(default)]
    pub packaging: PackagingConfig,
    /// Deployment behavior.
    #[serde(default)]
    pub deploy: DeployConfig,
}

impl CodeflowConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or a value is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its content is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_json_str(&text)
    }

    /// Applies overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(API_URL_ENV).filter(|url| !url.trim().is_empty()) {
            debug!(base_url = %url, "Base URL overridden from environment");
            self.remote.base_url = url;
        }
        self
    }

    /// Checks values that deserialize but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.remote.validate()?;
        self.packaging.validate()?;
        validate_name(&self.deploy.code_prefix).map_err(|err| ConfigError::Invalid {
            key: "deploy.code_prefix",
            message: err.to_string(),
        })
    }
}

/// Remote control-plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the platform's HTTP API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Page size requested from listing endpoints.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Visibility polling.
    #[serde(default)]
    pub poll: PollPolicy,
}

fn default_base_url() -> String {
    "http://localhost:9393".to_string()
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

const fn default_page_size() -> u32 {
    100
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            page_size: default_page_size(),
            poll: PollPolicy::default(),
        }
    }
}

impl RemoteConfig {
    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the polling policy.
    #[must_use]
    pub const fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "remote.base_url",
                message: format!("'{}' is not an http(s) URL", self.base_url),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "remote.page_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.poll.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "remote.poll.interval_ms",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// An explicit template for one closure kind and module role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEntry {
    /// Closure kind.
    pub kind: CodeKind,
    /// Module role.
    pub role: ModuleRole,
    /// Template archive path.
    pub path: PathBuf,
}

/// Module packaging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Root of the built-in template build tree.
    #[serde(default)]
    pub template_root: Option<PathBuf>,
    /// Directories searched by file name when a template path is missing.
    #[serde(default)]
    pub template_search_dirs: Vec<PathBuf>,
    /// Templates registered on top of the built-in ones.
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
    /// Directories of compiled units.
    #[serde(default)]
    pub symbol_dirs: Vec<PathBuf>,
    /// Archives of compiled units.
    #[serde(default)]
    pub symbol_archives: Vec<PathBuf>,
    /// Archive entry holding the serialized closure.
    #[serde(default = "default_capsule_resource")]
    pub capsule_resource: String,
    /// Driver classes the generated glue targets.
    #[serde(default)]
    pub driver: DriverLayout,
    /// Internal-name prefixes never collected as dependencies.
    #[serde(default)]
    pub excluded_prefixes: Vec<String>,
    /// Support symbols per kind, replacing the built-in lists.
    #[serde(default)]
    pub support_symbols: HashMap<CodeKind, Vec<String>>,
}

fn default_capsule_resource() -> String {
    CAPSULE_RESOURCE_NAME.to_string()
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            template_root: None,
            template_search_dirs: Vec::new(),
            templates: Vec::new(),
            symbol_dirs: Vec::new(),
            symbol_archives: Vec::new(),
            capsule_resource: default_capsule_resource(),
            driver: DriverLayout::default(),
            excluded_prefixes: Vec::new(),
            support_symbols: HashMap::new(),
        }
    }
}

impl PackagingConfig {
    /// Sets the template build tree root.
    #[must_use]
    pub fn with_template_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.template_root = Some(root.into());
        self
    }

    /// Adds a template override.
    #[must_use]
    pub fn with_template(mut self, kind: CodeKind, role: ModuleRole, path: impl Into<PathBuf>) -> Self {
        self.templates.push(TemplateEntry {
            kind,
            role,
            path: path.into(),
        });
        self
    }

    /// Adds a directory of compiled units.
    #[must_use]
    pub fn with_symbol_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.symbol_dirs.push(dir.into());
        self
    }

    /// The template catalog described by this configuration.
    #[must_use]
    pub fn template_catalog(&self) -> TemplateCatalog {
        let mut catalog = self
            .template_root
            .as_ref()
            .map_or_else(TemplateCatalog::new, TemplateCatalog::standard);
        for entry in &self.templates {
            catalog.register(entry.kind, entry.role, TemplateSource::Path(entry.path.clone()));
        }
        self.template_search_dirs
            .iter()
            .fold(catalog, |catalog, dir| catalog.with_search_dir(dir.clone()))
    }

    /// The symbol path described by this configuration. Directories are
    /// searched before archives.
    #[must_use]
    pub fn symbol_path(&self) -> SymbolPath {
        let path = self
            .symbol_dirs
            .iter()
            .fold(SymbolPath::new(), |path, dir| path.with_directory(dir.clone()));
        self.symbol_archives
            .iter()
            .fold(path, |path, archive| path.with_archive(archive.clone()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.capsule_resource.trim().is_empty() || self.capsule_resource.ends_with('/') {
            return Err(ConfigError::Invalid {
                key: "packaging.capsule_resource",
                message: format!("'{}' is not a file entry name", self.capsule_resource),
            });
        }
        if self.driver.glue_class.is_empty() || self.driver.glue_class.contains('.') {
            return Err(ConfigError::Invalid {
                key: "packaging.driver.glue_class",
                message: "expected a slash-separated internal name".to_string(),
            });
        }
        Ok(())
    }
}

/// Deployment behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Name prefix purged by cleanup.
    #[serde(default = "default_code_prefix")]
    pub code_prefix: String,
    /// Purge the code prefix before every deployment.
    #[serde(default)]
    pub tidy_before_deploy: bool,
}

fn default_code_prefix() -> String {
    "code".to_string()
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            code_prefix: default_code_prefix(),
            tidy_before_deploy: false,
        }
    }
}
