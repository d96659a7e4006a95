//! Pipeline assembly and deployment.
//!
//! This module provides:
//! - Named stages and closure-backed code modules
//! - Copy-on-extend pipeline builders
//! - The code module factory (introspection, scanning, packaging)
//! - The deployer that publishes code modules and creates the pipeline

mod builder;
mod code_module;
mod deploy;
mod factory;
mod stage;
mod state;

#[cfg(test)]
mod integration_tests;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::archive::ModuleRole;

pub use builder::{DeployablePipeline, PartialPipeline, PipelineBuilder};
pub use code_module::{code_module_prefix, CodeModule, CODE_MODULE_INFIX};
pub use deploy::{validate_name, DeployedPipeline, Deployer, DeploymentReport, PublishedModule};
pub use factory::CodeModuleFactory;
pub use stage::Stage;
pub use state::{PipelineState, Step};

/// The shape of a closure backing a pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    /// A one-argument function applied to each message.
    Function,
    /// A zero-argument supplier producing messages.
    Supplier,
    /// A function over the whole message stream.
    StreamProcessor,
}

impl CodeKind {
    /// Number of arguments the closure's invocation method takes.
    #[must_use]
    pub const fn invocation_arity(&self) -> usize {
        match self {
            Self::Function | Self::StreamProcessor => 1,
            Self::Supplier => 0,
        }
    }

    /// The role a closure of this kind normally plays.
    #[must_use]
    pub const fn default_role(&self) -> ModuleRole {
        match self {
            Self::Supplier => ModuleRole::Source,
            Self::Function | Self::StreamProcessor => ModuleRole::Processor,
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Supplier => "supplier",
            Self::StreamProcessor => "stream_processor",
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_kind_arity_and_role() {
        assert_eq!(CodeKind::Function.invocation_arity(), 1);
        assert_eq!(CodeKind::StreamProcessor.invocation_arity(), 1);
        assert_eq!(CodeKind::Supplier.invocation_arity(), 0);
        assert_eq!(CodeKind::Supplier.default_role(), ModuleRole::Source);
    }

    #[test]
    fn test_code_kind_serde() {
        assert_eq!(
            serde_json::to_string(&CodeKind::StreamProcessor).unwrap(),
            "\"stream_processor\""
        );
        let kind: CodeKind = serde_json::from_str("\"function\"").unwrap();
        assert_eq!(kind, CodeKind::Function);
        assert_eq!(kind.to_string(), "function");
    }
}
