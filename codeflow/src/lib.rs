//! # Codeflow
//!
//! Packages closure-backed pipeline steps into deployable modules and
//! publishes them, together with the pipeline definition, to a remote
//! stream-processing platform.
//!
//! A pipeline is a source, zero or more processors and a sink. Each step is
//! either a named module the platform already knows or a serialized closure.
//! Closure steps become code modules:
//!
//! - **Introspection** recovers the closure's input and output types
//! - **Scanning** walks the compiled units it references
//! - **Packaging** rewrites a template archive with those units, the
//!   serialized closure and a generated glue class
//! - **Deployment** publishes each archive, waits until the platform
//!   reports it, then creates the pipeline
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use codeflow::prelude::*;
//!
//! let config = CodeflowConfig::from_file("codeflow.json")?.with_env_overrides();
//! let deployer = Deployer::from_config(&config)?;
//!
//! let mut pipeline = PipelineBuilder::new(deployer.factory().clone())
//!     .source(Stage::time())
//!     .process_code(&ClosureCapsule::function(bytes, "com.acme.App"))
//!     .sink(Stage::log());
//!
//! let deployed = deployer.deploy(&mut pipeline, "ticktock", true).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod archive;
pub mod classfile;
pub mod config;
pub mod errors;
pub mod introspect;
pub mod observability;
pub mod pipeline;
pub mod remote;
pub mod resources;
pub mod scanner;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::archive::{ArchiveCustomizer, ModuleRole, TemplateCatalog, TemplateSource};
    pub use crate::classfile::TypeDescriptor;
    pub use crate::config::CodeflowConfig;
    pub use crate::errors::{
        AssemblyError, CodeflowError, ConfigError, DeployError, PackagingError, RemoteError,
    };
    pub use crate::introspect::{ClosureCapsule, LayeredIntrospector, TypeIntrospector};
    pub use crate::pipeline::{
        CodeKind, CodeModuleFactory, DeployablePipeline, DeployedPipeline, Deployer,
        PartialPipeline, PipelineBuilder, Stage,
    };
    pub use crate::remote::{ControlPlane, DeploymentClient, PollPolicy};
    pub use crate::resources::SymbolPath;
    pub use crate::scanner::ReferenceScanner;
}
