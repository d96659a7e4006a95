//! Closure-backed pipeline steps.

use crate::archive::ModuleRole;
use crate::classfile::TypeDescriptor;
use crate::errors::AssemblyError;
use crate::resources::{Resource, ResourceSet};

use super::CodeKind;

/// Separator between a pipeline name and a code module id in remote names.
pub const CODE_MODULE_INFIX: &str = "-code-";

/// Prefix shared by every code module of `pipeline`.
#[must_use]
pub fn code_module_prefix(pipeline: &str) -> String {
    format!("{pipeline}{CODE_MODULE_INFIX}")
}

/// One pipeline step backed by a closure, with everything needed to package it.
///
/// The owning pipeline's name is bound once, at deploy time; from then on
/// the module is published as `{pipeline}-code-{id}`.
#[derive(Debug, Clone)]
pub struct CodeModule {
    id: usize,
    kind: CodeKind,
    role: ModuleRole,
    resources: ResourceSet,
    input_type: Option<TypeDescriptor>,
    output_type: Option<TypeDescriptor>,
    pipeline_name: Option<String>,
}

impl CodeModule {
    /// Creates an unbound module with no resources.
    #[must_use]
    pub fn new(id: usize, kind: CodeKind, role: ModuleRole) -> Self {
        Self {
            id,
            kind,
            role,
            resources: ResourceSet::new(),
            input_type: None,
            output_type: None,
            pipeline_name: None,
        }
    }

    /// Sets the resolved input type.
    #[must_use]
    pub fn with_input_type(mut self, descriptor: Option<TypeDescriptor>) -> Self {
        self.input_type = descriptor;
        self
    }

    /// Sets the resolved output type.
    #[must_use]
    pub fn with_output_type(mut self, descriptor: Option<TypeDescriptor>) -> Self {
        self.output_type = descriptor;
        self
    }

    /// Adds a resource to package. Returns `false` if the name was taken.
    pub fn add_resource(&mut self, resource: Resource) -> bool {
        self.resources.insert(resource)
    }

    /// Step id within the pipeline.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Closure kind.
    #[must_use]
    pub const fn kind(&self) -> CodeKind {
        self.kind
    }

    /// Position in the pipeline.
    #[must_use]
    pub const fn role(&self) -> ModuleRole {
        self.role
    }

    /// Resources to package.
    #[must_use]
    pub const fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    /// Resolved input type, if introspection succeeded.
    #[must_use]
    pub const fn input_type(&self) -> Option<&TypeDescriptor> {
        self.input_type.as_ref()
    }

    /// Resolved output type, if introspection succeeded.
    #[must_use]
    pub const fn output_type(&self) -> Option<&TypeDescriptor> {
        self.output_type.as_ref()
    }

    /// The bound pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> Option<&str> {
        self.pipeline_name.as_deref()
    }

    /// Binds the owning pipeline's name. Rebinding to the same name is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::AlreadyBound`] if bound to a different name.
    pub fn bind(&mut self, pipeline: &str) -> Result<(), AssemblyError> {
        match &self.pipeline_name {
            Some(bound) if bound == pipeline => Ok(()),
            Some(bound) => Err(AssemblyError::AlreadyBound {
                id: self.id,
                bound: bound.clone(),
                requested: pipeline.to_string(),
            }),
            None => {
                self.pipeline_name = Some(pipeline.to_string());
                Ok(())
            }
        }
    }

    /// The name this module is published under.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Unbound`] before [`bind`](Self::bind).
    pub fn remote_name(&self) -> Result<String, AssemblyError> {
        self.pipeline_name
            .as_deref()
            .map(|pipeline| format!("{}{}", code_module_prefix(pipeline), self.id))
            .ok_or(AssemblyError::Unbound(self.id))
    }
}
