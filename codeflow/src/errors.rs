//! Error types for codeflow.
//!
//! Each subsystem owns a small error enum. Introspection and scanning errors
//! are normally absorbed by the caller (the step degrades to an unchecked
//! dispatch or an empty dependency list); packaging, remote and assembly
//! errors abort the module or pipeline operation they occur in.

use std::path::PathBuf;
use thiserror::Error;

use crate::archive::ModuleRole;
use crate::pipeline::CodeKind;

/// The main error type for codeflow operations.
#[derive(Debug, Error)]
pub enum CodeflowError {
    /// Class file decoding failed.
    #[error("{0}")]
    ClassFile(#[from] ClassFileError),

    /// Closure type recovery failed.
    #[error("{0}")]
    Introspection(#[from] IntrospectionError),

    /// Dependency discovery failed.
    #[error("{0}")]
    Scan(#[from] ScanError),

    /// Archive generation failed.
    #[error("{0}")]
    Packaging(#[from] PackagingError),

    /// A control-plane call failed.
    #[error("{0}")]
    Remote(#[from] RemoteError),

    /// The pipeline could not be assembled.
    #[error("{0}")]
    Assembly(#[from] AssemblyError),

    /// Deployment failed.
    #[error("{0}")]
    Deploy(#[from] DeployError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while decoding or encoding a compiled unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFileError {
    /// The input ended before a complete structure was read.
    #[error("unexpected end of class file at offset {offset} (needed {needed} more bytes)")]
    UnexpectedEof {
        /// Offset of the failed read.
        offset: usize,
        /// Bytes that were requested.
        needed: usize,
    },

    /// The magic number was not `0xCAFEBABE`.
    #[error("incorrect magic number 0x{0:08X}")]
    BadMagic(u32),

    /// A long or double constant occupies the last pool slot, leaving no
    /// room for its second slot.
    #[error("wide constant at index {index} overruns the constant pool")]
    TruncatedWideConstant {
        /// The constant pool index of the wide entry.
        index: u16,
    },

    /// A length or count does not fit its class file field.
    #[error("{what} of {len} exceeds the class file limit of {max}")]
    Oversized {
        /// The field being written.
        what: &'static str,
        /// The length that was requested.
        len: usize,
        /// The largest length the field can hold.
        max: usize,
    },

    /// An unknown constant pool tag was found.
    #[error("unexpected constant pool tag {tag} at index {index}")]
    UnknownConstantTag {
        /// The tag byte.
        tag: u8,
        /// The constant pool index.
        index: u16,
    },

    /// A constant pool reference pointed at a missing or mistyped entry.
    #[error("constant pool index {index} is not a valid {expected} entry")]
    BadConstantIndex {
        /// The offending index.
        index: u16,
        /// The entry kind that was expected.
        expected: &'static str,
    },

    /// A method body contained an undefined opcode.
    #[error("invalid opcode 0x{opcode:02X} at bytecode offset {offset}")]
    InvalidOpcode {
        /// The opcode byte.
        opcode: u8,
        /// Offset within the method body.
        offset: usize,
    },

    /// A type or method descriptor could not be parsed.
    #[error("malformed descriptor '{0}'")]
    MalformedDescriptor(String),
}

/// Errors raised while recovering a closure's declared types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntrospectionError {
    /// The capsule does not have the layout the introspector understands.
    #[error("unsupported closure capsule layout: {0}")]
    UnsupportedLayout(String),

    /// No call-site descriptor with the expected arity was found.
    #[error("no invocation descriptor with {arity} parameter(s) found in capsule")]
    NoInvocationDescriptor {
        /// The expected parameter count.
        arity: usize,
    },

    /// The caller did not declare the requested type.
    #[error("closure {0} type was not declared")]
    Undeclared(&'static str),

    /// The decoded type could not be found on the symbol path.
    #[error("type '{0}' could not be resolved on the symbol path")]
    UnresolvedType(String),

    /// A descriptor was found but could not be decoded.
    #[error("{0}")]
    Descriptor(#[from] ClassFileError),
}

/// Errors raised while discovering referenced symbols.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The compiled unit could not be decoded.
    #[error("{0}")]
    ClassFile(#[from] ClassFileError),

    /// The compiled unit could not be loaded.
    #[error("unable to load symbol for scanning: {0}")]
    Load(#[from] PackagingError),
}

/// Errors raised while building a module archive.
#[derive(Debug, Error)]
pub enum PackagingError {
    /// No template is registered for the requested module shape.
    #[error("no template archive registered for {kind:?} {role}")]
    TemplateNotRegistered {
        /// The closure kind.
        kind: CodeKind,
        /// The module role.
        role: ModuleRole,
    },

    /// The template archive could not be read.
    #[error("unable to read template archive {path}: {source}")]
    TemplateIo {
        /// Path that was tried.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A symbol was not present in any root of the symbol path.
    #[error("failed to find symbol {0} on the symbol path")]
    SymbolNotFound(String),

    /// The glue slot named by the generator does not exist in the template.
    #[error("template archive has no entry for customization slot '{0}'")]
    MissingSlot(String),

    /// Glue code could not be generated.
    #[error("glue generation failed: {0}")]
    Glue(String),

    /// The archive could not be read or written.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by control-plane calls.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The named pipeline or module does not exist.
    #[error("no such resource: {0}")]
    NotFound(String),

    /// The named pipeline or module already exists.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// The platform answered with an unexpected status.
    #[error("control plane returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("unable to decode control plane response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether this error means the target is already gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this error means the target is already present.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Errors raised while assembling a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// The pipeline has no source.
    #[error("pipeline has no source")]
    MissingSource,

    /// The pipeline has no sink and cannot be deployed.
    #[error("pipeline has no sink and is not deployable")]
    NotDeployable,

    /// A code module was already bound to a different pipeline.
    #[error("code module {id} is already bound to pipeline '{bound}', cannot bind to '{requested}'")]
    AlreadyBound {
        /// The module id.
        id: usize,
        /// The pipeline it is bound to.
        bound: String,
        /// The pipeline that was requested.
        requested: String,
    },

    /// A code module was rendered before being bound to a pipeline.
    #[error("code module {0} has not been bound to a pipeline")]
    Unbound(usize),

    /// The name is not usable on the remote platform.
    #[error("invalid name '{0}': names must match [A-Za-z0-9][A-Za-z0-9_.-]*")]
    InvalidName(String),
}

/// Errors raised while deploying a pipeline.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The pipeline could not be assembled.
    #[error("{0}")]
    Assembly(#[from] AssemblyError),

    /// A code module archive could not be built.
    #[error("failed to package code module '{module}': {source}")]
    Packaging {
        /// Remote module name.
        module: String,
        /// Underlying error.
        #[source]
        source: PackagingError,
    },

    /// A code module was not confirmed as published.
    #[error("code module '{module}' was not confirmed as published")]
    PublicationUnconfirmed {
        /// Remote module name.
        module: String,
    },

    /// The pipeline definition was not confirmed as created.
    #[error("pipeline '{0}' was not confirmed as created")]
    CreationUnconfirmed(String),

    /// A control-plane call failed.
    #[error("{0}")]
    Remote(#[from] RemoteError),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("unable to read configuration {path}: {source}")]
    Io {
        /// The path that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A configured value is invalid.
    #[error("invalid configuration value for '{key}': {message}")]
    Invalid {
        /// The offending key.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_predicates() {
        assert!(RemoteError::NotFound("foo".into()).is_not_found());
        assert!(!RemoteError::NotFound("foo".into()).is_already_exists());
        assert!(RemoteError::AlreadyExists("foo".into()).is_already_exists());
    }

    #[test]
    fn test_class_file_error_display() {
        let err = ClassFileError::BadMagic(0xDEAD_BEEF);
        assert_eq!(err.to_string(), "incorrect magic number 0xDEADBEEF");
    }

    #[test]
    fn test_codeflow_error_from_remote() {
        let err: CodeflowError = RemoteError::Transport("connection refused".into()).into();
        assert!(matches!(err, CodeflowError::Remote(_)));
        assert_eq!(err.to_string(), "transport error: connection refused");
    }

    #[test]
    fn test_assembly_error_display() {
        let err = AssemblyError::AlreadyBound {
            id: 1,
            bound: "a".into(),
            requested: "b".into(),
        };
        assert!(err.to_string().contains("already bound to pipeline 'a'"));
    }
}
