//! Closure type recovery.
//!
//! A closure-backed step needs its input and output types so the glue
//! class can narrow the closure's result. Callers should declare them
//! ([`DeclaredTypes`]); recovering them from the serialized capsule
//! ([`SerializedLambdaIntrospector`]) is a best-effort fallback that only
//! understands one serialization layout and refuses anything else.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, trace, warn};

use crate::classfile::{decode_modified_utf8, MethodDescriptor, TypeDescriptor};
use crate::errors::IntrospectionError;
use crate::pipeline::CodeKind;
use crate::resources::SymbolPath;

/// Archive entry name of the serialized closure.
pub const CAPSULE_RESOURCE_NAME: &str = "lambda.ser";

const STREAM_MAGIC: [u8; 4] = [0xAC, 0xED, 0x00, 0x05];
const TC_STRING: u8 = 0x74;
const SERIALIZED_LAMBDA_CLASS: &[u8] = b"java.lang.invoke.SerializedLambda";

#[allow(clippy::expect_used)]
static METHOD_DESCRIPTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\((?:\[*(?:[BCDFIJSZ]|L[^;.\[()]+;))*\)(?:V|\[*(?:[BCDFIJSZ]|L[^;.\[()]+;))$")
        .expect("method descriptor pattern is valid")
});

/// A serialized closure plus what is known about it.
#[derive(Debug, Clone)]
pub struct ClosureCapsule {
    bytes: Arc<[u8]>,
    kind: CodeKind,
    declaring_symbol: String,
    input_type: Option<TypeDescriptor>,
    output_type: Option<TypeDescriptor>,
}

impl ClosureCapsule {
    /// Creates a capsule.
    ///
    /// `declaring_symbol` is the dotted name of the compiled unit that
    /// defines the closure body.
    pub fn new(kind: CodeKind, bytes: impl Into<Arc<[u8]>>, declaring_symbol: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            kind,
            declaring_symbol: declaring_symbol.into(),
            input_type: None,
            output_type: None,
        }
    }

    /// A single-argument function closure.
    pub fn function(bytes: impl Into<Arc<[u8]>>, declaring_symbol: impl Into<String>) -> Self {
        Self::new(CodeKind::Function, bytes, declaring_symbol)
    }

    /// A zero-argument supplier closure.
    pub fn supplier(bytes: impl Into<Arc<[u8]>>, declaring_symbol: impl Into<String>) -> Self {
        Self::new(CodeKind::Supplier, bytes, declaring_symbol)
    }

    /// A closure over a whole reactive stream.
    pub fn stream_processor(bytes: impl Into<Arc<[u8]>>, declaring_symbol: impl Into<String>) -> Self {
        Self::new(CodeKind::StreamProcessor, bytes, declaring_symbol)
    }

    /// Declares the input type.
    #[must_use]
    pub fn with_input_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.input_type = Some(descriptor);
        self
    }

    /// Declares the output type.
    #[must_use]
    pub fn with_output_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.output_type = Some(descriptor);
        self
    }

    /// Declares both types.
    #[must_use]
    pub fn with_types(self, input: TypeDescriptor, output: TypeDescriptor) -> Self {
        self.with_input_type(input).with_output_type(output)
    }

    /// The serialized closure.
    #[must_use]
    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    /// The closure kind.
    #[must_use]
    pub const fn kind(&self) -> CodeKind {
        self.kind
    }

    /// Dotted name of the declaring compiled unit.
    #[must_use]
    pub fn declaring_symbol(&self) -> &str {
        &self.declaring_symbol
    }

    /// The declared input type, if any.
    #[must_use]
    pub const fn declared_input_type(&self) -> Option<&TypeDescriptor> {
        self.input_type.as_ref()
    }

    /// The declared output type, if any.
    #[must_use]
    pub const fn declared_output_type(&self) -> Option<&TypeDescriptor> {
        self.output_type.as_ref()
    }
}

/// Recovers a closure's declared types.
pub trait TypeIntrospector: Send + Sync {
    /// Returns the closure's input type.
    ///
    /// # Errors
    ///
    /// Returns an error if the type cannot be determined.
    fn input_type(&self, capsule: &ClosureCapsule) -> Result<TypeDescriptor, IntrospectionError>;

    /// Returns the closure's output type.
    ///
    /// # Errors
    ///
    /// Returns an error if the type cannot be determined.
    fn output_type(&self, capsule: &ClosureCapsule) -> Result<TypeDescriptor, IntrospectionError>;
}

/// Uses the types the caller declared on the capsule.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredTypes;

impl TypeIntrospector for DeclaredTypes {
    fn input_type(&self, capsule: &ClosureCapsule) -> Result<TypeDescriptor, IntrospectionError> {
        capsule
            .declared_input_type()
            .cloned()
            .ok_or(IntrospectionError::Undeclared("input"))
    }

    fn output_type(&self, capsule: &ClosureCapsule) -> Result<TypeDescriptor, IntrospectionError> {
        capsule
            .declared_output_type()
            .cloned()
            .ok_or(IntrospectionError::Undeclared("output"))
    }
}

/// Reads the instantiated call-site signature out of a serialized lambda.
///
/// The stream must start with the serialization magic and contain a
/// `java.lang.invoke.SerializedLambda` class descriptor; anything else is
/// rejected with [`IntrospectionError::UnsupportedLayout`] before any
/// decoding happens. Among the string records that look like method
/// descriptors, the last one whose arity matches the closure kind wins:
/// the instantiated method type is written after the implementation
/// signature, and the latter also carries captured arguments.
#[derive(Debug, Clone, Default)]
pub struct SerializedLambdaIntrospector {
    symbol_path: SymbolPath,
}

impl SerializedLambdaIntrospector {
    /// Creates an introspector resolving types against `symbol_path`.
    #[must_use]
    pub const fn new(symbol_path: SymbolPath) -> Self {
        Self { symbol_path }
    }

    /// Checks that the capsule has a layout this introspector understands.
    ///
    /// # Errors
    ///
    /// Returns [`IntrospectionError::UnsupportedLayout`] describing the mismatch.
    pub fn validate_layout(bytes: &[u8]) -> Result<(), IntrospectionError> {
        if !bytes.starts_with(&STREAM_MAGIC) {
            return Err(IntrospectionError::UnsupportedLayout(
                "missing serialization stream header".to_string(),
            ));
        }
        if !bytes
            .windows(SERIALIZED_LAMBDA_CLASS.len())
            .any(|w| w == SERIALIZED_LAMBDA_CLASS)
        {
            return Err(IntrospectionError::UnsupportedLayout(
                "stream does not describe a SerializedLambda".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns every method descriptor found in string records, in stream order.
    #[must_use]
    pub fn method_descriptors(bytes: &[u8]) -> Vec<MethodDescriptor> {
        let mut found = Vec::new();
        let mut i = 0;
        while i + 3 <= bytes.len() {
            if bytes[i] != TC_STRING {
                i += 1;
                continue;
            }
            let len = usize::from(u16::from_be_bytes([bytes[i + 1], bytes[i + 2]]));
            let start = i + 3;
            let Some(body) = bytes.get(start..start + len) else {
                i += 1;
                continue;
            };
            if body.first() == Some(&b'(') {
                let text = decode_modified_utf8(body);
                if METHOD_DESCRIPTOR.is_match(&text) {
                    if let Ok(descriptor) = MethodDescriptor::parse(&text) {
                        trace!(descriptor = %descriptor, offset = i, "Found method descriptor record");
                        found.push(descriptor);
                        i = start + len;
                        continue;
                    }
                }
            }
            i += 1;
        }
        found
    }

    fn invocation_descriptor(&self, capsule: &ClosureCapsule) -> Result<MethodDescriptor, IntrospectionError> {
        Self::validate_layout(capsule.bytes())?;
        let arity = capsule.kind().invocation_arity();
        let descriptor = Self::method_descriptors(capsule.bytes())
            .into_iter()
            .rev()
            .find(|d| d.arity() == arity)
            .ok_or(IntrospectionError::NoInvocationDescriptor { arity })?;
        debug!(
            symbol = %capsule.declaring_symbol(),
            descriptor = %descriptor,
            "Recovered closure invocation descriptor"
        );
        Ok(descriptor)
    }

    fn resolve(&self, descriptor: TypeDescriptor) -> Result<TypeDescriptor, IntrospectionError> {
        let element = descriptor.element_type();
        match element.dotted_name() {
            Some(name) if !is_platform_symbol(&name) => match self.symbol_path.contains(&name) {
                Ok(true) => Ok(descriptor),
                Ok(false) => Err(IntrospectionError::UnresolvedType(name)),
                Err(err) => {
                    warn!(symbol = %name, error = %err, "Symbol path unreadable while resolving closure type");
                    Err(IntrospectionError::UnresolvedType(name))
                }
            },
            _ => Ok(descriptor),
        }
    }
}

impl TypeIntrospector for SerializedLambdaIntrospector {
    fn input_type(&self, capsule: &ClosureCapsule) -> Result<TypeDescriptor, IntrospectionError> {
        let mut descriptor = self.invocation_descriptor(capsule)?;
        if descriptor.parameters.is_empty() {
            return Err(IntrospectionError::NoInvocationDescriptor { arity: 1 });
        }
        self.resolve(descriptor.parameters.swap_remove(0))
    }

    fn output_type(&self, capsule: &ClosureCapsule) -> Result<TypeDescriptor, IntrospectionError> {
        let descriptor = self.invocation_descriptor(capsule)?;
        self.resolve(descriptor.return_type)
    }
}

/// Tries each introspector in order and returns the first success.
///
/// If every layer fails, the last layer's error is returned.
pub struct LayeredIntrospector {
    layers: Vec<Box<dyn TypeIntrospector>>,
}

impl LayeredIntrospector {
    /// Creates an introspector with no layers.
    #[must_use]
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Declared types first, then serialized-lambda recovery.
    #[must_use]
    pub fn standard(symbol_path: SymbolPath) -> Self {
        Self::new()
            .with_layer(DeclaredTypes)
            .with_layer(SerializedLambdaIntrospector::new(symbol_path))
    }

    /// Appends a layer.
    #[must_use]
    pub fn with_layer(mut self, layer: impl TypeIntrospector + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    fn first_success(
        &self,
        f: impl Fn(&dyn TypeIntrospector) -> Result<TypeDescriptor, IntrospectionError>,
    ) -> Result<TypeDescriptor, IntrospectionError> {
        let mut last_err = IntrospectionError::UnsupportedLayout("no introspectors configured".to_string());
        for layer in &self.layers {
            match f(layer.as_ref()) {
                Ok(descriptor) => return Ok(descriptor),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }
}

impl Default for LayeredIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LayeredIntrospector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredIntrospector")
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl TypeIntrospector for LayeredIntrospector {
    fn input_type(&self, capsule: &ClosureCapsule) -> Result<TypeDescriptor, IntrospectionError> {
        self.first_success(|layer| layer.input_type(capsule))
    }

    fn output_type(&self, capsule: &ClosureCapsule) -> Result<TypeDescriptor, IntrospectionError> {
        self.first_success(|layer| layer.output_type(capsule))
    }
}

/// Whether a dotted symbol lives in the platform namespace that every
/// deployment target provides.
#[must_use]
pub fn is_platform_symbol(symbol: &str) -> bool {
    symbol.starts_with("java.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::SymbolRoot;
    use crate::testing::fixtures::serialized_lambda;
    use pretty_assertions::assert_eq;

    fn integer() -> TypeDescriptor {
        TypeDescriptor::object("java.lang.Integer").unwrap()
    }

    #[test]
    fn test_declared_types() {
        let capsule = ClosureCapsule::function(vec![1], "com.acme.App").with_types(integer(), integer());
        assert_eq!(DeclaredTypes.input_type(&capsule).unwrap(), integer());
        assert_eq!(DeclaredTypes.output_type(&capsule).unwrap(), integer());

        let bare = ClosureCapsule::function(vec![1], "com.acme.App");
        assert_eq!(
            DeclaredTypes.input_type(&bare).unwrap_err(),
            IntrospectionError::Undeclared("input")
        );
    }

    #[test]
    fn test_recovers_integer_to_integer() {
        let bytes = serialized_lambda(&[
            "(Ljava/lang/Object;)Ljava/lang/Object;",
            "(Ljava/lang/Integer;)Ljava/lang/Integer;",
        ]);
        let capsule = ClosureCapsule::function(bytes, "com.acme.App");
        let introspector = SerializedLambdaIntrospector::default();

        assert_eq!(introspector.input_type(&capsule).unwrap(), integer());
        assert_eq!(introspector.output_type(&capsule).unwrap(), integer());
    }

    #[test]
    fn test_captured_arguments_are_skipped_by_arity() {
        let bytes = serialized_lambda(&[
            "(Ljava/lang/Object;)Ljava/lang/Object;",
            "(Ljava/lang/String;Ljava/lang/Long;)Ljava/lang/String;",
            "(Ljava/lang/Long;)Ljava/lang/String;",
        ]);
        let capsule = ClosureCapsule::function(bytes, "com.acme.App");
        let introspector = SerializedLambdaIntrospector::default();
        assert_eq!(introspector.input_type(&capsule).unwrap().as_str(), "Ljava/lang/Long;");
        assert_eq!(introspector.output_type(&capsule).unwrap().as_str(), "Ljava/lang/String;");
    }

    #[test]
    fn test_supplier_uses_zero_arity() {
        let bytes = serialized_lambda(&["()Ljava/lang/Object;", "()Ljava/lang/String;"]);
        let capsule = ClosureCapsule::supplier(bytes, "com.acme.App");
        let introspector = SerializedLambdaIntrospector::default();
        assert_eq!(
            introspector.output_type(&capsule).unwrap().as_str(),
            "Ljava/lang/String;"
        );
        assert_eq!(
            introspector.input_type(&capsule).unwrap_err(),
            IntrospectionError::NoInvocationDescriptor { arity: 1 }
        );
    }

    #[test]
    fn test_rejects_unknown_layout() {
        let capsule = ClosureCapsule::function(b"not a stream".to_vec(), "com.acme.App");
        let err = SerializedLambdaIntrospector::default().input_type(&capsule).unwrap_err();
        assert!(matches!(err, IntrospectionError::UnsupportedLayout(_)));

        let mut header_only = STREAM_MAGIC.to_vec();
        header_only.extend_from_slice(b"\x73\x72\x00\x03Foo");
        let capsule = ClosureCapsule::function(header_only, "com.acme.App");
        let err = SerializedLambdaIntrospector::default().input_type(&capsule).unwrap_err();
        assert!(matches!(err, IntrospectionError::UnsupportedLayout(_)));
    }

    #[test]
    fn test_user_types_must_resolve() {
        let bytes = serialized_lambda(&["(Lcom/acme/Point;)Lcom/acme/Point;"]);
        let capsule = ClosureCapsule::function(bytes, "com.acme.App");

        let empty = SerializedLambdaIntrospector::default();
        assert_eq!(
            empty.input_type(&capsule).unwrap_err(),
            IntrospectionError::UnresolvedType("com.acme.Point".to_string())
        );

        let path = SymbolPath::new().with_root(SymbolRoot::memory([("com.acme.Point", vec![0xCA])]));
        let resolving = SerializedLambdaIntrospector::new(path);
        assert_eq!(resolving.input_type(&capsule).unwrap().as_str(), "Lcom/acme/Point;");
    }

    #[test]
    fn test_layered_prefers_declared() {
        let bytes = serialized_lambda(&["(Ljava/lang/Long;)Ljava/lang/Long;"]);
        let declared = ClosureCapsule::function(bytes.clone(), "com.acme.App").with_output_type(integer());
        let layered = LayeredIntrospector::standard(SymbolPath::new());

        assert_eq!(layered.output_type(&declared).unwrap(), integer());
        assert_eq!(layered.input_type(&declared).unwrap().as_str(), "Ljava/lang/Long;");
    }

    #[test]
    fn test_layered_reports_last_error() {
        let capsule = ClosureCapsule::function(b"junk".to_vec(), "com.acme.App");
        let err = LayeredIntrospector::standard(SymbolPath::new())
            .input_type(&capsule)
            .unwrap_err();
        assert!(matches!(err, IntrospectionError::UnsupportedLayout(_)));
        assert!(LayeredIntrospector::new().input_type(&capsule).is_err());
    }
}
