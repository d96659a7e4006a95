//! Glue class generation.
//!
//! Templates ship an abstract driver that deserializes the closure and
//! holds it in a field. The glue class is the concrete subclass the
//! platform instantiates; its only job is to type the dispatch method so
//! the platform routes payloads of the right type to it.

use serde::{Deserialize, Serialize};

use crate::classfile::{access, opcodes, Bytecode, ClassWriter, MethodDescriptor, TypeDescriptor};
use crate::errors::PackagingError;
use crate::introspect::CAPSULE_RESOURCE_NAME;

const HANDLE_INVOKE_DESCRIPTOR: &str = "(Ljava/lang/Object;)Ljava/lang/Object;";

/// Produces the bytes for a template's customization slot.
pub trait GlueGenerator: Send + Sync {
    /// Archive entry name replaced by the generated bytes.
    fn slot(&self) -> &str;

    /// Generates the replacement entry.
    ///
    /// # Errors
    ///
    /// Returns [`PackagingError::Glue`] if the entry cannot be produced.
    fn generate(&self) -> Result<Vec<u8>, PackagingError>;
}

fn default_glue_class() -> String {
    "org/springframework/xd/code/Code".to_string()
}

fn default_driver_class() -> String {
    "org/springframework/xd/code/CodeDrivenProcessor".to_string()
}

fn default_handle_field() -> String {
    "fn".to_string()
}

fn default_handle_interface() -> String {
    "java/util/function/Function".to_string()
}

fn default_invoke_method() -> String {
    "apply".to_string()
}

fn default_dispatch_method() -> String {
    "transform".to_string()
}

fn default_true() -> bool {
    true
}

/// Names inside a template that the glue class has to line up with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverLayout {
    /// Internal name of the glue class; its entry is the customization slot.
    #[serde(default = "default_glue_class")]
    pub glue_class: String,

    /// Internal name of the abstract driver the glue class extends.
    #[serde(default = "default_driver_class")]
    pub driver_class: String,

    /// Driver field holding the deserialized closure.
    #[serde(default = "default_handle_field")]
    pub handle_field: String,

    /// Interface type of the handle field.
    #[serde(default = "default_handle_interface")]
    pub handle_interface: String,

    /// Interface method invoked on the handle.
    #[serde(default = "default_invoke_method")]
    pub invoke_method: String,

    /// Name of the generated dispatch method.
    #[serde(default = "default_dispatch_method")]
    pub dispatch_method: String,

    /// Whether the driver constructor takes the capsule resource name.
    #[serde(default = "default_true")]
    pub constructor_takes_resource: bool,
}

impl Default for DriverLayout {
    fn default() -> Self {
        Self {
            glue_class: default_glue_class(),
            driver_class: default_driver_class(),
            handle_field: default_handle_field(),
            handle_interface: default_handle_interface(),
            invoke_method: default_invoke_method(),
            dispatch_method: default_dispatch_method(),
            constructor_takes_resource: true,
        }
    }
}

impl DriverLayout {
    /// Archive entry name of the glue class.
    #[must_use]
    pub fn slot(&self) -> String {
        format!("{}.class", self.glue_class)
    }

    fn handle_descriptor(&self) -> String {
        format!("L{};", self.handle_interface)
    }
}

/// Generates a driver subclass with a typed dispatch method.
///
/// The dispatch method loads the closure handle, invokes it with the
/// argument and narrows the result to the output type. When the output
/// type is unknown (or `Object`) the narrowing cast is left out and the
/// method is unchecked.
#[derive(Debug, Clone)]
pub struct DispatchGlue {
    layout: DriverLayout,
    slot: String,
    input: Option<TypeDescriptor>,
    output: Option<TypeDescriptor>,
    capsule_resource: String,
}

impl DispatchGlue {
    /// Creates glue for the given layout and types.
    #[must_use]
    pub fn new(layout: DriverLayout, input: Option<TypeDescriptor>, output: Option<TypeDescriptor>) -> Self {
        let slot = layout.slot();
        Self {
            layout,
            slot,
            input,
            output,
            capsule_resource: CAPSULE_RESOURCE_NAME.to_string(),
        }
    }

    /// Overrides the capsule resource name handed to the driver.
    #[must_use]
    pub fn with_capsule_resource(mut self, name: impl Into<String>) -> Self {
        self.capsule_resource = name.into();
        self
    }

    /// The signature of the generated dispatch method.
    #[must_use]
    pub fn dispatch_descriptor(&self) -> MethodDescriptor {
        let boxed_or_object = |t: &Option<TypeDescriptor>| {
            t.as_ref()
                .map_or_else(TypeDescriptor::java_object, TypeDescriptor::boxed)
        };
        MethodDescriptor::new(vec![boxed_or_object(&self.input)], boxed_or_object(&self.output))
    }
}

impl GlueGenerator for DispatchGlue {
    fn slot(&self) -> &str {
        &self.slot
    }

    fn generate(&self) -> Result<Vec<u8>, PackagingError> {
        let layout = &self.layout;
        let dispatch = self.dispatch_descriptor();
        let cast_target = if dispatch.return_type.is_java_object() {
            None
        } else {
            Some(
                dispatch
                    .return_type
                    .class_entry_name()
                    .ok_or_else(|| PackagingError::Glue(format!("cannot narrow to {}", dispatch.return_type)))?
                    .to_string(),
            )
        };

        let mut writer = ClassWriter::new(
            access::PUBLIC | access::SUPER,
            &layout.glue_class,
            &layout.driver_class,
        );

        let mut init = Bytecode::new(2, 1);
        init.op(opcodes::ALOAD_0);
        if layout.constructor_takes_resource {
            let resource = writer.pool().string(&self.capsule_resource);
            let super_init = writer
                .pool()
                .method_ref(&layout.driver_class, "<init>", "(Ljava/lang/String;)V");
            init.ldc(resource).op_u16(opcodes::INVOKESPECIAL, super_init);
        } else {
            let super_init = writer.pool().method_ref(&layout.driver_class, "<init>", "()V");
            init.op_u16(opcodes::INVOKESPECIAL, super_init);
        }
        init.op(opcodes::RETURN);
        writer.add_method(access::PUBLIC, "<init>", "()V", Some(init));

        let handle = writer.pool().field_ref(
            &layout.driver_class,
            &layout.handle_field,
            &layout.handle_descriptor(),
        );
        let invoke = writer.pool().interface_method_ref(
            &layout.handle_interface,
            &layout.invoke_method,
            HANDLE_INVOKE_DESCRIPTOR,
        );
        let mut body = Bytecode::new(2, 2);
        body.op(opcodes::ALOAD_0)
            .op_u16(opcodes::GETFIELD, handle)
            .op(opcodes::ALOAD_1)
            .invokeinterface(invoke, 1);
        if let Some(target) = cast_target {
            let class = writer.pool().class(&target);
            body.op_u16(opcodes::CHECKCAST, class);
        }
        body.op(opcodes::ARETURN);
        writer.add_method(
            access::PUBLIC,
            &layout.dispatch_method,
            &dispatch.to_string(),
            Some(body),
        );

        writer
            .to_bytes()
            .map_err(|err| PackagingError::Glue(format!("cannot write {}: {err}", layout.glue_class)))
    }
}
