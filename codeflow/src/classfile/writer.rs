//! Minimal class file emission.
//!
//! Produces version 50 class files. Straight-line method bodies need no
//! stack map frames at that version, which is all glue generation and the
//! test fixtures require.

use std::collections::HashMap;

use super::opcodes;
use crate::errors::ClassFileError;

/// Major version written by [`ClassWriter`].
pub const CLASS_VERSION: u16 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolKey {
    Utf8(String),
    Class(u16),
    String(u16),
    Integer(i32),
    NameAndType(u16, u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
}

/// A deduplicating constant pool under construction.
///
/// Entries that cannot be encoded are not written. The first such failure
/// is kept and reported when the class is serialized.
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    bytes: Vec<u8>,
    next_index: u16,
    indices: HashMap<PoolKey, u16>,
    failure: Option<ClassFileError>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self {
            bytes: Vec::new(),
            next_index: 1,
            indices: HashMap::new(),
            failure: None,
        }
    }
}

impl PoolBuilder {
    fn intern(&mut self, key: PoolKey, encode: impl FnOnce(&mut Vec<u8>)) -> u16 {
        if let Some(&index) = self.indices.get(&key) {
            return index;
        }
        let index = self.next_index;
        if index == u16::MAX {
            self.fail(ClassFileError::Oversized {
                what: "constant pool",
                len: usize::from(u16::MAX),
                max: usize::from(u16::MAX - 1),
            });
            return 0;
        }
        encode(&mut self.bytes);
        self.next_index += 1;
        self.indices.insert(key, index);
        index
    }

    fn fail(&mut self, err: ClassFileError) {
        self.failure.get_or_insert(err);
    }

    /// Interns a `CONSTANT_Utf8`.
    ///
    /// A value whose encoding exceeds 65535 bytes is not written and makes
    /// [`ClassWriter::to_bytes`] fail.
    pub fn utf8(&mut self, value: &str) -> u16 {
        let encoded = encode_modified_utf8(value);
        let Ok(len) = u16::try_from(encoded.len()) else {
            self.fail(ClassFileError::Oversized {
                what: "utf8 constant",
                len: encoded.len(),
                max: usize::from(u16::MAX),
            });
            return 0;
        };
        self.intern(PoolKey::Utf8(value.to_string()), |out| {
            out.push(1);
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&encoded);
        })
    }

    /// Interns a `CONSTANT_Class` for an internal name.
    pub fn class(&mut self, internal_name: &str) -> u16 {
        let name = self.utf8(internal_name);
        self.intern(PoolKey::Class(name), |out| {
            out.push(7);
            out.extend_from_slice(&name.to_be_bytes());
        })
    }

    /// Interns a `CONSTANT_String`.
    pub fn string(&mut self, value: &str) -> u16 {
        let utf8 = self.utf8(value);
        self.intern(PoolKey::String(utf8), |out| {
            out.push(8);
            out.extend_from_slice(&utf8.to_be_bytes());
        })
    }

    /// Interns a `CONSTANT_Integer`.
    pub fn integer(&mut self, value: i32) -> u16 {
        self.intern(PoolKey::Integer(value), |out| {
            out.push(3);
            out.extend_from_slice(&value.to_be_bytes());
        })
    }

    /// Interns a `CONSTANT_NameAndType`.
    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.intern(PoolKey::NameAndType(name, descriptor), |out| {
            out.push(12);
            out.extend_from_slice(&name.to_be_bytes());
            out.extend_from_slice(&descriptor.to_be_bytes());
        })
    }

    /// Interns a `CONSTANT_Fieldref`.
    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let (class, nat) = self.member(owner, name, descriptor);
        self.intern(PoolKey::FieldRef(class, nat), |out| encode_member(out, 9, class, nat))
    }

    /// Interns a `CONSTANT_Methodref`.
    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let (class, nat) = self.member(owner, name, descriptor);
        self.intern(PoolKey::MethodRef(class, nat), |out| encode_member(out, 10, class, nat))
    }

    /// Interns a `CONSTANT_InterfaceMethodref`.
    pub fn interface_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let (class, nat) = self.member(owner, name, descriptor);
        self.intern(PoolKey::InterfaceMethodRef(class, nat), |out| {
            encode_member(out, 11, class, nat);
        })
    }

    fn member(&mut self, owner: &str, name: &str, descriptor: &str) -> (u16, u16) {
        (self.class(owner), self.name_and_type(name, descriptor))
    }
}

fn encode_member(out: &mut Vec<u8>, tag: u8, class: u16, nat: u16) {
    out.push(tag);
    out.extend_from_slice(&class.to_be_bytes());
    out.extend_from_slice(&nat.to_be_bytes());
}

/// Encodes a string as modified UTF-8.
#[must_use]
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) as u8 & 0x1F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) as u8 & 0x0F));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
        }
    }
    out
}

/// A method body under construction.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
}

impl Bytecode {
    /// Creates an empty body with the given frame limits.
    #[must_use]
    pub const fn new(max_stack: u16, max_locals: u16) -> Self {
        Self {
            max_stack,
            max_locals,
            code: Vec::new(),
        }
    }

    /// Emits an opcode without operands.
    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.code.push(opcode);
        self
    }

    /// Emits an opcode with a one-byte operand.
    pub fn op_u8(&mut self, opcode: u8, operand: u8) -> &mut Self {
        self.code.push(opcode);
        self.code.push(operand);
        self
    }

    /// Emits an opcode with a two-byte operand.
    pub fn op_u16(&mut self, opcode: u8, operand: u16) -> &mut Self {
        self.code.push(opcode);
        self.code.extend_from_slice(&operand.to_be_bytes());
        self
    }

    /// Emits `ldc` or `ldc_w` depending on the index width.
    pub fn ldc(&mut self, index: u16) -> &mut Self {
        match u8::try_from(index) {
            Ok(narrow) => self.op_u8(opcodes::LDC, narrow),
            Err(_) => self.op_u16(opcodes::LDC_W, index),
        }
    }

    /// Emits `invokeinterface` with its argument slot count.
    pub fn invokeinterface(&mut self, index: u16, arg_slots: u8) -> &mut Self {
        self.op_u16(opcodes::INVOKEINTERFACE, index);
        self.code.push(arg_slots + 1);
        self.code.push(0);
        self
    }

    /// The emitted bytecode.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }
}

#[derive(Debug, Clone)]
struct MethodEntry {
    access: u16,
    name: u16,
    descriptor: u16,
    code: Option<Bytecode>,
}

/// Writes a class file.
#[derive(Debug, Clone)]
pub struct ClassWriter {
    pool: PoolBuilder,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<(u16, u16, u16)>,
    methods: Vec<MethodEntry>,
}

impl ClassWriter {
    /// Starts a class with the given internal name and superclass.
    #[must_use]
    pub fn new(access: u16, this_class: &str, super_class: &str) -> Self {
        let mut pool = PoolBuilder::default();
        let this_class = pool.class(this_class);
        let super_class = pool.class(super_class);
        Self {
            pool,
            access,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Mutable access to the constant pool, for building operands.
    pub fn pool(&mut self) -> &mut PoolBuilder {
        &mut self.pool
    }

    /// Declares an implemented interface.
    pub fn add_interface(&mut self, internal_name: &str) -> &mut Self {
        let index = self.pool.class(internal_name);
        self.interfaces.push(index);
        self
    }

    /// Declares a field.
    pub fn add_field(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.fields.push((access, name, descriptor));
        self
    }

    /// Declares a method. `None` declares an abstract or native method.
    pub fn add_method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Option<Bytecode>,
    ) -> &mut Self {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.methods.push(MethodEntry {
            access,
            name,
            descriptor,
            code,
        });
        self
    }

    /// Serializes the class.
    ///
    /// # Errors
    ///
    /// Returns [`ClassFileError::Oversized`] if a constant, count or method
    /// body does not fit its field.
    pub fn to_bytes(mut self) -> Result<Vec<u8>, ClassFileError> {
        let code_attr = if self.methods.iter().any(|m| m.code.is_some()) {
            self.pool.utf8("Code")
        } else {
            0
        };
        if let Some(err) = self.pool.failure.take() {
            return Err(err);
        }

        let mut out = Vec::with_capacity(256 + self.pool.bytes.len());
        out.extend_from_slice(&0xCAFE_BABE_u32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&CLASS_VERSION.to_be_bytes());
        out.extend_from_slice(&self.pool.next_index.to_be_bytes());
        out.extend_from_slice(&self.pool.bytes);

        put_u16(&mut out, self.access);
        put_u16(&mut out, self.this_class);
        put_u16(&mut out, self.super_class);

        put_len(&mut out, "interface count", self.interfaces.len())?;
        for index in &self.interfaces {
            put_u16(&mut out, *index);
        }

        put_len(&mut out, "field count", self.fields.len())?;
        for (access, name, descriptor) in &self.fields {
            put_u16(&mut out, *access);
            put_u16(&mut out, *name);
            put_u16(&mut out, *descriptor);
            put_u16(&mut out, 0);
        }

        put_len(&mut out, "method count", self.methods.len())?;
        for method in &self.methods {
            put_u16(&mut out, method.access);
            put_u16(&mut out, method.name);
            put_u16(&mut out, method.descriptor);
            match &method.code {
                Some(body) => {
                    put_u16(&mut out, 1);
                    put_u16(&mut out, code_attr);
                    // code_length must be below 65536
                    let code_len = u16::try_from(body.code.len()).map_err(|_| ClassFileError::Oversized {
                        what: "method body",
                        len: body.code.len(),
                        max: usize::from(u16::MAX),
                    })?;
                    out.extend_from_slice(&(12 + u32::from(code_len)).to_be_bytes());
                    put_u16(&mut out, body.max_stack);
                    put_u16(&mut out, body.max_locals);
                    out.extend_from_slice(&u32::from(code_len).to_be_bytes());
                    out.extend_from_slice(&body.code);
                    put_u16(&mut out, 0);
                    put_u16(&mut out, 0);
                }
                None => put_u16(&mut out, 0),
            }
        }

        put_u16(&mut out, 0);
        Ok(out)
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_len(out: &mut Vec<u8>, what: &'static str, len: usize) -> Result<(), ClassFileError> {
    let value = u16::try_from(len).map_err(|_| ClassFileError::Oversized {
        what,
        len,
        max: usize::from(u16::MAX),
    })?;
    put_u16(out, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{access, decode_modified_utf8, ClassFile, Constant};

    #[test]
    fn test_pool_deduplicates() {
        let mut pool = PoolBuilder::default();
        let a = pool.method_ref("com/acme/A", "run", "()V");
        let b = pool.method_ref("com/acme/A", "run", "()V");
        let c = pool.interface_method_ref("com/acme/A", "run", "()V");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.class("com/acme/A"), pool.class("com/acme/A"));
    }

    #[test]
    fn test_oversized_utf8_is_an_error() {
        let mut writer = ClassWriter::new(access::PUBLIC | access::SUPER, "com/acme/Big", "java/lang/Object");
        writer.pool().string(&"x".repeat(70_000));
        writer.pool().string("after");
        assert_eq!(
            writer.to_bytes(),
            Err(ClassFileError::Oversized {
                what: "utf8 constant",
                len: 70_000,
                max: 65_535,
            })
        );
    }

    #[test]
    fn test_oversized_method_body_is_an_error() {
        let mut writer = ClassWriter::new(access::PUBLIC | access::SUPER, "com/acme/Big", "java/lang/Object");
        let mut body = Bytecode::new(1, 1);
        for _ in 0..70_000 {
            body.op(opcodes::NOP);
        }
        writer.add_method(access::PUBLIC, "run", "()V", Some(body));
        assert!(matches!(
            writer.to_bytes(),
            Err(ClassFileError::Oversized { what: "method body", .. })
        ));
    }

    #[test]
    fn test_written_class_parses() {
        let mut writer = ClassWriter::new(access::PUBLIC | access::SUPER, "com/acme/Glue", "com/acme/Driver");
        writer.add_interface("java/io/Serializable");
        writer.add_field(access::PRIVATE, "count", "I");
        let text = writer.pool().string("hello");
        let mut body = Bytecode::new(1, 1);
        body.ldc(text).op(opcodes::ARETURN);
        writer.add_method(access::PUBLIC, "greet", "()Ljava/lang/String;", Some(body));
        writer.add_method(access::PUBLIC | access::ABSTRACT, "later", "()V", None);

        let class = ClassFile::parse(&writer.to_bytes().unwrap()).unwrap();
        assert_eq!(class.this_class, "com/acme/Glue");
        assert_eq!(class.super_class.as_deref(), Some("com/acme/Driver"));
        assert_eq!(class.interfaces, vec!["java/io/Serializable".to_string()]);
        assert_eq!(class.field_count, 1);
        assert_eq!(class.methods.len(), 2);
        assert!(class.method("later", "()V").unwrap().code.is_none());

        let greet = class.method("greet", "()Ljava/lang/String;").unwrap();
        let code = greet.code.as_ref().unwrap();
        assert_eq!(code.bytecode[0], opcodes::LDC);
        let Constant::String { string_index } = class.constant_pool.get(u16::from(code.bytecode[1])).unwrap() else {
            panic!("expected string constant");
        };
        assert_eq!(class.constant_pool.utf8(*string_index).unwrap(), "hello");
    }

    #[test]
    fn test_invokeinterface_encoding() {
        let mut body = Bytecode::new(2, 2);
        body.invokeinterface(0x0102, 1);
        assert_eq!(body.code(), &[opcodes::INVOKEINTERFACE, 0x01, 0x02, 2, 0]);
    }

    #[test]
    fn test_modified_utf8_roundtrip() {
        for s in ["plain", "nul\0byte", "caf\u{e9}", "emoji \u{1F600}"] {
            assert_eq!(decode_modified_utf8(&encode_modified_utf8(s)), s);
        }
        assert_eq!(encode_modified_utf8("\0"), vec![0xC0, 0x80]);
    }
}
