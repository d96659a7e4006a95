//! JVM class file codec.
//!
//! The packaging path needs three things from compiled units: reading the
//! call sites out of a class (for dependency discovery), writing a small
//! glue class (for archive customization), and parsing type descriptors
//! (for introspection). This module provides exactly those.

mod descriptor;
mod reader;
mod writer;

pub use descriptor::{MethodDescriptor, TypeDescriptor};
pub use reader::{
    decode_modified_utf8, ClassFile, CodeBody, Constant, ConstantPool, DynamicIndices,
    Instruction, Instructions, MemberRef, MemberRefIndices, MethodInfo,
};
pub use writer::{encode_modified_utf8, Bytecode, ClassWriter, PoolBuilder, CLASS_VERSION};

/// Converts a dotted symbol name to the archive path of its compiled unit.
///
/// `com.acme.Helper` becomes `com/acme/Helper.class`.
#[must_use]
pub fn symbol_to_entry_name(symbol: &str) -> String {
    format!("{}.class", symbol.replace('.', "/"))
}

/// Converts an internal name (`com/acme/Helper`) to a dotted symbol name.
#[must_use]
pub fn internal_to_dotted(internal: &str) -> String {
    internal.replace('/', ".")
}

/// Opcodes used by the scanner, the glue generator and tests.
#[allow(missing_docs)]
pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_1: u8 = 0x04;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const ALOAD_0: u8 = 0x2A;
    pub const ALOAD_1: u8 = 0x2B;
    pub const POP: u8 = 0x57;
    pub const IINC: u8 = 0x84;
    pub const TABLESWITCH: u8 = 0xAA;
    pub const LOOKUPSWITCH: u8 = 0xAB;
    pub const IRETURN: u8 = 0xAC;
    pub const ARETURN: u8 = 0xB0;
    pub const RETURN: u8 = 0xB1;
    pub const GETSTATIC: u8 = 0xB2;
    pub const PUTSTATIC: u8 = 0xB3;
    pub const GETFIELD: u8 = 0xB4;
    pub const PUTFIELD: u8 = 0xB5;
    pub const INVOKEVIRTUAL: u8 = 0xB6;
    pub const INVOKESPECIAL: u8 = 0xB7;
    pub const INVOKESTATIC: u8 = 0xB8;
    pub const INVOKEINTERFACE: u8 = 0xB9;
    pub const INVOKEDYNAMIC: u8 = 0xBA;
    pub const NEW: u8 = 0xBB;
    pub const ANEWARRAY: u8 = 0xBD;
    pub const CHECKCAST: u8 = 0xC0;
    pub const INSTANCEOF: u8 = 0xC1;
    pub const WIDE: u8 = 0xC4;
}

/// Access flags.
#[allow(missing_docs)]
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;
}
