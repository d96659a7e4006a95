//! Archive, compiled unit and serialized closure fixtures.

use std::io::{Cursor, Write};

use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::classfile::{access, opcodes, Bytecode, ClassWriter};

/// Glue slot of the function processor template.
pub const DEFAULT_SLOT: &str = "org/springframework/xd/code/Code.class";

/// Driver entry shipped in the function processor template.
pub const DRIVER_ENTRY: &str = "org/springframework/xd/code/CodeDrivenProcessor.class";

/// Builds template archives in memory.
#[derive(Debug, Clone, Default)]
pub struct TemplateBuilder {
    entries: Vec<(String, Vec<u8>, CompressionMethod)>,
}

impl TemplateBuilder {
    /// Creates an empty archive builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A template shaped like the function processor module.
    #[must_use]
    pub fn lambda_processor() -> Self {
        Self::new()
            .entry("META-INF/MANIFEST.MF", "Manifest-Version: 1.0\r\n\r\n")
            .entry("config/module.properties", "info.description=Lambda processor\n")
            .entry(
                DRIVER_ENTRY,
                placeholder_class("org/springframework/xd/code/CodeDrivenProcessor", "java/lang/Object"),
            )
            .entry(
                DEFAULT_SLOT,
                placeholder_class(
                    "org/springframework/xd/code/Code",
                    "org/springframework/xd/code/CodeDrivenProcessor",
                ),
            )
            .stored_entry("lib/spring-xd-tuple.jar", [0x50, 0x4B, 0x05, 0x06].repeat(8))
    }

    /// Adds a deflated entry.
    #[must_use]
    pub fn entry(mut self, name: impl Into<String>, data: impl AsRef<[u8]>) -> Self {
        self.entries
            .push((name.into(), data.as_ref().to_vec(), CompressionMethod::Deflated));
        self
    }

    /// Adds an uncompressed entry.
    #[must_use]
    pub fn stored_entry(mut self, name: impl Into<String>, data: impl AsRef<[u8]>) -> Self {
        self.entries
            .push((name.into(), data.as_ref().to_vec(), CompressionMethod::Stored));
        self
    }

    /// Writes the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be written.
    pub fn try_build(&self) -> ZipResult<Vec<u8>> {
        let mut out = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, method) in &self.entries {
            out.start_file(name.as_str(), SimpleFileOptions::default().compression_method(*method))?;
            out.write_all(data)?;
        }
        Ok(out.finish()?.into_inner())
    }

    /// Writes the archive, panicking on failure.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn build(&self) -> Vec<u8> {
        self.try_build().expect("in-memory archive should be writable")
    }
}

/// A class with only a constructor.
#[must_use]
#[allow(clippy::expect_used)]
pub fn placeholder_class(internal_name: &str, super_class: &str) -> Vec<u8> {
    let mut writer = ClassWriter::new(access::PUBLIC | access::SUPER, internal_name, super_class);
    let super_init = writer.pool().method_ref(super_class, "<init>", "()V");
    let mut init = Bytecode::new(1, 1);
    init.op(opcodes::ALOAD_0)
        .op_u16(opcodes::INVOKESPECIAL, super_init)
        .op(opcodes::RETURN);
    writer.add_method(access::PUBLIC, "<init>", "()V", Some(init));
    writer.to_bytes().expect("fixture class should fit the class file limits")
}

/// A class whose single static method calls each `(owner, name, descriptor)`
/// in order. Owners are internal names.
#[must_use]
#[allow(clippy::expect_used)]
pub fn calling_class(internal_name: &str, calls: &[(&str, &str, &str)]) -> Vec<u8> {
    let mut writer = ClassWriter::new(access::PUBLIC | access::SUPER, internal_name, "java/lang/Object");
    let mut body = Bytecode::new(4, 1);
    for (owner, name, descriptor) in calls {
        let target = writer.pool().method_ref(owner, name, descriptor);
        body.op_u16(opcodes::INVOKESTATIC, target);
    }
    body.op(opcodes::RETURN);
    writer.add_method(access::PUBLIC | access::STATIC, "lambda$main$0", "()V", Some(body));
    writer.to_bytes().expect("fixture class should fit the class file limits")
}

/// A class header whose full-size constant pool ends with a long in the
/// last slot, leaving no room for the long's second slot.
#[must_use]
pub fn overflowing_wide_pool() -> Vec<u8> {
    let mut bytes = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 50, 0xFF, 0xFF];
    for _ in 1..0xFFFE_u32 {
        bytes.extend_from_slice(&[3, 0, 0, 0, 7]);
    }
    bytes.push(5);
    bytes.extend_from_slice(&42_i64.to_be_bytes());
    bytes
}

/// A serialization stream shaped like a serialized lambda whose string
/// records include `descriptors`, in order.
#[must_use]
pub fn serialized_lambda(descriptors: &[&str]) -> Vec<u8> {
    let mut out = vec![0xAC, 0xED, 0x00, 0x05];
    // TC_OBJECT, TC_CLASSDESC
    out.extend_from_slice(&[0x73, 0x72]);
    push_utf(&mut out, "java.lang.invoke.SerializedLambda");
    out.extend_from_slice(&[0x6F, 0x61, 0xD0, 0x94, 0x2C, 0x29, 0x36, 0x85]);
    // SC_SERIALIZABLE, no fields listed, TC_ENDBLOCKDATA, TC_NULL
    out.extend_from_slice(&[0x02, 0x00, 0x00, 0x78, 0x70]);

    let leading = [
        "com/acme/App",
        "java/util/function/Function",
        "apply",
        "lambda$main$0",
    ];
    for text in leading.iter().chain(descriptors) {
        out.push(0x74);
        push_utf(&mut out, text);
    }
    out
}

fn push_utf(out: &mut Vec<u8>, text: &str) {
    let bytes = text.as_bytes();
    out.extend_from_slice(&u16::try_from(bytes.len()).unwrap_or(u16::MAX).to_be_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::list_entries;
    use crate::classfile::ClassFile;

    #[test]
    fn test_lambda_processor_layout() {
        let bytes = TemplateBuilder::lambda_processor().build();
        let names = list_entries(&bytes).unwrap();
        assert!(names.iter().any(|n| n == DEFAULT_SLOT));
        assert!(names.iter().any(|n| n == DRIVER_ENTRY));
    }

    #[test]
    fn test_calling_class_parses() {
        let bytes = calling_class("com/acme/App", &[("com/acme/Helper", "twice", "(I)I")]);
        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.this_class, "com/acme/App");
    }
}
