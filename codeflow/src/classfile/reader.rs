//! Class file decoding.
//!
//! Only the parts needed by the scanner and the tests are materialized:
//! the constant pool, the class header, and method bodies. Field and
//! attribute contents are skipped. Every read is bounds-checked.

use crate::errors::ClassFileError;

use super::opcodes;

const MAGIC: u32 = 0xCAFE_BABE;

/// One constant pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Placeholder for index 0 and the second slot of long/double entries.
    Unusable,
    /// `CONSTANT_Utf8`, decoded from modified UTF-8.
    Utf8(String),
    /// `CONSTANT_Integer`.
    Integer(i32),
    /// `CONSTANT_Float`, as raw IEEE bits.
    Float(u32),
    /// `CONSTANT_Long`.
    Long(i64),
    /// `CONSTANT_Double`, as raw IEEE bits.
    Double(u64),
    /// `CONSTANT_Class`.
    Class {
        /// Index of the internal name.
        name_index: u16,
    },
    /// `CONSTANT_String`.
    String {
        /// Index of the string contents.
        string_index: u16,
    },
    /// `CONSTANT_Fieldref`.
    FieldRef(MemberRefIndices),
    /// `CONSTANT_Methodref`.
    MethodRef(MemberRefIndices),
    /// `CONSTANT_InterfaceMethodref`.
    InterfaceMethodRef(MemberRefIndices),
    /// `CONSTANT_NameAndType`.
    NameAndType {
        /// Index of the member name.
        name_index: u16,
        /// Index of the member descriptor.
        descriptor_index: u16,
    },
    /// `CONSTANT_MethodHandle`.
    MethodHandle {
        /// Reference kind (1..=9).
        reference_kind: u8,
        /// Index of the referenced member.
        reference_index: u16,
    },
    /// `CONSTANT_MethodType`.
    MethodType {
        /// Index of the method descriptor.
        descriptor_index: u16,
    },
    /// `CONSTANT_Dynamic`.
    Dynamic(DynamicIndices),
    /// `CONSTANT_InvokeDynamic`.
    InvokeDynamic(DynamicIndices),
    /// `CONSTANT_Module`.
    Module {
        /// Index of the module name.
        name_index: u16,
    },
    /// `CONSTANT_Package`.
    Package {
        /// Index of the package name.
        name_index: u16,
    },
}

/// Indices shared by field, method and interface method references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRefIndices {
    /// Index of the owning `CONSTANT_Class`.
    pub class_index: u16,
    /// Index of the `CONSTANT_NameAndType`.
    pub name_and_type_index: u16,
}

/// Indices shared by dynamic constants and invokedynamic call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicIndices {
    /// Index into the bootstrap methods attribute.
    pub bootstrap_method_attr_index: u16,
    /// Index of the `CONSTANT_NameAndType`.
    pub name_and_type_index: u16,
}

/// A resolved member reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// Internal name of the owner (`com/acme/Helper`).
    pub owner: &'a str,
    /// Member name.
    pub name: &'a str,
    /// Member descriptor.
    pub descriptor: &'a str,
}

/// The decoded constant pool, indexed from 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// Number of slots including the unusable slot 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool has no usable entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range or names an unusable slot.
    pub fn get(&self, index: u16) -> Result<&Constant, ClassFileError> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Unusable) | None => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "constant",
            }),
            Some(entry) => Ok(entry),
        }
    }

    /// Returns the UTF-8 entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is missing or not `CONSTANT_Utf8`.
    pub fn utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Utf8(value)) => Ok(value),
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Returns the internal name of the class entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is missing or not `CONSTANT_Class`.
    pub fn class_name(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Class { name_index }) => self.utf8(*name_index),
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "Class",
            }),
        }
    }

    /// Resolves a field, method or interface method reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry or any entry it points at is malformed.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ClassFileError> {
        let indices = match self.entries.get(usize::from(index)) {
            Some(
                Constant::FieldRef(indices)
                | Constant::MethodRef(indices)
                | Constant::InterfaceMethodRef(indices),
            ) => *indices,
            _ => {
                return Err(ClassFileError::BadConstantIndex {
                    index,
                    expected: "member reference",
                })
            }
        };
        let owner = self.class_name(indices.class_index)?;
        let (name, descriptor) = self.name_and_type(indices.name_and_type_index)?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
        })
    }

    /// Resolves a name-and-type entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is missing or malformed.
    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFileError> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::NameAndType {
                name_index,
                descriptor_index,
            }) => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ClassFileError::BadConstantIndex {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Iterates over all usable entries with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .filter_map(|(i, c)| u16::try_from(i).ok().map(|i| (i, c)))
    }
}

/// A method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBody {
    /// Maximum operand stack depth.
    pub max_stack: u16,
    /// Number of local variable slots.
    pub max_locals: u16,
    /// Raw bytecode.
    pub bytecode: Vec<u8>,
}

/// A method declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Access flags.
    pub access_flags: u16,
    /// Method name.
    pub name: String,
    /// Method descriptor.
    pub descriptor: String,
    /// The `Code` attribute, absent for abstract and native methods.
    pub code: Option<CodeBody>,
}

impl MethodInfo {
    /// Iterates over the instructions of this method body.
    #[must_use]
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions::new(self.code.as_ref().map_or(&[][..], |c| &c.bytecode))
    }
}

/// A decoded class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    /// Minor version.
    pub minor_version: u16,
    /// Major version.
    pub major_version: u16,
    /// The constant pool.
    pub constant_pool: ConstantPool,
    /// Class access flags.
    pub access_flags: u16,
    /// Internal name of this class.
    pub this_class: String,
    /// Internal name of the superclass (`None` only for `java/lang/Object`).
    pub super_class: Option<String>,
    /// Internal names of implemented interfaces.
    pub interfaces: Vec<String>,
    /// Number of declared fields.
    pub field_count: usize,
    /// Declared methods.
    pub methods: Vec<MethodInfo>,
}

impl ClassFile {
    /// Decodes a class file.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are truncated or structurally invalid.
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = ByteReader::new(bytes);

        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        let constant_pool = read_constant_pool(&mut r)?;

        let access_flags = r.u16()?;
        let this_class = constant_pool.class_name(r.u16()?)?.to_string();
        let super_index = r.u16()?;
        let super_class = if super_index == 0 {
            None
        } else {
            Some(constant_pool.class_name(super_index)?.to_string())
        };

        let interface_count = r.u16()?;
        let mut interfaces = Vec::with_capacity(usize::from(interface_count));
        for _ in 0..interface_count {
            interfaces.push(constant_pool.class_name(r.u16()?)?.to_string());
        }

        let field_count = usize::from(r.u16()?);
        for _ in 0..field_count {
            r.skip(6)?;
            skip_attributes(&mut r)?;
        }

        let method_count = r.u16()?;
        let mut methods = Vec::with_capacity(usize::from(method_count));
        for _ in 0..method_count {
            methods.push(read_method(&mut r, &constant_pool)?);
        }

        skip_attributes(&mut r)?;

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            field_count,
            methods,
        })
    }

    /// Finds a method by name and descriptor.
    #[must_use]
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }
}

fn read_constant_pool(r: &mut ByteReader<'_>) -> Result<ConstantPool, ClassFileError> {
    let count = r.u16()?;
    let mut entries = Vec::with_capacity(usize::from(count));
    entries.push(Constant::Unusable);

    let mut index: u16 = 1;
    while index < count {
        let tag = r.u8()?;
        let entry = match tag {
            1 => {
                let len = usize::from(r.u16()?);
                Constant::Utf8(decode_modified_utf8(r.take(len)?))
            }
            3 => Constant::Integer(r.i32()?),
            4 => Constant::Float(r.u32()?),
            5 => Constant::Long(r.i64()?),
            6 => Constant::Double(r.u64()?),
            7 => Constant::Class {
                name_index: r.u16()?,
            },
            8 => Constant::String {
                string_index: r.u16()?,
            },
            9 => Constant::FieldRef(read_member_indices(r)?),
            10 => Constant::MethodRef(read_member_indices(r)?),
            11 => Constant::InterfaceMethodRef(read_member_indices(r)?),
            12 => Constant::NameAndType {
                name_index: r.u16()?,
                descriptor_index: r.u16()?,
            },
            15 => Constant::MethodHandle {
                reference_kind: r.u8()?,
                reference_index: r.u16()?,
            },
            16 => Constant::MethodType {
                descriptor_index: r.u16()?,
            },
            17 => Constant::Dynamic(read_dynamic_indices(r)?),
            18 => Constant::InvokeDynamic(read_dynamic_indices(r)?),
            19 => Constant::Module {
                name_index: r.u16()?,
            },
            20 => Constant::Package {
                name_index: r.u16()?,
            },
            _ => return Err(ClassFileError::UnknownConstantTag { tag, index }),
        };
        // index < count <= u16::MAX, so neither step below can overflow
        if matches!(entry, Constant::Long(_) | Constant::Double(_)) {
            if index + 1 >= count {
                return Err(ClassFileError::TruncatedWideConstant { index });
            }
            entries.push(entry);
            entries.push(Constant::Unusable);
            index += 2;
        } else {
            entries.push(entry);
            index += 1;
        }
    }

    Ok(ConstantPool { entries })
}

fn read_member_indices(r: &mut ByteReader<'_>) -> Result<MemberRefIndices, ClassFileError> {
    Ok(MemberRefIndices {
        class_index: r.u16()?,
        name_and_type_index: r.u16()?,
    })
}

fn read_dynamic_indices(r: &mut ByteReader<'_>) -> Result<DynamicIndices, ClassFileError> {
    Ok(DynamicIndices {
        bootstrap_method_attr_index: r.u16()?,
        name_and_type_index: r.u16()?,
    })
}

fn read_method(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<MethodInfo, ClassFileError> {
    let access_flags = r.u16()?;
    let name = pool.utf8(r.u16()?)?.to_string();
    let descriptor = pool.utf8(r.u16()?)?.to_string();

    let mut code = None;
    let attribute_count = r.u16()?;
    for _ in 0..attribute_count {
        let attr_name = pool.utf8(r.u16()?)?;
        let len = r.u32()? as usize;
        let data = r.take(len)?;
        if attr_name == "Code" {
            let mut body = ByteReader::new(data);
            let max_stack = body.u16()?;
            let max_locals = body.u16()?;
            let code_len = body.u32()? as usize;
            let bytecode = body.take(code_len)?.to_vec();
            code = Some(CodeBody {
                max_stack,
                max_locals,
                bytecode,
            });
        }
    }

    Ok(MethodInfo {
        access_flags,
        name,
        descriptor,
        code,
    })
}

fn skip_attributes(r: &mut ByteReader<'_>) -> Result<(), ClassFileError> {
    let count = r.u16()?;
    for _ in 0..count {
        r.skip(2)?;
        let len = r.u32()? as usize;
        r.skip(len)?;
    }
    Ok(())
}

/// Decodes modified UTF-8 as used in class files and Java serialization.
///
/// Malformed sequences decode to U+FFFD.
#[must_use]
pub fn decode_modified_utf8(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let continuation = |k: usize| bytes.get(i + k).filter(|&&c| c & 0xC0 == 0x80).copied();
        if b & 0x80 == 0 {
            units.push(u16::from(b));
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            if let Some(b2) = continuation(1) {
                units.push((u16::from(b & 0x1F) << 6) | u16::from(b2 & 0x3F));
                i += 2;
            } else {
                units.push(0xFFFD);
                i += 1;
            }
        } else if b & 0xF0 == 0xE0 {
            if let (Some(b2), Some(b3)) = (continuation(1), continuation(2)) {
                units.push(
                    (u16::from(b & 0x0F) << 12) | (u16::from(b2 & 0x3F) << 6) | u16::from(b3 & 0x3F),
                );
                i += 3;
            } else {
                units.push(0xFFFD);
                i += 1;
            }
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    /// Offset of the opcode within the method body.
    pub offset: usize,
    /// The opcode. For `wide` this is `wide` itself.
    pub opcode: u8,
    /// Operand bytes following the opcode (including switch padding).
    pub operands: &'a [u8],
}

impl Instruction<'_> {
    /// Reads the first two operand bytes as a big-endian index.
    #[must_use]
    pub fn u16_operand(&self) -> Option<u16> {
        match self.operands {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Whether this is one of the four method call instructions.
    #[must_use]
    pub const fn is_method_call(&self) -> bool {
        matches!(
            self.opcode,
            opcodes::INVOKEVIRTUAL
                | opcodes::INVOKESPECIAL
                | opcodes::INVOKESTATIC
                | opcodes::INVOKEINTERFACE
        )
    }

    /// Whether this is a field access instruction.
    #[must_use]
    pub const fn is_field_access(&self) -> bool {
        matches!(
            self.opcode,
            opcodes::GETSTATIC | opcodes::PUTSTATIC | opcodes::GETFIELD | opcodes::PUTFIELD
        )
    }

    /// Whether this is a type instruction carrying a class operand.
    #[must_use]
    pub const fn is_type_instruction(&self) -> bool {
        matches!(
            self.opcode,
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF
        )
    }
}

/// Iterator over the instructions of a method body.
///
/// Yields an error once and then stops if the bytecode is malformed.
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    code: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Instructions<'a> {
    /// Creates an iterator over raw bytecode.
    #[must_use]
    pub const fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            pos: 0,
            failed: false,
        }
    }

    fn operand_len(&self, offset: usize, opcode: u8) -> Result<usize, ClassFileError> {
        let fixed = match opcode {
            0x00..=0x0F | 0x1A..=0x35 | 0x3B..=0x83 | 0x85..=0x98 | 0xAC..=0xB1 => 0,
            0xBE | 0xBF | 0xC2 | 0xC3 => 0,
            0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3A | 0xA9 | 0xBC => 1,
            0x11 | 0x13 | 0x14 | 0x84 | 0x99..=0xA8 | 0xB2..=0xB8 => 2,
            0xBB | 0xBD | 0xC0 | 0xC1 | 0xC6 | 0xC7 => 2,
            0xC5 => 3,
            0xB9 | 0xBA | 0xC8 | 0xC9 => 4,
            opcodes::TABLESWITCH => {
                let pad = switch_padding(offset);
                let low = self.i32_at(offset + 1 + pad + 4)?;
                let high = self.i32_at(offset + 1 + pad + 8)?;
                let count = i64::from(high) - i64::from(low) + 1;
                let count = usize::try_from(count).map_err(|_| ClassFileError::InvalidOpcode {
                    opcode,
                    offset,
                })?;
                return Ok(pad + 12 + count * 4);
            }
            opcodes::LOOKUPSWITCH => {
                let pad = switch_padding(offset);
                let pairs = self.i32_at(offset + 1 + pad + 4)?;
                let pairs = usize::try_from(pairs)
                    .map_err(|_| ClassFileError::InvalidOpcode { opcode, offset })?;
                return Ok(pad + 8 + pairs * 8);
            }
            opcodes::WIDE => {
                let modified = *self.code.get(offset + 1).ok_or(ClassFileError::UnexpectedEof {
                    offset: offset + 1,
                    needed: 1,
                })?;
                return Ok(if modified == opcodes::IINC { 5 } else { 3 });
            }
            _ => return Err(ClassFileError::InvalidOpcode { opcode, offset }),
        };
        Ok(fixed)
    }

    fn i32_at(&self, at: usize) -> Result<i32, ClassFileError> {
        self.code
            .get(at..at + 4)
            .and_then(|s| s.try_into().ok())
            .map(i32::from_be_bytes)
            .ok_or(ClassFileError::UnexpectedEof {
                offset: at,
                needed: 4,
            })
    }
}

const fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ClassFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.code.len() {
            return None;
        }
        let offset = self.pos;
        let opcode = self.code[offset];
        let result = self.operand_len(offset, opcode).and_then(|len| {
            let start = offset + 1;
            self.code
                .get(start..start + len)
                .map(|operands| (len, operands))
                .ok_or(ClassFileError::UnexpectedEof {
                    offset: start,
                    needed: len,
                })
        });
        match result {
            Ok((len, operands)) => {
                self.pos = offset + 1 + len;
                Some(Ok(Instruction {
                    offset,
                    opcode,
                    operands,
                }))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ClassFileError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len()).ok_or(
            ClassFileError::UnexpectedEof {
                offset: self.pos,
                needed: n,
            },
        )?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), ClassFileError> {
        self.take(n).map(|_| ())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ClassFileError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFileError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ClassFileError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, ClassFileError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, ClassFileError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, ClassFileError> {
        Ok(i64::from_be_bytes(self.array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{access, Bytecode, ClassWriter};

    fn sample_class() -> Vec<u8> {
        let mut writer = ClassWriter::new(access::PUBLIC | access::SUPER, "com/acme/Sample", "java/lang/Object");
        let helper = writer.pool().method_ref("com/acme/Helper", "twice", "(I)I");
        let mut code = Bytecode::new(1, 1);
        code.op(opcodes::ICONST_1).op_u16(opcodes::INVOKESTATIC, helper).op(opcodes::IRETURN);
        writer.add_method(access::PUBLIC | access::STATIC, "run", "()I", Some(code));
        writer.to_bytes().unwrap()
    }

    #[test]
    fn test_parse_written_class() {
        let class = ClassFile::parse(&sample_class()).unwrap();
        assert_eq!(class.this_class, "com/acme/Sample");
        assert_eq!(class.super_class.as_deref(), Some("java/lang/Object"));
        assert_eq!(class.major_version, 50);

        let run = class.method("run", "()I").unwrap();
        let insns: Vec<_> = run.instructions().collect::<Result<_, _>>().unwrap();
        assert_eq!(insns.len(), 3);
        assert!(insns[1].is_method_call());

        let target = class.constant_pool.member_ref(insns[1].u16_operand().unwrap()).unwrap();
        assert_eq!(target.owner, "com/acme/Helper");
        assert_eq!(target.name, "twice");
        assert_eq!(target.descriptor, "(I)I");
    }

    #[test]
    fn test_wide_constant_in_last_slot_is_rejected() {
        let err = ClassFile::parse(&crate::testing::fixtures::overflowing_wide_pool()).unwrap_err();
        assert_eq!(err, ClassFileError::TruncatedWideConstant { index: 0xFFFE });
    }

    #[test]
    fn test_bad_magic() {
        let err = ClassFile::parse(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 50]).unwrap_err();
        assert_eq!(err, ClassFileError::BadMagic(0xDEAD_BEEF));
    }

    #[test]
    fn test_truncated_input_fails_cleanly() {
        let bytes = sample_class();
        for cut in [3, 10, bytes.len() / 2, bytes.len() - 1] {
            assert!(ClassFile::parse(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn test_unknown_constant_tag() {
        let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 50, 0, 2, 99];
        let err = ClassFile::parse(&bytes).unwrap_err();
        assert_eq!(err, ClassFileError::UnknownConstantTag { tag: 99, index: 1 });
    }

    #[test]
    fn test_tableswitch_padding() {
        // iload_0; tableswitch (pad 2) default=0 low=0 high=1 [0,0]; ireturn
        let mut code = vec![0x1A, opcodes::TABLESWITCH, 0, 0];
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.push(opcodes::IRETURN);

        let insns: Vec<_> = Instructions::new(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(insns.len(), 3);
        assert_eq!(insns[1].operands.len(), 2 + 12 + 8);
        assert_eq!(insns[2].opcode, opcodes::IRETURN);
    }

    #[test]
    fn test_lookupswitch_and_wide() {
        // wide iinc 300 by 1; lookupswitch (pad 0 at offset 6) default, 1 pair; return
        let mut code = vec![opcodes::WIDE, opcodes::IINC, 0x01, 0x2C, 0x00, 0x01, 0x00, opcodes::LOOKUPSWITCH];
        // opcode at 7, padding to offset 8 is 0
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&5i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.push(opcodes::RETURN);

        let insns: Vec<_> = Instructions::new(&code).collect::<Result<_, _>>().unwrap();
        let opcodes_seen: Vec<u8> = insns.iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes_seen, vec![opcodes::WIDE, 0x00, opcodes::LOOKUPSWITCH, opcodes::RETURN]);
    }

    #[test]
    fn test_invalid_opcode_stops_iteration() {
        let code = [0x00, 0xCB, 0x00];
        let mut it = Instructions::new(&code);
        assert!(it.next().unwrap().is_ok());
        assert_eq!(
            it.next().unwrap().unwrap_err(),
            ClassFileError::InvalidOpcode { opcode: 0xCB, offset: 1 }
        );
        assert!(it.next().is_none());
    }

    #[test]
    fn test_truncated_operands() {
        let code = [opcodes::INVOKESTATIC, 0x00];
        let err = Instructions::new(&code).next().unwrap().unwrap_err();
        assert!(matches!(err, ClassFileError::UnexpectedEof { offset: 1, needed: 2 }));
    }

    #[test]
    fn test_modified_utf8() {
        assert_eq!(decode_modified_utf8(b"abc"), "abc");
        assert_eq!(decode_modified_utf8(&[0xC0, 0x80]), "\0");
        assert_eq!(decode_modified_utf8(&[0xC3, 0xA9]), "\u{e9}");
        // U+1F600 as a surrogate pair, each half three bytes
        assert_eq!(
            decode_modified_utf8(&[0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]),
            "\u{1F600}"
        );
        assert_eq!(decode_modified_utf8(&[0xFF]), "\u{FFFD}");
    }
}
