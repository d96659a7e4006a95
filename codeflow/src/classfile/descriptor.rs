//! JVM type and method descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ClassFileError;

/// A JVM field descriptor such as `Ljava/lang/Integer;`, `I` or `[J`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeDescriptor(String);

impl TypeDescriptor {
    /// The `java.lang.Object` descriptor.
    pub const OBJECT: &'static str = "Ljava/lang/Object;";

    /// Parses a field descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error unless the whole input is exactly one field descriptor.
    pub fn parse(descriptor: &str) -> Result<Self, ClassFileError> {
        match field_descriptor_len(descriptor.as_bytes()) {
            Some(len) if len == descriptor.len() => Ok(Self(descriptor.to_string())),
            _ => Err(ClassFileError::MalformedDescriptor(descriptor.to_string())),
        }
    }

    /// Builds a reference type descriptor from a dotted class name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or contains descriptor syntax.
    pub fn object(dotted_name: &str) -> Result<Self, ClassFileError> {
        if dotted_name.is_empty() || dotted_name.contains([';', '[', '(', ')', '/']) {
            return Err(ClassFileError::MalformedDescriptor(dotted_name.to_string()));
        }
        Ok(Self(format!("L{};", dotted_name.replace('.', "/"))))
    }

    /// Shorthand for `java.lang.Object`.
    #[must_use]
    pub fn java_object() -> Self {
        Self(Self::OBJECT.to_string())
    }

    /// Returns the raw descriptor text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a primitive type (including `V`).
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.0.len() == 1
    }

    /// Whether this is an array type.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.0.starts_with('[')
    }

    /// Whether this is `java.lang.Object`.
    #[must_use]
    pub fn is_java_object(&self) -> bool {
        self.0 == Self::OBJECT
    }

    /// Returns the reference type used when a value of this type is boxed.
    ///
    /// Reference types are returned unchanged.
    #[must_use]
    pub fn boxed(&self) -> Self {
        let boxed = match self.0.as_str() {
            "Z" => "Ljava/lang/Boolean;",
            "B" => "Ljava/lang/Byte;",
            "C" => "Ljava/lang/Character;",
            "S" => "Ljava/lang/Short;",
            "I" => "Ljava/lang/Integer;",
            "J" => "Ljava/lang/Long;",
            "F" => "Ljava/lang/Float;",
            "D" => "Ljava/lang/Double;",
            "V" => "Ljava/lang/Void;",
            _ => return self.clone(),
        };
        Self(boxed.to_string())
    }

    /// Returns the name used in a `CONSTANT_Class` entry.
    ///
    /// `Lfoo/Bar;` becomes `foo/Bar`; arrays keep their descriptor form.
    /// Primitives have no class entry.
    #[must_use]
    pub fn class_entry_name(&self) -> Option<&str> {
        if self.is_array() {
            Some(&self.0)
        } else if self.0.starts_with('L') {
            Some(&self.0[1..self.0.len() - 1])
        } else {
            None
        }
    }

    /// Returns the dotted class name for reference types (`java.lang.Integer`).
    #[must_use]
    pub fn dotted_name(&self) -> Option<String> {
        if self.0.starts_with('L') {
            Some(self.0[1..self.0.len() - 1].replace('/', "."))
        } else {
            None
        }
    }

    /// Strips array dimensions, returning the element type.
    #[must_use]
    pub fn element_type(&self) -> Self {
        Self(self.0.trim_start_matches('[').to_string())
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TypeDescriptor {
    type Error = ClassFileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TypeDescriptor> for String {
    fn from(value: TypeDescriptor) -> Self {
        value.0
    }
}

/// A JVM method descriptor such as `(Ljava/lang/Integer;)Ljava/lang/Integer;`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order.
    pub parameters: Vec<TypeDescriptor>,
    /// Return type (`V` for void).
    pub return_type: TypeDescriptor,
}

impl MethodDescriptor {
    /// Creates a method descriptor.
    #[must_use]
    pub fn new(parameters: Vec<TypeDescriptor>, return_type: TypeDescriptor) -> Self {
        Self {
            parameters,
            return_type,
        }
    }

    /// Parses a method descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a well-formed method descriptor.
    pub fn parse(descriptor: &str) -> Result<Self, ClassFileError> {
        let malformed = || ClassFileError::MalformedDescriptor(descriptor.to_string());
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(malformed());
        }
        let mut pos = 1;
        let mut parameters = Vec::new();
        while bytes.get(pos) != Some(&b')') {
            let len = field_descriptor_len(&bytes[pos..]).ok_or_else(malformed)?;
            if bytes[pos] == b'V' {
                return Err(malformed());
            }
            parameters.push(TypeDescriptor(descriptor[pos..pos + len].to_string()));
            pos += len;
        }
        pos += 1;
        let rest = &descriptor[pos..];
        let return_type = if rest == "V" {
            TypeDescriptor("V".to_string())
        } else {
            TypeDescriptor::parse(rest).map_err(|_| malformed())?
        };
        Ok(Self {
            parameters,
            return_type,
        })
    }

    /// Number of declared parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.parameters {
            f.write_str(param.as_str())?;
        }
        write!(f, "){}", self.return_type)
    }
}

/// Length of the field descriptor at the start of `bytes`, if any.
fn field_descriptor_len(bytes: &[u8]) -> Option<usize> {
    let dims = bytes.iter().take_while(|&&b| b == b'[').count();
    match bytes.get(dims)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(dims + 1),
        b'V' if dims == 0 => Some(1),
        b'L' => {
            let end = bytes[dims..].iter().position(|&b| b == b';')?;
            let name = &bytes[dims + 1..dims + end];
            if name.is_empty() || name.iter().any(|b| matches!(b, b'.' | b'[' | b'(' | b')')) {
                return None;
            }
            Some(dims + end + 1)
        }
        _ => None,
    }
}
