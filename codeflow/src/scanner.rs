//! Dependency discovery for closure bodies.
//!
//! The scanner makes one pass over a compiled unit's method bodies and
//! collects the owners of call instructions. It does not recurse into the
//! discovered symbols, and it does not collect field or type instruction
//! operands, so a closure that only touches a type through a field or an
//! array element will not get that type packaged.

use tracing::{trace, warn};

use crate::classfile::{internal_to_dotted, ClassFile};
use crate::errors::ScanError;
use crate::resources::SymbolPath;

/// Extracts the symbols a compiled unit calls into.
#[derive(Debug, Clone)]
pub struct ReferenceScanner {
    excluded_prefixes: Vec<String>,
}

impl Default for ReferenceScanner {
    fn default() -> Self {
        Self {
            excluded_prefixes: vec!["java/".to_string()],
        }
    }
}

impl ReferenceScanner {
    /// Creates a scanner excluding the platform namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an internal-name prefix (`javax/`) whose owners are never reported.
    #[must_use]
    pub fn with_excluded_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.excluded_prefixes.push(prefix.into());
        self
    }

    /// Returns the dotted names of call-site owners in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::ClassFile`] if the unit cannot be decoded.
    pub fn scan(&self, class_bytes: &[u8]) -> Result<Vec<String>, ScanError> {
        let class = ClassFile::parse(class_bytes)?;
        let pool = &class.constant_pool;
        let mut found: Vec<String> = Vec::new();

        for method in &class.methods {
            for insn in method.instructions() {
                let insn = insn?;
                if insn.is_method_call() {
                    let Some(index) = insn.u16_operand() else {
                        continue;
                    };
                    let owner = pool.member_ref(index)?.owner;
                    if self.is_excluded(owner) {
                        continue;
                    }
                    let dotted = internal_to_dotted(owner);
                    if !found.contains(&dotted) {
                        found.push(dotted);
                    }
                } else if insn.is_field_access() || insn.is_type_instruction() {
                    trace!(
                        class = %class.this_class,
                        method = %method.name,
                        opcode = insn.opcode,
                        "Ignoring non-call reference"
                    );
                }
            }
        }

        Ok(found)
    }

    /// Loads `symbol` from the path and scans it.
    ///
    /// Any failure yields an empty list; discovery never aborts packaging.
    #[must_use]
    pub fn discover(&self, symbol: &str, path: &SymbolPath) -> Vec<String> {
        let result = path
            .load(symbol)
            .map_err(ScanError::from)
            .and_then(|bytes| self.scan(&bytes));
        match result {
            Ok(symbols) => {
                trace!(symbol, count = symbols.len(), "Discovered referenced symbols");
                symbols
            }
            Err(err) => {
                warn!(symbol, error = %err, "Dependency scan failed, packaging without dependencies");
                Vec::new()
            }
        }
    }

    fn is_excluded(&self, owner: &str) -> bool {
        owner.starts_with('[') || self.excluded_prefixes.iter().any(|p| owner.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{access, opcodes, Bytecode, ClassWriter};
    use crate::errors::ClassFileError;
    use crate::resources::SymbolRoot;
    use crate::testing::fixtures::overflowing_wide_pool;
    use pretty_assertions::assert_eq;

    fn caller_class() -> Vec<u8> {
        let mut w = ClassWriter::new(access::PUBLIC | access::SUPER, "com/acme/App", "java/lang/Object");
        let helper = w.pool().method_ref("com/acme/Helper", "twice", "(I)I");
        let helper_again = w.pool().method_ref("com/acme/Helper", "thrice", "(I)I");
        let printer = w.pool().interface_method_ref("com/acme/Printer", "print", "(I)V");
        let boxing = w.pool().method_ref("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;");
        let clone = w.pool().method_ref("[I", "clone", "()Ljava/lang/Object;");
        let field = w.pool().field_ref("com/acme/Config", "LIMIT", "I");
        let new_type = w.pool().class("com/acme/Point");

        let mut body = Bytecode::new(4, 2);
        body.op_u16(opcodes::GETSTATIC, field)
            .op_u16(opcodes::INVOKESTATIC, helper)
            .op_u16(opcodes::INVOKESTATIC, helper_again)
            .op_u16(opcodes::INVOKESTATIC, boxing)
            .op(opcodes::POP)
            .op_u16(opcodes::NEW, new_type)
            .op(opcodes::POP)
            .op(opcodes::ACONST_NULL)
            .op_u16(opcodes::INVOKEVIRTUAL, clone)
            .op(opcodes::ACONST_NULL)
            .op(opcodes::ICONST_1)
            .invokeinterface(printer, 1);
        body.op(opcodes::RETURN);
        w.add_method(access::PUBLIC | access::STATIC, "run", "()V", Some(body));
        w.to_bytes().unwrap()
    }

    #[test]
    fn test_scan_collects_call_owners() {
        let symbols = ReferenceScanner::new().scan(&caller_class()).unwrap();
        assert_eq!(symbols, vec!["com.acme.Helper".to_string(), "com.acme.Printer".to_string()]);
    }

    #[test]
    fn test_excluded_prefix() {
        let symbols = ReferenceScanner::new()
            .with_excluded_prefix("com/acme/Print")
            .scan(&caller_class())
            .unwrap();
        assert_eq!(symbols, vec!["com.acme.Helper".to_string()]);
    }

    #[test]
    fn test_scan_rejects_garbage() {
        assert!(matches!(
            ReferenceScanner::new().scan(b"nope"),
            Err(ScanError::ClassFile(_))
        ));
    }

    #[test]
    fn test_discover_degrades_to_empty() {
        let path = SymbolPath::new().with_root(SymbolRoot::memory([
            ("com.acme.App", caller_class()),
            ("com.acme.Broken", b"garbage".to_vec()),
        ]));
        let scanner = ReferenceScanner::new();
        assert_eq!(scanner.discover("com.acme.App", &path).len(), 2);
        assert!(scanner.discover("com.acme.Broken", &path).is_empty());
        assert!(scanner.discover("com.acme.Missing", &path).is_empty());
    }

    #[test]
    fn test_overrunning_constant_pool_is_an_error() {
        let bytes = overflowing_wide_pool();
        let scanner = ReferenceScanner::new();
        assert!(matches!(
            scanner.scan(&bytes),
            Err(ScanError::ClassFile(ClassFileError::TruncatedWideConstant { .. }))
        ));

        let path = SymbolPath::new().with_root(SymbolRoot::memory([("com.acme.Bad", bytes)]));
        assert!(scanner.discover("com.acme.Bad", &path).is_empty());
    }
}
