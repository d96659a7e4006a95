//! Building and packaging code modules.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::archive::{ArchiveCustomizer, DispatchGlue, DriverLayout, GlueGenerator, ModuleRole};
use crate::errors::{IntrospectionError, PackagingError};
use crate::introspect::{ClosureCapsule, LayeredIntrospector, TypeIntrospector, CAPSULE_RESOURCE_NAME};
use crate::resources::{Resource, SymbolPath};
use crate::scanner::ReferenceScanner;

use super::{CodeKind, CodeModule};

const DSL_SUPPORT: [&str; 2] = [
    "org.springframework.xd.dsl.domain.Source",
    "org.springframework.xd.dsl.domain.Module",
];

fn standard_support_symbols() -> HashMap<CodeKind, Vec<String>> {
    let with = |interface: &str| {
        DSL_SUPPORT
            .iter()
            .copied()
            .chain(std::iter::once(interface))
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    HashMap::from([
        (
            CodeKind::Function,
            with("org.springframework.xd.dsl.domain.SerializableFunction"),
        ),
        (
            CodeKind::Supplier,
            with("org.springframework.xd.dsl.domain.SerializableSupplier"),
        ),
        (
            CodeKind::StreamProcessor,
            with("org.springframework.xd.dsl.domain.SerializableProcessor"),
        ),
    ])
}

/// Turns closure capsules into code modules and code modules into archives.
///
/// Building a module never fails: introspection failures leave the types
/// unknown and scan failures leave the dependency list empty. Packaging
/// failures are returned to the caller.
#[derive(Clone)]
pub struct CodeModuleFactory {
    symbol_path: SymbolPath,
    introspector: Arc<dyn TypeIntrospector>,
    scanner: ReferenceScanner,
    customizer: ArchiveCustomizer,
    driver: DriverLayout,
    capsule_resource: String,
    support_symbols: HashMap<CodeKind, Vec<String>>,
}

impl std::fmt::Debug for CodeModuleFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeModuleFactory")
            .field("symbol_path", &self.symbol_path)
            .field("scanner", &self.scanner)
            .field("customizer", &self.customizer)
            .field("driver", &self.driver)
            .field("capsule_resource", &self.capsule_resource)
            .field("support_symbols", &self.support_symbols)
            .finish_non_exhaustive()
    }
}

impl Default for CodeModuleFactory {
    fn default() -> Self {
        Self::new(ArchiveCustomizer::default(), SymbolPath::new())
    }
}

impl CodeModuleFactory {
    /// Creates a factory with declared-then-recovered type introspection.
    #[must_use]
    pub fn new(customizer: ArchiveCustomizer, symbol_path: SymbolPath) -> Self {
        Self {
            introspector: Arc::new(LayeredIntrospector::standard(symbol_path.clone())),
            symbol_path,
            scanner: ReferenceScanner::new(),
            customizer,
            driver: DriverLayout::default(),
            capsule_resource: CAPSULE_RESOURCE_NAME.to_string(),
            support_symbols: standard_support_symbols(),
        }
    }

    /// Builds a factory from packaging configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::PackagingConfig) -> Self {
        let mut scanner = ReferenceScanner::new();
        for prefix in &config.excluded_prefixes {
            scanner = scanner.with_excluded_prefix(prefix.clone());
        }
        let mut factory = Self::new(ArchiveCustomizer::new(config.template_catalog()), config.symbol_path())
            .with_scanner(scanner)
            .with_driver_layout(config.driver.clone())
            .with_capsule_resource(config.capsule_resource.clone());
        for (kind, symbols) in &config.support_symbols {
            factory = factory.with_support_symbols(*kind, symbols.clone());
        }
        factory
    }

    /// Replaces the type introspector.
    #[must_use]
    pub fn with_introspector(mut self, introspector: impl TypeIntrospector + 'static) -> Self {
        self.introspector = Arc::new(introspector);
        self
    }

    /// Replaces the reference scanner.
    #[must_use]
    pub fn with_scanner(mut self, scanner: ReferenceScanner) -> Self {
        self.scanner = scanner;
        self
    }

    /// Replaces the driver layout used for glue generation.
    #[must_use]
    pub fn with_driver_layout(mut self, driver: DriverLayout) -> Self {
        self.driver = driver;
        self
    }

    /// Sets the archive entry name of the serialized closure.
    #[must_use]
    pub fn with_capsule_resource(mut self, name: impl Into<String>) -> Self {
        self.capsule_resource = name.into();
        self
    }

    /// Sets the runtime support symbols packaged with every module of `kind`.
    #[must_use]
    pub fn with_support_symbols(mut self, kind: CodeKind, symbols: Vec<String>) -> Self {
        self.support_symbols.insert(kind, symbols);
        self
    }

    /// Packages no runtime support symbols for any kind.
    #[must_use]
    pub fn without_support_symbols(mut self) -> Self {
        self.support_symbols.clear();
        self
    }

    /// The symbol path resources are resolved from.
    #[must_use]
    pub const fn symbol_path(&self) -> &SymbolPath {
        &self.symbol_path
    }

    /// The archive customizer.
    #[must_use]
    pub const fn customizer(&self) -> &ArchiveCustomizer {
        &self.customizer
    }

    /// Builds the code module for a closure attached as step `id` in `role`.
    ///
    /// The module packages the declaring unit, the units it calls that are
    /// present on the symbol path, the runtime support units for its kind
    /// and the capsule itself.
    #[must_use]
    pub fn build(&self, capsule: &ClosureCapsule, id: usize, role: ModuleRole) -> CodeModule {
        let kind = capsule.kind();
        let (input_type, output_type) = match kind {
            CodeKind::Function => (
                absorb("input", self.introspector.input_type(capsule)),
                absorb("output", self.introspector.output_type(capsule)),
            ),
            CodeKind::Supplier => (None, absorb("output", self.introspector.output_type(capsule))),
            CodeKind::StreamProcessor => (None, None),
        };

        let mut module = CodeModule::new(id, kind, role)
            .with_input_type(input_type)
            .with_output_type(output_type);

        let declaring = capsule.declaring_symbol();
        module.add_resource(Resource::symbol(declaring, &self.symbol_path));
        for symbol in self.scanner.discover(declaring, &self.symbol_path) {
            match self.symbol_path.contains(&symbol) {
                Ok(true) => {
                    module.add_resource(Resource::symbol(symbol, &self.symbol_path));
                }
                Ok(false) => {
                    debug!(symbol = %symbol, "Referenced symbol not on symbol path, assuming the platform provides it");
                }
                // kept so that packaging reports the read failure
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "Symbol path could not be read");
                    module.add_resource(Resource::symbol(symbol, &self.symbol_path));
                }
            }
        }
        for symbol in self.support_symbols.get(&kind).into_iter().flatten() {
            module.add_resource(Resource::symbol(symbol.as_str(), &self.symbol_path));
        }
        module.add_resource(Resource::bytes(self.capsule_resource.as_str(), Arc::clone(capsule.bytes())));

        debug!(
            id,
            kind = %kind,
            role = %role,
            resources = module.resources().len(),
            input = ?module.input_type().map(|t| t.as_str().to_string()),
            output = ?module.output_type().map(|t| t.as_str().to_string()),
            "Built code module"
        );
        module
    }

    /// Produces the deployable archive for a code module.
    ///
    /// Function processors get a typed glue class; other kinds use their
    /// template's driver as is.
    ///
    /// # Errors
    ///
    /// Returns any template, glue or resource failure.
    pub fn package(&self, module: &CodeModule) -> Result<Vec<u8>, PackagingError> {
        let glue = (module.kind() == CodeKind::Function && module.role() == ModuleRole::Processor).then(|| {
            DispatchGlue::new(
                self.driver.clone(),
                module.input_type().cloned(),
                module.output_type().cloned(),
            )
            .with_capsule_resource(self.capsule_resource.as_str())
        });
        self.customizer.generate(
            module.kind(),
            module.role(),
            glue.as_ref().map(|g| g as &dyn GlueGenerator),
            module.resources(),
        )
    }
}

fn absorb<T>(which: &'static str, result: Result<T, IntrospectionError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(which, error = %err, "Closure type introspection failed, dispatch will be unchecked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{list_entries, read_entry, TemplateCatalog, TemplateSource};
    use crate::classfile::{ClassFile, TypeDescriptor};
    use crate::resources::SymbolRoot;
    use crate::testing::fixtures::{calling_class, placeholder_class, serialized_lambda, TemplateBuilder, DEFAULT_SLOT};
    use pretty_assertions::assert_eq;

    fn symbol_path() -> SymbolPath {
        SymbolPath::new().with_root(SymbolRoot::memory([
            (
                "com.acme.App",
                calling_class(
                    "com/acme/App",
                    &[
                        ("com/acme/Helper", "twice", "(I)I"),
                        ("org/thirdparty/Missing", "call", "()V"),
                        ("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;"),
                    ],
                ),
            ),
            ("com.acme.Helper", placeholder_class("com/acme/Helper", "java/lang/Object")),
        ]))
    }

    fn factory() -> CodeModuleFactory {
        let catalog = TemplateCatalog::new().with_template(
            CodeKind::Function,
            ModuleRole::Processor,
            TemplateSource::Bytes(Arc::from(TemplateBuilder::lambda_processor().build())),
        );
        CodeModuleFactory::new(ArchiveCustomizer::new(catalog), symbol_path()).without_support_symbols()
    }

    #[test]
    fn test_build_collects_resources() {
        let capsule = ClosureCapsule::function(serialized_lambda(&["(Ljava/lang/Integer;)Ljava/lang/Integer;"]), "com.acme.App");
        let module = factory().build(&capsule, 1, ModuleRole::Processor);

        let names: Vec<&str> = module.resources().names().collect();
        assert_eq!(names, vec!["com/acme/App.class", "com/acme/Helper.class", "lambda.ser"]);
        assert_eq!(module.input_type().unwrap().as_str(), "Ljava/lang/Integer;");
        assert_eq!(module.output_type().unwrap().as_str(), "Ljava/lang/Integer;");
    }

    #[test]
    fn test_introspection_failure_is_absorbed() {
        let capsule = ClosureCapsule::function(b"opaque".to_vec(), "com.acme.App");
        let module = factory().build(&capsule, 1, ModuleRole::Processor);
        assert!(module.input_type().is_none());
        assert!(module.output_type().is_none());
        assert!(module.resources().contains("lambda.ser"));
    }

    #[test]
    fn test_scan_failure_is_absorbed() {
        let capsule = ClosureCapsule::function(vec![0], "com.acme.Unknown")
            .with_types(TypeDescriptor::java_object(), TypeDescriptor::java_object());
        let module = factory().build(&capsule, 3, ModuleRole::Processor);
        let names: Vec<&str> = module.resources().names().collect();
        assert_eq!(names, vec!["com/acme/Unknown.class", "lambda.ser"]);
    }

    #[test]
    fn test_unreadable_symbol_root_fails_packaging() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.jar");
        std::fs::write(&broken, b"not a zip archive").unwrap();
        let catalog = TemplateCatalog::new().with_template(
            CodeKind::Function,
            ModuleRole::Processor,
            TemplateSource::Bytes(Arc::from(TemplateBuilder::lambda_processor().build())),
        );
        let path = SymbolPath::new()
            .with_root(SymbolRoot::memory([(
                "com.acme.App",
                calling_class("com/acme/App", &[("com/acme/Helper", "twice", "(I)I")]),
            )]))
            .with_archive(&broken);
        let factory = CodeModuleFactory::new(ArchiveCustomizer::new(catalog), path).without_support_symbols();

        let capsule = ClosureCapsule::function(vec![1], "com.acme.App")
            .with_types(TypeDescriptor::java_object(), TypeDescriptor::java_object());
        let module = factory.build(&capsule, 1, ModuleRole::Processor);
        assert!(module.resources().contains("com/acme/Helper.class"));
        assert!(matches!(factory.package(&module), Err(PackagingError::Archive(_))));
    }

    #[test]
    fn test_support_symbols_per_kind() {
        let factory = CodeModuleFactory::new(ArchiveCustomizer::default(), symbol_path());
        let capsule = ClosureCapsule::supplier(vec![0], "com.acme.App");
        let module = factory.build(&capsule, 0, ModuleRole::Source);
        assert!(module.resources().contains("org/springframework/xd/dsl/domain/SerializableSupplier.class"));
        assert!(module.resources().contains("org/springframework/xd/dsl/domain/Module.class"));
        assert!(!module.resources().contains("org/springframework/xd/dsl/domain/SerializableFunction.class"));
    }

    #[test]
    fn test_package_function_processor() {
        let factory = factory();
        let integer = TypeDescriptor::object("java.lang.Integer").unwrap();
        let capsule = ClosureCapsule::function(vec![1, 2, 3], "com.acme.App").with_types(integer.clone(), integer);
        let module = factory.build(&capsule, 1, ModuleRole::Processor);
        let archive = factory.package(&module).unwrap();

        let names = list_entries(&archive).unwrap();
        assert!(names.iter().any(|n| n == "com/acme/Helper.class"));
        assert_eq!(read_entry(&archive, "lambda.ser").unwrap().unwrap(), vec![1, 2, 3]);

        let glue = ClassFile::parse(&read_entry(&archive, DEFAULT_SLOT).unwrap().unwrap()).unwrap();
        assert!(glue
            .method("transform", "(Ljava/lang/Integer;)Ljava/lang/Integer;")
            .is_some());
    }

    #[test]
    fn test_package_unresolvable_support_symbol_fails() {
        let factory = factory().with_support_symbols(CodeKind::Function, vec!["com.acme.Absent".to_string()]);
        let capsule = ClosureCapsule::function(vec![1], "com.acme.App");
        let module = factory.build(&capsule, 1, ModuleRole::Processor);
        let err = factory.package(&module).unwrap_err();
        assert!(matches!(err, PackagingError::SymbolNotFound(ref s) if s == "com.acme.Absent"));
    }
}
