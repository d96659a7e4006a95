//! Module archive customization.
//!
//! A deployable module is produced by copying a pre-built template archive
//! entry by entry, swapping the glue class slot for a generated one, and
//! appending the closure capsule plus the compiled units it depends on.

mod glue;

pub use glue::{DispatchGlue, DriverLayout, GlueGenerator};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, trace, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::PackagingError;
use crate::pipeline::CodeKind;
use crate::resources::ResourceSet;

/// The position a module occupies in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleRole {
    /// Produces messages.
    Source,
    /// Transforms messages.
    Processor,
    /// Consumes messages.
    Sink,
}

impl ModuleRole {
    /// The platform's name for this role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Processor => "processor",
            Self::Sink => "sink",
        }
    }
}

impl fmt::Display for ModuleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a template archive comes from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// A file on disk.
    Path(PathBuf),
    /// An archive already in memory.
    Bytes(Arc<[u8]>),
}

/// Template archives keyed by closure kind and module role.
///
/// A path that does not exist is retried by file name in each search
/// directory, so a build tree layout and a flat deployment layout can
/// share one catalog.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: HashMap<(CodeKind, ModuleRole), TemplateSource>,
    search_dirs: Vec<PathBuf>,
}

impl TemplateCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in templates under a `codemodules` build tree.
    #[must_use]
    pub fn standard(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let build_path = |name: &str| {
            let jar = format!("{name}-1.0.0.BUILD-SNAPSHOT.jar");
            TemplateSource::Path(root.join(name).join("target").join(jar))
        };
        Self::new()
            .with_template(
                CodeKind::Function,
                ModuleRole::Processor,
                build_path("lambda-processor"),
            )
            .with_template(CodeKind::Supplier, ModuleRole::Source, build_path("lambda-source"))
            .with_template(
                CodeKind::StreamProcessor,
                ModuleRole::Processor,
                build_path("rx-processor"),
            )
    }

    /// Registers a template, replacing any previous one for the same shape.
    #[must_use]
    pub fn with_template(mut self, kind: CodeKind, role: ModuleRole, source: TemplateSource) -> Self {
        self.register(kind, role, source);
        self
    }

    /// Registers a template in place.
    pub fn register(&mut self, kind: CodeKind, role: ModuleRole, source: TemplateSource) {
        self.templates.insert((kind, role), source);
    }

    /// Adds a fallback directory searched by file name.
    #[must_use]
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    /// Whether a template is registered for this shape.
    #[must_use]
    pub fn supports(&self, kind: CodeKind, role: ModuleRole) -> bool {
        self.templates.contains_key(&(kind, role))
    }

    /// Reads the template archive for a module shape.
    ///
    /// # Errors
    ///
    /// Returns [`PackagingError::TemplateNotRegistered`] for unknown shapes
    /// and [`PackagingError::TemplateIo`] if no candidate file can be read.
    pub fn open(&self, kind: CodeKind, role: ModuleRole) -> Result<Arc<[u8]>, PackagingError> {
        let source = self
            .templates
            .get(&(kind, role))
            .ok_or(PackagingError::TemplateNotRegistered { kind, role })?;
        let path = match source {
            TemplateSource::Bytes(bytes) => return Ok(Arc::clone(bytes)),
            TemplateSource::Path(path) => path,
        };

        match std::fs::read(path) {
            Ok(bytes) => return Ok(Arc::from(bytes)),
            Err(e) if e.kind() != std::io::ErrorKind::NotFound || self.search_dirs.is_empty() => {
                return Err(PackagingError::TemplateIo {
                    path: path.clone(),
                    source: e,
                });
            }
            Err(_) => {}
        }

        let file_name = path.file_name().unwrap_or(path.as_os_str());
        let mut last_err = None;
        for dir in &self.search_dirs {
            let candidate = dir.join(file_name);
            match std::fs::read(&candidate) {
                Ok(bytes) => {
                    debug!(template = %candidate.display(), "Resolved template from search directory");
                    return Ok(Arc::from(bytes));
                }
                Err(e) => last_err = Some((candidate, e)),
            }
        }
        let (path, source) = last_err.unwrap_or_else(|| {
            (path.clone(), std::io::Error::from(std::io::ErrorKind::NotFound))
        });
        Err(PackagingError::TemplateIo { path, source })
    }
}

/// Builds module archives from templates.
#[derive(Debug, Clone, Default)]
pub struct ArchiveCustomizer {
    catalog: TemplateCatalog,
}

impl ArchiveCustomizer {
    /// Creates a customizer over a template catalog.
    #[must_use]
    pub const fn new(catalog: TemplateCatalog) -> Self {
        Self { catalog }
    }

    /// The template catalog.
    #[must_use]
    pub const fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Produces a module archive.
    ///
    /// Template entries are copied without recompression, except that a
    /// compressed nested archive (`.jar`/`.zip`) is rewritten stored. If
    /// `glue` is given its slot entry is replaced with the generated bytes.
    /// Resources are appended afterwards; a resource whose name is already
    /// present in the output is skipped.
    ///
    /// # Errors
    ///
    /// Any template, glue or resource failure fails the whole call; a
    /// glue slot missing from the template is [`PackagingError::MissingSlot`].
    pub fn generate(
        &self,
        kind: CodeKind,
        role: ModuleRole,
        glue: Option<&dyn GlueGenerator>,
        resources: &ResourceSet,
    ) -> Result<Vec<u8>, PackagingError> {
        let template = self.catalog.open(kind, role)?;
        let mut archive = ZipArchive::new(Cursor::new(template))?;
        let mut out = ZipWriter::new(Cursor::new(Vec::new()));
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        let mut written: HashSet<String> = HashSet::with_capacity(archive.len() + resources.len());
        let mut slot_replaced = false;

        for index in 0..archive.len() {
            let (name, compression) = {
                let entry = archive.by_index_raw(index)?;
                (entry.name().to_string(), entry.compression())
            };

            if let Some(glue) = glue.filter(|g| g.slot() == name) {
                let bytes = glue.generate()?;
                trace!(entry = %name, size = bytes.len(), "Replacing customization slot");
                out.start_file(name.as_str(), deflated)?;
                out.write_all(&bytes)?;
                slot_replaced = true;
            } else if is_nested_archive(&name) && compression != CompressionMethod::Stored {
                let mut entry = archive.by_index(index)?;
                let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
                entry.read_to_end(&mut bytes)?;
                trace!(entry = %name, "Storing nested archive");
                out.start_file(name.as_str(), stored)?;
                out.write_all(&bytes)?;
            } else {
                trace!(entry = %name, "Copying template entry");
                out.raw_copy_file(archive.by_index_raw(index)?)?;
            }
            written.insert(name);
        }

        if let Some(glue) = glue {
            if !slot_replaced {
                return Err(PackagingError::MissingSlot(glue.slot().to_string()));
            }
        }

        for resource in resources {
            if written.contains(resource.name()) {
                warn!(resource = %resource.name(), "Resource collides with a template entry, skipping");
                continue;
            }
            let bytes = resource.load()?;
            trace!(resource = %resource.name(), size = bytes.len(), "Including resource");
            out.start_file(resource.name(), deflated)?;
            out.write_all(&bytes)?;
            written.insert(resource.name().to_string());
        }

        let bytes = out.finish()?.into_inner();
        info!(
            kind = ?kind,
            role = %role,
            entries = written.len(),
            size = bytes.len(),
            "Generated module archive"
        );
        Ok(bytes)
    }
}

fn is_nested_archive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".jar") || lower.ends_with(".zip")
}

/// SHA-256 hex digest of an archive.
#[must_use]
pub fn archive_fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lists the entry names of an archive in order.
///
/// # Errors
///
/// Returns an error if the bytes are not a readable archive.
pub fn list_entries(bytes: &[u8]) -> Result<Vec<String>, PackagingError> {
    let archive = ZipArchive::new(Cursor::new(bytes))?;
    Ok((0..archive.len())
        .filter_map(|i| archive.name_for_index(i).map(str::to_string))
        .collect())
}

/// Reads one entry of an archive, decompressed.
///
/// # Errors
///
/// Returns an error if the bytes are not a readable archive.
pub fn read_entry(bytes: &[u8], name: &str) -> Result<Option<Vec<u8>>, PackagingError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    entry.read_to_end(&mut out)?;
    Ok(Some(out))
}

/// Returns the compression method recorded for an entry.
///
/// # Errors
///
/// Returns an error if the archive is unreadable or has no such entry.
pub fn entry_compression(bytes: &[u8], name: &str) -> Result<CompressionMethod, PackagingError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let index = archive
        .index_for_name(name)
        .ok_or(zip::result::ZipError::FileNotFound)?;
    let entry = archive.by_index_raw(index)?;
    Ok(entry.compression())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{ClassFile, TypeDescriptor};
    use crate::resources::{Resource, SymbolPath, SymbolRoot};
    use crate::testing::fixtures::{TemplateBuilder, DEFAULT_SLOT};
    use pretty_assertions::assert_eq;

    fn catalog_with(template: Vec<u8>) -> TemplateCatalog {
        TemplateCatalog::new().with_template(
            CodeKind::Function,
            ModuleRole::Processor,
            TemplateSource::Bytes(Arc::from(template)),
        )
    }

    fn entries_with_contents(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        list_entries(bytes)
            .unwrap()
            .into_iter()
            .map(|n| {
                let data = read_entry(bytes, &n).unwrap().unwrap();
                (n, data)
            })
            .collect()
    }

    #[test]
    fn test_identity_copy_without_glue_or_resources() {
        let template = TemplateBuilder::lambda_processor().build();
        let customizer = ArchiveCustomizer::new(catalog_with(template.clone()));
        let out = customizer
            .generate(CodeKind::Function, ModuleRole::Processor, None, &ResourceSet::new())
            .unwrap();
        assert_eq!(entries_with_contents(&out), entries_with_contents(&template));
    }

    #[test]
    fn test_slot_replaced_with_glue() {
        let template = TemplateBuilder::lambda_processor().build();
        let customizer = ArchiveCustomizer::new(catalog_with(template));
        let integer = TypeDescriptor::object("java.lang.Integer").unwrap();
        let glue = DispatchGlue::new(DriverLayout::default(), Some(integer.clone()), Some(integer));

        let out = customizer
            .generate(CodeKind::Function, ModuleRole::Processor, Some(&glue), &ResourceSet::new())
            .unwrap();
        let class = ClassFile::parse(&read_entry(&out, DEFAULT_SLOT).unwrap().unwrap()).unwrap();
        assert!(class
            .method("transform", "(Ljava/lang/Integer;)Ljava/lang/Integer;")
            .is_some());
    }

    #[test]
    fn test_missing_slot_fails() {
        let template = TemplateBuilder::new().entry("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n").build();
        let customizer = ArchiveCustomizer::new(catalog_with(template));
        let glue = DispatchGlue::new(DriverLayout::default(), None, None);
        let err = customizer
            .generate(CodeKind::Function, ModuleRole::Processor, Some(&glue), &ResourceSet::new())
            .unwrap_err();
        assert!(matches!(err, PackagingError::MissingSlot(ref s) if s == DEFAULT_SLOT));
    }

    #[test]
    fn test_resources_appended_once() {
        let template = TemplateBuilder::lambda_processor().build();
        let customizer = ArchiveCustomizer::new(catalog_with(template));
        let mut resources = ResourceSet::new();
        resources.insert(Resource::bytes("lambda.ser", b"first".to_vec()));
        resources.insert(Resource::bytes("lambda.ser", b"second".to_vec()));
        resources.insert(Resource::bytes("config/module.properties", b"dup".to_vec()));

        let out = customizer
            .generate(CodeKind::Function, ModuleRole::Processor, None, &resources)
            .unwrap();
        let names = list_entries(&out).unwrap();
        assert_eq!(names.iter().filter(|n| *n == "lambda.ser").count(), 1);
        assert_eq!(read_entry(&out, "lambda.ser").unwrap().unwrap(), b"first");
        assert_eq!(names.iter().filter(|n| *n == "config/module.properties").count(), 1);
        assert_ne!(
            read_entry(&out, "config/module.properties").unwrap().unwrap(),
            b"dup"
        );
    }

    #[test]
    fn test_nested_archives_are_stored() {
        let template = TemplateBuilder::lambda_processor()
            .entry("lib/helper.jar", [7u8; 512])
            .build();
        assert_eq!(
            entry_compression(&template, "lib/helper.jar").unwrap(),
            CompressionMethod::Deflated
        );
        let customizer = ArchiveCustomizer::new(catalog_with(template));
        let out = customizer
            .generate(CodeKind::Function, ModuleRole::Processor, None, &ResourceSet::new())
            .unwrap();
        assert_eq!(
            entry_compression(&out, "lib/helper.jar").unwrap(),
            CompressionMethod::Stored
        );
        assert_eq!(read_entry(&out, "lib/helper.jar").unwrap().unwrap(), vec![7u8; 512]);
    }

    #[test]
    fn test_unresolvable_symbol_resource_fails_whole_call() {
        let template = TemplateBuilder::lambda_processor().build();
        let customizer = ArchiveCustomizer::new(catalog_with(template));
        let path = SymbolPath::new().with_root(SymbolRoot::memory([("com.acme.Present", vec![1])]));
        let resources: ResourceSet = [
            Resource::symbol("com.acme.Present", &path),
            Resource::symbol("com.acme.Absent", &path),
        ]
        .into_iter()
        .collect();
        let err = customizer
            .generate(CodeKind::Function, ModuleRole::Processor, None, &resources)
            .unwrap_err();
        assert!(matches!(err, PackagingError::SymbolNotFound(ref s) if s == "com.acme.Absent"));
    }

    #[test]
    fn test_unregistered_template() {
        let customizer = ArchiveCustomizer::default();
        let err = customizer
            .generate(CodeKind::Supplier, ModuleRole::Source, None, &ResourceSet::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "no template archive registered for Supplier source");
    }

    #[test]
    fn test_template_search_dir_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let template = TemplateBuilder::lambda_processor().build();
        std::fs::write(dir.path().join("lambda-source-1.0.0.BUILD-SNAPSHOT.jar"), &template).unwrap();

        let catalog = TemplateCatalog::standard("/nonexistent/codemodules").with_search_dir(dir.path());
        assert_eq!(&*catalog.open(CodeKind::Supplier, ModuleRole::Source).unwrap(), &template[..]);

        let err = catalog.open(CodeKind::Function, ModuleRole::Processor).unwrap_err();
        assert!(matches!(err, PackagingError::TemplateIo { .. }));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = archive_fingerprint(b"abc");
        assert_eq!(a, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(a, archive_fingerprint(b"abc"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(ModuleRole::Processor.to_string(), "processor");
        assert_eq!(serde_json::to_string(&ModuleRole::Sink).unwrap(), "\"sink\"");
    }
}
