//! Archive resources and the symbol path they are resolved from.
//!
//! A [`Resource`] is one entry destined for a generated module archive.
//! Capsule resources carry their bytes directly; symbol resources name a
//! compiled unit and resolve it lazily through a [`SymbolPath`], which
//! keeps a shared read-through cache of everything it has loaded.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::classfile::symbol_to_entry_name;
use crate::errors::PackagingError;

/// One root of the symbol path.
#[derive(Debug, Clone)]
pub enum SymbolRoot {
    /// A directory of class files laid out by package.
    Directory(PathBuf),
    /// A jar or zip archive.
    Archive(PathBuf),
    /// Class files held in memory, keyed by entry name (`a/b/C.class`).
    Memory(Arc<HashMap<String, Arc<[u8]>>>),
}

impl SymbolRoot {
    /// Builds an in-memory root from `(dotted symbol, class bytes)` pairs.
    pub fn memory<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<u8>)>,
        S: AsRef<str>,
    {
        let map = classes
            .into_iter()
            .map(|(symbol, bytes)| (symbol_to_entry_name(symbol.as_ref()), Arc::from(bytes)))
            .collect();
        Self::Memory(Arc::new(map))
    }

    fn read(&self, entry_name: &str) -> Result<Option<Arc<[u8]>>, PackagingError> {
        match self {
            Self::Directory(dir) => match std::fs::read(dir.join(entry_name)) {
                Ok(bytes) => Ok(Some(Arc::from(bytes))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(PackagingError::Io(e)),
            },
            Self::Archive(path) => read_archive_entry(path, entry_name),
            Self::Memory(map) => Ok(map.get(entry_name).cloned()),
        }
    }
}

fn read_archive_entry(path: &Path, entry_name: &str) -> Result<Option<Arc<[u8]>>, PackagingError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(archive = %path.display(), "Symbol path archive does not exist");
            return Ok(None);
        }
        Err(e) => return Err(PackagingError::Io(e)),
    };
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut bytes)?;
    Ok(Some(Arc::from(bytes)))
}

/// Ordered roots searched for compiled units, with a shared byte cache.
///
/// Clones share the cache.
#[derive(Debug, Clone, Default)]
pub struct SymbolPath {
    roots: Arc<Vec<SymbolRoot>>,
    cache: Arc<DashMap<String, Arc<[u8]>>>,
}

impl SymbolPath {
    /// Creates an empty symbol path.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a root. Earlier roots win.
    #[must_use]
    pub fn with_root(mut self, root: SymbolRoot) -> Self {
        Arc::make_mut(&mut self.roots).push(root);
        self
    }

    /// Appends a directory root.
    #[must_use]
    pub fn with_directory(self, dir: impl Into<PathBuf>) -> Self {
        self.with_root(SymbolRoot::Directory(dir.into()))
    }

    /// Appends an archive root.
    #[must_use]
    pub fn with_archive(self, path: impl Into<PathBuf>) -> Self {
        self.with_root(SymbolRoot::Archive(path.into()))
    }

    /// The configured roots.
    #[must_use]
    pub fn roots(&self) -> &[SymbolRoot] {
        &self.roots
    }

    /// Loads the compiled unit for a dotted symbol name.
    ///
    /// # Errors
    ///
    /// Returns [`PackagingError::SymbolNotFound`] if no root has the unit,
    /// or an IO/archive error if a root could not be read.
    pub fn load(&self, symbol: &str) -> Result<Arc<[u8]>, PackagingError> {
        if let Some(bytes) = self.cache.get(symbol) {
            return Ok(Arc::clone(&bytes));
        }
        let entry_name = symbol_to_entry_name(symbol);
        for root in self.roots.iter() {
            if let Some(bytes) = root.read(&entry_name)? {
                trace!(symbol, size = bytes.len(), "Loaded symbol");
                self.cache.insert(symbol.to_string(), Arc::clone(&bytes));
                return Ok(bytes);
            }
        }
        Err(PackagingError::SymbolNotFound(symbol.to_string()))
    }

    /// Whether any root has the symbol.
    ///
    /// # Errors
    ///
    /// Returns the IO or archive error of a root that could not be read.
    /// Absence is `Ok(false)`, not an error.
    pub fn contains(&self, symbol: &str) -> Result<bool, PackagingError> {
        match self.load(symbol) {
            Ok(_) => Ok(true),
            Err(PackagingError::SymbolNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Number of cached units.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[derive(Clone)]
enum Content {
    Bytes(Arc<[u8]>),
    Symbol { symbol: String, path: SymbolPath },
}

/// A named entry to be written into a module archive.
///
/// Equality and hashing consider the name only.
#[derive(Clone)]
pub struct Resource {
    name: String,
    content: Content,
}

impl Resource {
    /// A resource with fixed contents, such as a serialized closure.
    pub fn bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            content: Content::Bytes(data.into()),
        }
    }

    /// A compiled unit resolved lazily from the symbol path.
    ///
    /// The entry name is derived from the dotted symbol name.
    pub fn symbol(symbol: impl Into<String>, path: &SymbolPath) -> Self {
        let symbol = symbol.into();
        Self {
            name: symbol_to_entry_name(&symbol),
            content: Content::Symbol {
                symbol,
                path: path.clone(),
            },
        }
    }

    /// Archive entry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dotted symbol name for symbol resources.
    #[must_use]
    pub fn symbol_name(&self) -> Option<&str> {
        match &self.content {
            Content::Symbol { symbol, .. } => Some(symbol),
            Content::Bytes(_) => None,
        }
    }

    /// Returns the resource contents, loading symbol resources on demand.
    ///
    /// # Errors
    ///
    /// Returns an error if a symbol resource cannot be resolved.
    pub fn load(&self) -> Result<Arc<[u8]>, PackagingError> {
        match &self.content {
            Content::Bytes(bytes) => Ok(Arc::clone(bytes)),
            Content::Symbol { symbol, path } => path.load(symbol),
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Resource");
        s.field("name", &self.name);
        match &self.content {
            Content::Bytes(bytes) => s.field("len", &bytes.len()),
            Content::Symbol { symbol, .. } => s.field("symbol", symbol),
        };
        s.finish()
    }
}

/// Insertion-ordered set of resources, deduplicated by name.
///
/// The first resource inserted under a name is kept.
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    entries: Vec<Resource>,
    names: HashSet<String>,
}

impl ResourceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a resource. Returns `false` if the name was already present.
    pub fn insert(&mut self, resource: Resource) -> bool {
        if !self.names.insert(resource.name.clone()) {
            trace!(name = %resource.name, "Duplicate resource ignored");
            return false;
        }
        self.entries.push(resource);
        true
    }

    /// Whether a resource with this name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Returns the resource with this name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.entries.iter().find(|r| r.name == name)
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.entries.iter()
    }

    /// Entry names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(Resource::name)
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Extend<Resource> for ResourceSet {
    fn extend<T: IntoIterator<Item = Resource>>(&mut self, iter: T) {
        for resource in iter {
            self.insert(resource);
        }
    }
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<T: IntoIterator<Item = Resource>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<'a> IntoIterator for &'a ResourceSet {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
