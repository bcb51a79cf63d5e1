//! Migration Catalog - Enumerates migration units from a source
//!
//! A [`CatalogSource`] exposes "list names, read bytes by name" over any
//! file-like hierarchy. [`Catalog`] filters those names by extension, sorts
//! them with the configured [`NameOrder`] and reads every unit.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

/// Catalog enumeration and read errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration not found: {0}")]
    NotFound(String),

    #[error("Duplicate migration name: {0}")]
    DuplicateName(String),

    #[error("Invalid migration name: {0}")]
    InvalidName(String),
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// One named migration script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    /// File name, e.g. `0.cql`
    pub name: String,
    /// Raw script bytes
    pub content: Vec<u8>,
}

impl MigrationUnit {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Lowercase hex MD5 of the raw content
    pub fn checksum(&self) -> String {
        checksum(&self.content)
    }
}

/// Lowercase hex MD5 digest used for tamper detection
pub fn checksum(content: &[u8]) -> String {
    format!("{:x}", md5::compute(content))
}

/// Ordered enumeration of named byte blobs
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Names of every entry in the source, in any order
    async fn names(&self) -> CatalogResult<Vec<String>>;

    /// Raw bytes of the named entry
    async fn read(&self, name: &str) -> CatalogResult<Vec<u8>>;
}

/// Comparator deciding apply order between migration names
#[derive(Clone, Default)]
pub enum NameOrder {
    /// Plain byte-wise string order (`"10.cql"` sorts before `"2.cql"`)
    #[default]
    Lexical,
    /// Digit runs compare by numeric value (`"2.cql"` sorts before `"10.cql"`)
    Natural,
    /// Caller-supplied comparator
    Custom(Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>),
}

impl NameOrder {
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&str, &str) -> Ordering + Send + Sync + 'static,
    {
        NameOrder::Custom(Arc::new(compare))
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            NameOrder::Lexical => a.cmp(b),
            NameOrder::Natural => natural_cmp(a, b),
            NameOrder::Custom(compare) => compare(a, b),
        }
    }
}

impl fmt::Debug for NameOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameOrder::Lexical => write!(f, "Lexical"),
            NameOrder::Natural => write!(f, "Natural"),
            NameOrder::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let left = take_digits(&mut a);
                let right = take_digits(&mut b);
                let left_trimmed = left.trim_start_matches('0');
                let right_trimmed = right.trim_start_matches('0');
                let ord = left_trimmed
                    .len()
                    .cmp(&right_trimmed.len())
                    .then_with(|| left_trimmed.cmp(right_trimmed))
                    .then_with(|| left.len().cmp(&right.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

/// Sorted, extension-filtered view over a [`CatalogSource`]
pub struct Catalog<'a> {
    source: &'a dyn CatalogSource,
    extension: &'a str,
    order: &'a NameOrder,
}

impl<'a> Catalog<'a> {
    pub fn new(source: &'a dyn CatalogSource, extension: &'a str, order: &'a NameOrder) -> Self {
        Self {
            source,
            extension,
            order,
        }
    }

    /// Sorted names of the matching entries, without reading them
    pub async fn names(&self) -> CatalogResult<Vec<String>> {
        let mut names: Vec<String> = self
            .source
            .names()
            .await?
            .into_iter()
            .filter(|name| self.matches_extension(name))
            .collect();

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(CatalogError::DuplicateName(name.clone()));
            }
        }

        names.sort_by(|a, b| self.order.compare(a, b));
        Ok(names)
    }

    /// All matching units in apply order
    pub async fn list(&self) -> CatalogResult<Vec<MigrationUnit>> {
        let names = self.names().await?;
        let mut units = Vec::with_capacity(names.len());
        for name in names {
            let content = self.source.read(&name).await?;
            units.push(MigrationUnit { name, content });
        }

        tracing::debug!(count = units.len(), "Loaded migration catalog");
        Ok(units)
    }

    fn matches_extension(&self, name: &str) -> bool {
        if self.extension.is_empty() {
            return true;
        }
        Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(self.extension))
    }
}

/// In-memory catalog, handy for tests and embedded migrations
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from migrations embedded at compile time
    ///
    /// ```
    /// use cql_migrate::MemoryCatalog;
    ///
    /// let catalog = MemoryCatalog::from_embedded(&[
    ///     ("0.cql", "CREATE TABLE IF NOT EXISTS users (id uuid PRIMARY KEY);"),
    /// ]);
    /// assert_eq!(catalog.len(), 1);
    /// ```
    pub fn from_embedded(sources: &[(&str, &str)]) -> Self {
        let catalog = Self::new();
        for (name, content) in sources {
            catalog.insert(*name, *content);
        }
        catalog
    }

    /// Add or replace an entry
    pub fn insert(&self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.write().insert(name.into(), content.into());
    }

    /// Remove an entry, returning its content
    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.files.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[async_trait]
impl CatalogSource for MemoryCatalog {
    async fn names(&self) -> CatalogResult<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    async fn read(&self, name: &str) -> CatalogResult<Vec<u8>> {
        self.files
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }
}

/// Catalog backed by the regular files of one directory (non-recursive)
#[derive(Debug, Clone)]
pub struct DirCatalog {
    root: PathBuf,
}

impl DirCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> CatalogResult<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(std::path::Component::Normal(_)), None) => Ok(self.root.join(name)),
            _ => Err(CatalogError::InvalidName(name.to_string())),
        }
    }
}

#[async_trait]
impl CatalogSource for DirCatalog {
    async fn names(&self) -> CatalogResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    tracing::warn!(file = ?raw, "Skipping migration file with non UTF-8 name");
                }
            }
        }

        Ok(names)
    }

    async fn read(&self, name: &str) -> CatalogResult<Vec<u8>> {
        let path = self.entry_path(name)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CatalogError::NotFound(name.to_string()))
            }
            Err(e) => Err(CatalogError::Io(e)),
        }
    }
}
