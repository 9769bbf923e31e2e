//! Storage collaborator contract.

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

pub type StoreResult<T> = Result<T, StoreError>;

/// Category of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    /// Font-level singleton records.
    Meta,
    /// Glyph records of the named layer's glyph set.
    Glyphs(String),
    Data,
    Images,
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Meta => write!(f, "meta"),
            Self::Glyphs(layer) => write!(f, "glyphs[{layer}]"),
            Self::Data => write!(f, "data"),
            Self::Images => write!(f, "images"),
        }
    }
}

/// Modification time reported by a store. Only compared for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModTime(u128);

impl ModTime {
    pub fn from_raw(value: u128) -> Self {
        Self(value)
    }

    pub fn raw(self) -> u128 {
        self.0
    }
}

impl From<SystemTime> for ModTime {
    fn from(value: SystemTime) -> Self {
        let nanos = value
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or_default();
        Self(nanos)
    }
}

/// Layer listing as recorded by a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerContents {
    pub order: Vec<String>,
    pub default: Option<String>,
}

impl LayerContents {
    pub fn contains(&self, name: &str) -> bool {
        self.order.iter().any(|layer| layer == name)
    }
}

#[derive(Debug)]
pub enum StoreError {
    NotFound { kind: EntryKind, name: String },
    LayerNotFound(String),
    LayerExists(String),
    Io(std::io::Error),
    InvalidData(String),
}

impl StoreError {
    /// True for errors meaning "the entry is not there".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::LayerNotFound(_) => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { kind, name } => write!(f, "{kind} entry not found: {name}"),
            Self::LayerNotFound(name) => write!(f, "layer storage not found: {name}"),
            Self::LayerExists(name) => write!(f, "layer storage already exists: {name}"),
            Self::Io(err) => write!(f, "store io error: {err}"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Reader/writer of a font source location.
///
/// Entries are opaque bytes addressed by kind and name. Layers own a glyph
/// set each; one of them may be flagged as the default.
pub trait FontStore {
    /// Human readable location, for logs.
    fn location(&self) -> String;

    fn format_version(&self) -> u32;

    fn list_entries(&self, kind: &EntryKind) -> StoreResult<BTreeSet<String>>;

    fn read_entry(&self, kind: &EntryKind, name: &str) -> StoreResult<Vec<u8>>;

    /// `None` when the entry does not exist.
    fn mod_time(&self, kind: &EntryKind, name: &str) -> StoreResult<Option<ModTime>>;

    fn write_entry(&self, kind: &EntryKind, name: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Fails with a not-found error when the entry does not exist.
    fn remove_entry(&self, kind: &EntryKind, name: &str) -> StoreResult<()>;

    fn layer_contents(&self) -> StoreResult<LayerContents>;

    /// Creates the layer's glyph set if missing and applies the default flag.
    fn ensure_layer(&self, name: &str, default: bool) -> StoreResult<()>;

    fn write_layer_order(&self, order: &[String]) -> StoreResult<()>;

    fn remove_layer(&self, name: &str) -> StoreResult<()>;

    fn rename_layer(&self, old: &str, new: &str) -> StoreResult<()>;

    fn set_layer_default(&self, name: &str, default: bool) -> StoreResult<()>;
}

/// Copies one entry verbatim between stores.
pub fn copy_entry(
    source: &dyn FontStore,
    source_kind: &EntryKind,
    target: &dyn FontStore,
    target_kind: &EntryKind,
    name: &str,
) -> StoreResult<()> {
    let bytes = source.read_entry(source_kind, name)?;
    target.write_entry(target_kind, name, &bytes)
}
