use crate::repo::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DocResult<T> = Result<T, DocError>;

/// Errors raised by document objects.
#[derive(Debug)]
pub enum DocError {
    GlyphNotFound(String),
    LayerNotFound(String),
    DataNotFound(String),
    ImageNotFound(String),
    DuplicateGlyphName(String),
    DuplicateLayerName(String),
    DuplicateIdentifier(String),
    /// The object already belongs to a different parent.
    ForeignParent {
        object: &'static str,
        name: String,
    },
    InvalidLayerOrder(String),
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    NoDefaultLayer,
    NoStore,
    InvalidImage(String),
    IllegalFileName(String),
    UnknownRepresentation(String),
    RepresentationType(String),
    Store(StoreError),
    Codec(serde_json::Error),
}

impl Display for DocError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GlyphNotFound(name) => write!(f, "glyph not found: {name}"),
            Self::LayerNotFound(name) => write!(f, "layer not found: {name}"),
            Self::DataNotFound(name) => write!(f, "data file not found: {name}"),
            Self::ImageNotFound(name) => write!(f, "image not found: {name}"),
            Self::DuplicateGlyphName(name) => write!(f, "glyph already exists: {name}"),
            Self::DuplicateLayerName(name) => write!(f, "layer already exists: {name}"),
            Self::DuplicateIdentifier(id) => write!(f, "identifier already in use: {id}"),
            Self::ForeignParent { object, name } => {
                write!(f, "{object} `{name}` already belongs to another parent")
            }
            Self::InvalidLayerOrder(message) => write!(f, "invalid layer order: {message}"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            Self::NoDefaultLayer => write!(f, "document has no default layer"),
            Self::NoStore => write!(f, "document has no storage location"),
            Self::InvalidImage(name) => write!(f, "image `{name}` is not PNG data"),
            Self::IllegalFileName(name) => write!(f, "illegal file name: {name}"),
            Self::UnknownRepresentation(name) => {
                write!(f, "no representation factory registered for `{name}`")
            }
            Self::RepresentationType(name) => {
                write!(f, "representation `{name}` has a different value type")
            }
            Self::Store(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "record codec error: {err}"),
        }
    }
}

impl Error for DocError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for DocError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<serde_json::Error> for DocError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}
