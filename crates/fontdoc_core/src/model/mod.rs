//! Document object graph.
//!
//! # Responsibility
//! - Define the observable document objects and their shared base.
//! - Cache derived values per object and keep them in step with edits.
//! - Track what each persistable container last saw in storage.
//!
//! # Invariants
//! - Objects reach their notification center only through weak links.
//! - A cached representation never outlives a notification that invalidates it.

pub mod base;
pub mod blob_set;
pub mod error;
pub mod font;
pub mod glyph;
pub mod layer;
pub mod layer_set;
pub mod record;
pub mod representation;
pub mod stamp;

pub use base::{DocumentObject, ObjectBase, ObjectKind, UndoEvent};
pub use blob_set::{BlobKind, BlobSet, PNG_SIGNATURE};
pub use error::{DocError, DocResult};
pub use font::{Font, FontChanges, SaveOptions};
pub use glyph::{Anchor, Bounds, Component, Contour, Glyph, GlyphData, Point, SegmentType};
pub use layer::Layer;
pub use layer_set::{LayerAction, LayerChanges, LayerSet, DEFAULT_LAYER_NAME};
pub use record::{Features, Groups, Info, Kerning, Lib, Record, RecordValue};
pub use representation::{
    register_representation_factory, representation_factory_names,
    unregister_representation_factory, ParamValue, RepresentationKey, RepresentationParams,
    Represented,
};
pub use stamp::{ChangeSet, Stamp};
