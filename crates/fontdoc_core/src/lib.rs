//! Observable document model for directory-based font sources.
//!
//! A [`Font`] owns a [`NotificationCenter`] and a tree of document objects.
//! Edits post notifications, derived values are cached per object until an
//! invalidating notification arrives, and every persistable container can
//! compare itself with its store to report external edits.

pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;

pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig};
pub use model::{
    BlobKind, BlobSet, ChangeSet, DocError, DocResult, DocumentObject, Font, FontChanges, Glyph,
    GlyphData, Layer, LayerAction, LayerChanges, LayerSet, Represented, RepresentationParams,
    SaveOptions,
};
pub use notify::{
    Notification, NotificationCenter, NotificationData, NotificationScope, ObjectId, Observable,
    ObservableRef, ObserverId,
};
pub use repo::{DirStore, EntryKind, FontStore, MemoryStore, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
