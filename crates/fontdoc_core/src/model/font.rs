//! Document root: owns the notification center and every container.
//!
//! # Responsibility
//! - Open a document from a store and save it back, in place or elsewhere.
//! - Aggregate external change detection and reload across containers.
//!
//! # Invariants
//! - The font is the only strong owner of its notification center; children
//!   resolve it through their parent chain.
//! - Saving twice without edits in between writes nothing the second time.

use crate::model::base::{impl_document_object, DocumentObject, ObjectBase, ObjectKind};
use crate::model::blob_set::{BlobKind, BlobSet};
use crate::model::error::{DocError, DocResult};
use crate::model::glyph::Glyph;
use crate::model::layer::Layer;
use crate::model::layer_set::{LayerChanges, LayerSet};
use crate::model::record::{Features, Groups, Info, Kerning, Lib, Record};
use crate::model::stamp::ChangeSet;
use crate::notify::{
    Notification, NotificationCenter, NotificationData, Observable, ObservableRef,
};
use crate::repo::FontStore;
use log::{info, warn};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

pub const FONT_RELOADED_LAYERS: &str = "Font.ReloadedLayers";
pub const FONT_RELOADED_GLYPHS: &str = "Font.ReloadedGlyphs";

/// Options for [`Font::save_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Delete images no glyph refers to before writing.
    pub remove_unreferenced_images: bool,
}

/// Everything [`Font::test_for_external_changes`] found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontChanges {
    pub info: bool,
    pub kerning: bool,
    pub groups: bool,
    pub features: bool,
    pub lib: bool,
    pub layers: LayerChanges,
    pub images: ChangeSet,
    pub data: ChangeSet,
}

impl FontChanges {
    pub fn is_empty(&self) -> bool {
        !self.info
            && !self.kerning
            && !self.groups
            && !self.features
            && !self.lib
            && self.layers.is_empty()
            && self.images.is_empty()
            && self.data.is_empty()
    }
}

pub struct Font {
    me: Weak<Font>,
    base: ObjectBase,
    center: Rc<NotificationCenter>,
    info: Rc<Record<Info>>,
    kerning: Rc<Record<Kerning>>,
    groups: Rc<Record<Groups>>,
    features: Rc<Record<Features>>,
    lib: Rc<Record<Lib>>,
    layers: Rc<LayerSet>,
    data: Rc<BlobSet>,
    images: Rc<BlobSet>,
    store: RefCell<Option<Rc<dyn FontStore>>>,
    format_version: Cell<Option<u32>>,
}

impl_document_object!(Font);

impl Font {
    /// Creates an unsaved document holding one empty default layer.
    pub fn new() -> Rc<Self> {
        let font = Self::build();
        if let Err(err) = font.layers.ensure_default_layer() {
            warn!("event=font_new module=font status=error reason={err}");
        }
        font
    }

    /// Loads a document from `store`. Glyphs and blobs are read lazily.
    pub fn open(store: Rc<dyn FontStore>) -> DocResult<Rc<Self>> {
        let font = Self::build();
        let format_version = store.format_version();
        font.info.load(&*store)?;
        font.kerning.load(&*store)?;
        font.groups.load(&*store)?;
        if format_version >= 2 {
            font.features.load(&*store)?;
        }
        font.lib.load(&*store)?;
        font.layers.load_from(store.clone())?;
        if format_version >= 3 {
            font.data.load_from(store.clone())?;
            font.images.load_from(store.clone())?;
        }
        *font.store.borrow_mut() = Some(store.clone());
        font.format_version.set(Some(format_version));
        if font.layers.is_empty() {
            font.layers.ensure_default_layer()?;
        }
        info!(
            "event=font_open module=font status=ok location={} format={format_version} layers={}",
            store.location(),
            font.layers.len()
        );
        Ok(font)
    }

    fn build() -> Rc<Self> {
        let font = Rc::new_cyclic(|me: &Weak<Self>| Self {
            me: me.clone(),
            base: ObjectBase::new(ObjectKind::Font, ObservableRef::new(me)),
            center: Rc::new(NotificationCenter::new()),
            info: Record::new(),
            kerning: Record::new(),
            groups: Record::new(),
            features: Record::new(),
            lib: Record::new(),
            layers: LayerSet::new(),
            data: BlobSet::new(BlobKind::Data),
            images: BlobSet::new(BlobKind::Images),
            store: RefCell::new(None),
            format_version: Cell::new(None),
        });
        font.base.attach_center(&font.center);
        font.attach_child(&*font.info);
        font.attach_child(&*font.kerning);
        font.attach_child(&*font.groups);
        font.attach_child(&*font.features);
        font.attach_child(&*font.lib);
        font.attach_child(&*font.layers);
        font.attach_child(&*font.data);
        font.attach_child(&*font.images);
        font
    }

    fn attach_child(&self, child: &dyn DocumentObject) {
        let parent: Weak<dyn DocumentObject> = self.me.clone();
        child.base().set_parent(Some(parent));
        self.center.subscribe_weak(
            self.me.clone(),
            Font::on_child_changed,
            Some(child.kind().changed_notification()),
            Some(&child.observable_ref()),
        );
    }

    pub fn center(&self) -> &Rc<NotificationCenter> {
        &self.center
    }

    pub fn info(&self) -> &Rc<Record<Info>> {
        &self.info
    }

    pub fn kerning(&self) -> &Rc<Record<Kerning>> {
        &self.kerning
    }

    pub fn groups(&self) -> &Rc<Record<Groups>> {
        &self.groups
    }

    pub fn features(&self) -> &Rc<Record<Features>> {
        &self.features
    }

    pub fn lib(&self) -> &Rc<Record<Lib>> {
        &self.lib
    }

    pub fn layers(&self) -> &Rc<LayerSet> {
        &self.layers
    }

    pub fn data(&self) -> &Rc<BlobSet> {
        &self.data
    }

    pub fn images(&self) -> &Rc<BlobSet> {
        &self.images
    }

    pub fn store(&self) -> Option<Rc<dyn FontStore>> {
        self.store.borrow().clone()
    }

    /// Format of the store the document was last opened from or saved to.
    pub fn format_version(&self) -> Option<u32> {
        self.format_version.get()
    }

    pub fn default_layer(&self) -> DocResult<Rc<Layer>> {
        self.layers.default_layer()
    }

    pub fn glyph_names(&self) -> DocResult<Vec<String>> {
        Ok(self.default_layer()?.glyph_names())
    }

    pub fn contains_glyph(&self, name: &str) -> bool {
        self.default_layer()
            .map(|layer| layer.contains(name))
            .unwrap_or(false)
    }

    pub fn glyph(&self, name: &str) -> DocResult<Rc<Glyph>> {
        self.default_layer()?.glyph(name)
    }

    pub fn new_glyph(&self, name: &str) -> DocResult<Rc<Glyph>> {
        Ok(self.default_layer()?.new_glyph(name))
    }

    pub fn remove_glyph(&self, name: &str) -> DocResult<()> {
        self.default_layer()?.remove_glyph(name)
    }

    /// Image names no glyph in any layer refers to. Loads every glyph.
    pub fn unreferenced_images(&self) -> DocResult<Vec<String>> {
        let mut referenced = BTreeSet::new();
        for layer in self.layers.layers() {
            referenced.extend(layer.image_references()?.into_keys());
        }
        Ok(self
            .images
            .file_names()
            .into_iter()
            .filter(|name| !referenced.contains(name))
            .collect())
    }

    /// Saves in place.
    pub fn save(&self) -> DocResult<()> {
        self.save_with(None, SaveOptions::default())
    }

    /// Saves into `target`, which becomes the document's store.
    pub fn save_as(&self, target: Rc<dyn FontStore>) -> DocResult<()> {
        self.save_with(Some(target), SaveOptions::default())
    }

    /// Saves into `target`, or in place when `None`.
    ///
    /// A target at the current store's location is an in-place save: the
    /// layer history is replayed and only dirty items are written. Any other
    /// target gets a full copy. An in-place save in a different format
    /// rewrites the singleton records.
    pub fn save_with(&self, target: Option<Rc<dyn FontStore>>, options: SaveOptions) -> DocResult<()> {
        let current = self.store();
        let (target, save_as) = match target {
            Some(target) => {
                let in_place = current
                    .as_ref()
                    .is_some_and(|current| current.location() == target.location());
                (target, !in_place)
            }
            None => (current.ok_or(DocError::NoStore)?, false),
        };
        let format_version = target.format_version();
        let format_changed = !save_as
            && self
                .format_version
                .get()
                .is_some_and(|previous| previous != format_version);
        let force = save_as || format_changed;

        if options.remove_unreferenced_images {
            let unreferenced = self.unreferenced_images()?;
            self.images.base().disable_notifications(None);
            let removed = unreferenced
                .iter()
                .try_for_each(|name| self.images.remove(name));
            self.images.base().enable_notifications(None);
            removed?;
        }

        let mut records_written = 0_usize;
        records_written += usize::from(self.info.save(&*target, force)?);
        records_written += usize::from(self.groups.save(&*target, force)?);
        records_written += usize::from(self.kerning.save(&*target, force)?);
        if format_version >= 2 {
            records_written += usize::from(self.features.save(&*target, force)?);
        }
        records_written += usize::from(self.lib.save(&*target, force)?);
        self.layers.save(&target, save_as)?;
        if format_version >= 3 {
            self.images.save(&target, save_as)?;
            self.data.save(&target, save_as)?;
        }

        *self.store.borrow_mut() = Some(target.clone());
        self.format_version.set(Some(format_version));
        if self.is_dirty() {
            self.set_dirty(false);
        }
        info!(
            "event=font_save module=font status=ok location={} save_as={save_as} format={format_version} format_changed={format_changed} records={records_written}",
            target.location()
        );
        Ok(())
    }

    /// Compares every container with the store.
    pub fn test_for_external_changes(&self) -> DocResult<FontChanges> {
        let Some(store) = self.store() else {
            return Ok(FontChanges::default());
        };
        let format_version = store.format_version();
        let mut changes = FontChanges {
            info: self.info.has_external_changes(&*store)?,
            kerning: self.kerning.has_external_changes(&*store)?,
            groups: self.groups.has_external_changes(&*store)?,
            lib: self.lib.has_external_changes(&*store)?,
            layers: self.layers.test_for_external_changes()?,
            ..FontChanges::default()
        };
        if format_version >= 2 {
            changes.features = self.features.has_external_changes(&*store)?;
        }
        if format_version >= 3 {
            changes.images = self.images.test_for_external_changes()?;
            changes.data = self.data.test_for_external_changes()?;
        }
        info!(
            "event=font_reconcile module=font status=ok changed={}",
            !changes.is_empty()
        );
        Ok(changes)
    }

    /// Applies a report from [`test_for_external_changes`](Self::test_for_external_changes),
    /// discarding unsaved edits to the affected items.
    pub fn reload(&self, changes: &FontChanges) -> DocResult<()> {
        let store = self.store().ok_or(DocError::NoStore)?;
        if changes.info {
            self.info.reload(&*store)?;
        }
        // Kerning refers to groups, so groups come first.
        if changes.groups {
            self.groups.reload(&*store)?;
        }
        if changes.kerning {
            self.kerning.reload(&*store)?;
        }
        if changes.features {
            self.features.reload(&*store)?;
        }
        if changes.lib {
            self.lib.reload(&*store)?;
        }
        if !changes.images.is_empty() {
            self.images.reload(&changes.images.affected())?;
        }
        if !changes.data.is_empty() {
            self.data.reload(&changes.data.affected())?;
        }
        if !changes.layers.is_empty() {
            self.layers.reload_layers(&changes.layers)?;
            self.post_notification(FONT_RELOADED_LAYERS, NotificationData::None);
            self.post_notification(FONT_RELOADED_GLYPHS, NotificationData::None);
        }
        info!("event=font_reload module=font status=ok");
        Ok(())
    }

    fn on_child_changed(&self, notification: &Notification) {
        if notification.data() == &NotificationData::Dirty(true) {
            self.set_dirty(true);
        }
    }
}
