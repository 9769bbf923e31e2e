//! Layer: a lazily loaded, stamped collection of glyphs.

use crate::model::base::{impl_document_object, DocumentObject, ObjectBase, ObjectKind};
use crate::model::error::{DocError, DocResult};
use crate::model::glyph::{
    Glyph, GlyphData, GLYPH_NAME_CHANGED, GLYPH_UNICODES_CHANGED,
};
use crate::model::layer_set::LayerSet;
use crate::model::representation::{
    RepresentationCache, RepresentationParams, RepresentationRegistry, Represented,
};
use crate::model::stamp::{ChangeSet, Stamp, StampLedger};
use crate::notify::{Notification, NotificationData, Observable, ObservableRef, ObserverId};
use crate::repo::{copy_entry, EntryKind, FontStore};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

pub const LAYER_NAME_CHANGED: &str = "Layer.NameChanged";
pub const LAYER_GLYPH_CHANGED: &str = "Layer.GlyphChanged";
pub const LAYER_GLYPH_ADDED: &str = "Layer.GlyphAdded";
pub const LAYER_GLYPH_DELETED: &str = "Layer.GlyphDeleted";
pub const LAYER_GLYPH_NAME_CHANGED: &str = "Layer.GlyphNameChanged";
pub const LAYER_GLYPH_UNICODES_CHANGED: &str = "Layer.GlyphUnicodesChanged";
pub const LAYER_GLYPHS_RELOADED: &str = "Layer.GlyphsReloaded";

/// Built-in representation: `BTreeMap<u32, Vec<String>>`, code point to
/// glyph names.
pub const UNICODE_MAP: &str = "unicode_map";

#[derive(Clone)]
struct LayerStorage {
    store: Rc<dyn FontStore>,
    glyph_set: String,
}

impl LayerStorage {
    fn kind(&self) -> EntryKind {
        EntryKind::Glyphs(self.glyph_set.clone())
    }
}

#[derive(Serialize, Deserialize)]
struct LayerTransport {
    name: String,
    glyphs: Vec<GlyphData>,
}

pub struct Layer {
    me: Weak<Layer>,
    base: ObjectBase,
    representations: RepresentationCache,
    name: RefCell<String>,
    storage: RefCell<Option<LayerStorage>>,
    glyphs: RefCell<BTreeMap<String, Rc<Glyph>>>,
    ledger: RefCell<StampLedger>,
}

impl_document_object!(Layer);

impl Represented for Layer {
    fn representation_cache(&self) -> &RepresentationCache {
        &self.representations
    }

    fn weak_self(&self) -> Weak<Self> {
        self.me.clone()
    }

    fn register_builtin_representations(registry: &mut RepresentationRegistry<Self>) {
        registry.register(
            UNICODE_MAP,
            &[
                LAYER_GLYPH_ADDED,
                LAYER_GLYPH_DELETED,
                LAYER_GLYPH_NAME_CHANGED,
                LAYER_GLYPH_UNICODES_CHANGED,
                LAYER_GLYPHS_RELOADED,
            ],
            |layer: &Layer, _params: &RepresentationParams| {
                let mut map: BTreeMap<u32, Vec<String>> = BTreeMap::new();
                for name in layer.glyph_names() {
                    let Ok(glyph) = layer.glyph(&name) else {
                        continue;
                    };
                    for unicode in glyph.unicodes() {
                        map.entry(unicode).or_default().push(name.clone());
                    }
                }
                map
            },
        );
    }
}

impl Layer {
    pub(crate) fn new(name: &str) -> Rc<Self> {
        Rc::new_cyclic(|me: &Weak<Self>| Self {
            me: me.clone(),
            base: ObjectBase::new(ObjectKind::Layer, ObservableRef::new(me)),
            representations: RepresentationCache::default(),
            name: RefCell::new(name.to_owned()),
            storage: RefCell::new(None),
            glyphs: RefCell::new(BTreeMap::new()),
            ledger: RefCell::new(StampLedger::default()),
        })
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    /// Renames the layer. Fails before any mutation when the owning layer set
    /// already has `name`.
    pub fn set_name(&self, name: &str) -> DocResult<()> {
        let old = self.name();
        if old == name {
            return Ok(());
        }
        if let Some(layer_set) = self.layer_set() {
            if layer_set.contains(name) {
                return Err(DocError::DuplicateLayerName(name.to_owned()));
            }
        }
        *self.name.borrow_mut() = name.to_owned();
        self.post_notification(
            LAYER_NAME_CHANGED,
            NotificationData::Renamed {
                old,
                new: name.to_owned(),
            },
        );
        self.set_dirty(true);
        Ok(())
    }

    pub fn layer_set(&self) -> Option<Rc<LayerSet>> {
        self.base.parent()?.into_any().downcast::<LayerSet>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ledger.borrow().contains(name)
    }

    pub fn len(&self) -> usize {
        self.ledger.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted names of every glyph, loaded or not.
    pub fn glyph_names(&self) -> Vec<String> {
        self.ledger.borrow().names()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.glyphs.borrow().contains_key(name)
    }

    pub fn loaded_glyphs(&self) -> Vec<Rc<Glyph>> {
        self.glyphs.borrow().values().cloned().collect()
    }

    /// Returns the glyph, reading it from storage on first access.
    pub fn glyph(&self, name: &str) -> DocResult<Rc<Glyph>> {
        let loaded = self.glyphs.borrow().get(name).cloned();
        if let Some(glyph) = loaded {
            return Ok(glyph);
        }
        if !self.contains(name) {
            return Err(DocError::GlyphNotFound(name.to_owned()));
        }
        self.load_glyph(name)
    }

    /// Creates an empty glyph, replacing any glyph with the same name.
    pub fn new_glyph(&self, name: &str) -> Rc<Glyph> {
        let glyph = Glyph::new(name);
        self.install_glyph(glyph.clone());
        glyph
    }

    /// Inserts a copy of `source`'s record, optionally under another name.
    pub fn insert_glyph(&self, source: &Glyph, name: Option<&str>) -> DocResult<Rc<Glyph>> {
        let mut data = source.data();
        if let Some(name) = name {
            data.name = name.to_owned();
        }
        let glyph = Glyph::from_data(data)?;
        self.install_glyph(glyph.clone());
        Ok(glyph)
    }

    /// Moves a detached glyph object into this layer.
    pub fn adopt_glyph(&self, glyph: Rc<Glyph>) -> DocResult<()> {
        if let Some(owner) = glyph.layer() {
            if owner.object_id() == self.object_id() {
                return Ok(());
            }
            return Err(DocError::ForeignParent {
                object: "glyph",
                name: glyph.name(),
            });
        }
        self.install_glyph(glyph);
        Ok(())
    }

    /// Deletes a glyph. Its stored record is removed on the next save.
    pub fn remove_glyph(&self, name: &str) -> DocResult<()> {
        if !self.contains(name) {
            return Err(DocError::GlyphNotFound(name.to_owned()));
        }
        let glyph = self.glyphs.borrow().get(name).cloned();
        let held = glyph.as_ref().map(|glyph| glyph.stamp()).unwrap_or_default();
        let stamp = self.stored_stamp(held, name)?;
        if let Some(glyph) = &glyph {
            self.glyphs.borrow_mut().remove(name);
            glyph.take_stamp();
        }
        self.ledger.borrow_mut().schedule_deletion(name, stamp);
        if let Some(glyph) = glyph {
            self.detach_glyph(&glyph);
        }
        self.post_notification(LAYER_GLYPH_DELETED, NotificationData::Name(name.to_owned()));
        self.set_dirty(true);
        Ok(())
    }

    /// Names scheduled for removal from storage at the next save.
    pub fn scheduled_for_deletion(&self) -> Vec<String> {
        self.ledger.borrow().scheduled_names()
    }

    /// Base glyph name to the loaded glyphs that use it as a component.
    pub fn component_references(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut references: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for glyph in self.loaded_glyphs() {
            let name = glyph.name();
            for component in glyph.components() {
                references
                    .entry(component.base_glyph)
                    .or_default()
                    .insert(name.clone());
            }
        }
        references
    }

    /// Image file name to the glyphs referencing it. Loads every glyph.
    pub fn image_references(&self) -> DocResult<BTreeMap<String, BTreeSet<String>>> {
        let mut references: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name in self.glyph_names() {
            if let Some(image) = self.glyph(&name)?.image() {
                references.entry(image).or_default().insert(name);
            }
        }
        Ok(references)
    }

    /// Serializes every glyph of the layer into a self-contained blob.
    pub fn to_transport_blob(&self) -> DocResult<Vec<u8>> {
        let mut glyphs = Vec::new();
        for name in self.glyph_names() {
            glyphs.push(self.glyph(&name)?.data());
        }
        let transport = LayerTransport {
            name: self.name(),
            glyphs,
        };
        Ok(serde_json::to_vec(&transport)?)
    }

    /// Inserts the glyphs of a transport blob, replacing same-named glyphs.
    /// Returns the inserted names.
    pub fn load_transport_blob(&self, blob: &[u8]) -> DocResult<Vec<String>> {
        let transport: LayerTransport = serde_json::from_slice(blob)?;
        let mut glyphs = Vec::with_capacity(transport.glyphs.len());
        for data in transport.glyphs {
            glyphs.push(Glyph::from_data(data)?);
        }
        let mut names = Vec::with_capacity(glyphs.len());
        for glyph in glyphs {
            names.push(glyph.name());
            self.install_glyph(glyph);
        }
        Ok(names)
    }

    /// Compares loaded glyphs and the glyph listing with storage.
    pub fn test_for_external_changes(&self) -> DocResult<ChangeSet> {
        let Some(storage) = self.storage() else {
            return Ok(ChangeSet::default());
        };
        let loaded: Vec<(String, Stamp)> = self
            .glyphs
            .borrow()
            .iter()
            .map(|(name, glyph)| (name.clone(), glyph.stamp()))
            .collect();
        let changes = self.ledger.borrow_mut().reconcile(
            &*storage.store,
            &storage.kind(),
            loaded.iter().map(|(name, stamp)| (name.as_str(), stamp)),
        )?;
        debug!(
            "event=layer_reconcile module=layer status=ok layer={} modified={} added={} deleted={}",
            self.name(),
            changes.modified.len(),
            changes.added.len(),
            changes.deleted.len()
        );
        Ok(changes)
    }

    /// Re-reads the named glyphs from storage.
    ///
    /// Names no longer stored are dropped without scheduling a removal.
    /// Unloaded names are simply loaded. Loaded glyphs drop their
    /// representations and take the stored record. Loaded glyphs using a
    /// reloaded glyph as a component are told to refresh.
    pub fn reload_glyphs(&self, names: &[String]) -> DocResult<()> {
        let Some(storage) = self.storage() else {
            return Ok(());
        };
        let kind = storage.kind();
        for name in names {
            let loaded = self.glyphs.borrow().get(name).cloned();
            match loaded {
                None => {
                    if storage.store.mod_time(&kind, name)?.is_none() {
                        self.forget_glyph(name, None);
                        continue;
                    }
                    self.ledger.borrow_mut().insert(name);
                    self.load_glyph(name)?;
                }
                Some(glyph) => {
                    let stamp = Stamp::capture(&*storage.store, &kind, name)?;
                    let Some(bytes) = stamp.content() else {
                        self.forget_glyph(name, Some(&glyph));
                        continue;
                    };
                    let data = GlyphData::decode(bytes)?;
                    glyph.invalidate_all_representations();
                    glyph.replace_data(data, false)?;
                    glyph.set_stamp(stamp);
                    glyph.set_dirty(false);
                }
            }
        }

        let references = self.component_references();
        let mut refreshed = BTreeSet::new();
        for name in names {
            let Some(users) = references.get(name) else {
                continue;
            };
            for user in users {
                if names.contains(user) || !refreshed.insert(user.clone()) {
                    continue;
                }
                let glyph = self.glyphs.borrow().get(user).cloned();
                if let Some(glyph) = glyph {
                    glyph.invalidate_all_representations();
                    glyph.post_notification(
                        ObjectKind::Glyph.changed_notification(),
                        NotificationData::Dirty(glyph.is_dirty()),
                    );
                }
            }
        }

        self.post_notification(LAYER_GLYPHS_RELOADED, NotificationData::Names(names.to_vec()));
        debug!(
            "event=layer_reload module=layer status=ok layer={} glyphs={} dependents={}",
            self.name(),
            names.len(),
            refreshed.len()
        );
        Ok(())
    }

    pub(crate) fn load_from(&self, store: Rc<dyn FontStore>, glyph_set: &str) -> DocResult<()> {
        let storage = LayerStorage {
            store,
            glyph_set: glyph_set.to_owned(),
        };
        let listing = storage.store.list_entries(&storage.kind())?;
        let count = listing.len();
        for glyph in self.loaded_glyphs() {
            self.detach_glyph(&glyph);
        }
        self.glyphs.borrow_mut().clear();
        *self.ledger.borrow_mut() = StampLedger::from_listing(listing);
        *self.storage.borrow_mut() = Some(storage);
        self.base.set_dirty_silently(false);
        debug!(
            "event=layer_load module=layer status=ok layer={} glyphs={count}",
            self.name()
        );
        Ok(())
    }

    /// Writes dirty glyphs into the target's glyph set named after the layer.
    ///
    /// Saving somewhere other than the current storage copies unloaded
    /// records from there and rewrites every loaded glyph. An in-place save
    /// removes the records of deleted glyphs.
    pub(crate) fn save(&self, target: &Rc<dyn FontStore>, save_as: bool) -> DocResult<()> {
        let name = self.name();
        let kind = EntryKind::Glyphs(name.clone());
        let mut copied = 0_usize;
        let mut written = 0_usize;
        let mut removed = 0_usize;

        let source = self
            .storage()
            .filter(|source| source.store.location() != target.location());
        let relocating = save_as || source.is_some();
        if relocating {
            if let Some(source) = source {
                let source_kind = source.kind();
                for glyph_name in self.glyph_names() {
                    if self.is_loaded(&glyph_name) {
                        continue;
                    }
                    match copy_entry(&*source.store, &source_kind, &**target, &kind, &glyph_name) {
                        Ok(()) => copied += 1,
                        Err(err) if err.is_not_found() => warn!(
                            "event=glyph_copy module=layer status=missing layer={name} glyph={glyph_name}"
                        ),
                        Err(err) => return Err(err.into()),
                    }
                }
            }
            for glyph in self.loaded_glyphs() {
                glyph.set_dirty(true);
            }
        }

        let glyphs: Vec<(String, Rc<Glyph>)> = self
            .glyphs
            .borrow()
            .iter()
            .map(|(glyph_name, glyph)| (glyph_name.clone(), glyph.clone()))
            .collect();
        for (glyph_name, glyph) in glyphs {
            if !glyph.is_dirty() {
                continue;
            }
            target.write_entry(&kind, &glyph_name, &glyph.data().encode()?)?;
            glyph.set_stamp(Stamp::capture(&**target, &kind, &glyph_name)?);
            glyph.set_dirty(false);
            written += 1;
        }

        if !save_as {
            let scheduled = self.ledger.borrow().scheduled_names();
            for glyph_name in scheduled {
                match target.remove_entry(&kind, &glyph_name) {
                    Ok(()) => removed += 1,
                    Err(err) if err.is_not_found() => debug!(
                        "event=glyph_remove module=layer status=already_gone layer={name} glyph={glyph_name}"
                    ),
                    Err(err) => return Err(err.into()),
                }
            }
        }

        self.ledger.borrow_mut().finish_save();
        *self.storage.borrow_mut() = Some(LayerStorage {
            store: target.clone(),
            glyph_set: name.clone(),
        });
        if self.is_dirty() {
            self.set_dirty(false);
        }
        debug!(
            "event=layer_save module=layer status=ok layer={name} relocating={relocating} written={written} copied={copied} removed={removed}"
        );
        Ok(())
    }

    /// Name of the glyph set this layer was last loaded from or saved to.
    pub(crate) fn glyph_set_name(&self) -> Option<String> {
        self.storage
            .borrow()
            .as_ref()
            .map(|storage| storage.glyph_set.clone())
    }

    fn storage(&self) -> Option<LayerStorage> {
        self.storage.borrow().clone()
    }

    fn stored_stamp(&self, held: Stamp, name: &str) -> DocResult<Stamp> {
        match self.storage() {
            Some(storage) => Ok(held.or_stored(&*storage.store, &storage.kind(), name)?),
            None => Ok(held),
        }
    }

    fn load_glyph(&self, name: &str) -> DocResult<Rc<Glyph>> {
        let storage = self
            .storage()
            .ok_or_else(|| DocError::GlyphNotFound(name.to_owned()))?;
        let stamp = Stamp::capture(&*storage.store, &storage.kind(), name)?;
        let Some(bytes) = stamp.content() else {
            return Err(DocError::GlyphNotFound(name.to_owned()));
        };
        let mut data = GlyphData::decode(bytes)?;
        data.name = name.to_owned();
        let glyph = Glyph::from_data(data)?;
        glyph.set_stamp(stamp);
        self.glyphs
            .borrow_mut()
            .insert(name.to_owned(), glyph.clone());
        self.attach_glyph(&glyph);
        Ok(glyph)
    }

    fn forget_glyph(&self, name: &str, glyph: Option<&Rc<Glyph>>) {
        if !self.contains(name) {
            return;
        }
        if let Some(glyph) = glyph {
            self.glyphs.borrow_mut().remove(name);
            self.detach_glyph(glyph);
        }
        self.ledger.borrow_mut().forget(name);
        self.post_notification(LAYER_GLYPH_DELETED, NotificationData::Name(name.to_owned()));
    }

    /// Adds `glyph`, replacing a same-named one. The newcomer inherits what
    /// storage held for the name.
    fn install_glyph(&self, glyph: Rc<Glyph>) {
        let name = glyph.name();
        let previous = self.glyphs.borrow_mut().remove(&name);
        let mut stamp = Stamp::default();
        if let Some(previous) = previous {
            stamp = previous.take_stamp();
            self.detach_glyph(&previous);
        }
        if let Some(cancelled) = self.ledger.borrow_mut().insert(&name) {
            stamp = cancelled;
        }
        glyph.set_stamp(stamp);
        self.glyphs.borrow_mut().insert(name.clone(), glyph.clone());
        self.attach_glyph(&glyph);
        self.post_notification(LAYER_GLYPH_ADDED, NotificationData::Name(name));
        glyph.set_dirty(true);
        if !self.is_dirty() {
            self.set_dirty(true);
        }
    }

    fn attach_glyph(&self, glyph: &Rc<Glyph>) {
        // Edits made while detached were not observed.
        glyph.invalidate_all_representations();
        let parent: Weak<dyn DocumentObject> = self.me.clone();
        glyph.base().set_parent(Some(parent));
        let Some(center) = self.notification_center() else {
            return;
        };
        let target = glyph.observable_ref();
        center.subscribe_weak(
            self.me.clone(),
            Layer::on_glyph_changed,
            Some(ObjectKind::Glyph.changed_notification()),
            Some(&target),
        );
        center.subscribe_weak(
            self.me.clone(),
            Layer::on_glyph_renamed,
            Some(GLYPH_NAME_CHANGED),
            Some(&target),
        );
        center.subscribe_weak(
            self.me.clone(),
            Layer::on_glyph_unicodes_changed,
            Some(GLYPH_UNICODES_CHANGED),
            Some(&target),
        );
        glyph.observe_self();
    }

    fn detach_glyph(&self, glyph: &Rc<Glyph>) {
        if let Some(center) = self.notification_center() {
            let observer = ObserverId::of_weak(&self.me);
            let target = Some(glyph.object_id());
            center.unsubscribe_id(observer, Some(ObjectKind::Glyph.changed_notification()), target);
            center.unsubscribe_id(observer, Some(GLYPH_NAME_CHANGED), target);
            center.unsubscribe_id(observer, Some(GLYPH_UNICODES_CHANGED), target);
        }
        glyph.stop_observing_self();
        glyph.base().set_parent(None);
    }

    fn on_glyph_changed(&self, notification: &Notification) {
        if notification.data() != &NotificationData::Dirty(true) {
            return;
        }
        let name = notification
            .source_as::<Glyph>()
            .map(|glyph| glyph.name())
            .unwrap_or_default();
        self.post_notification(LAYER_GLYPH_CHANGED, NotificationData::Name(name));
        self.set_dirty(true);
    }

    fn on_glyph_renamed(&self, notification: &Notification) {
        let NotificationData::Renamed { old, new } = notification.data() else {
            return;
        };
        let Some(glyph) = self.glyphs.borrow_mut().remove(old) else {
            return;
        };
        let stamp = self
            .stored_stamp(glyph.take_stamp(), old)
            .unwrap_or_else(|err| {
                warn!("event=glyph_rename module=layer status=stamp_unavailable name={old} error={err}");
                Stamp::default()
            });
        {
            let mut ledger = self.ledger.borrow_mut();
            ledger.schedule_deletion(old, stamp);
            if let Some(cancelled) = ledger.insert(new) {
                glyph.set_stamp(cancelled);
            }
        }
        self.glyphs.borrow_mut().insert(new.clone(), glyph);
        self.post_notification(LAYER_GLYPH_NAME_CHANGED, notification.data().clone());
    }

    fn on_glyph_unicodes_changed(&self, notification: &Notification) {
        self.post_notification(LAYER_GLYPH_UNICODES_CHANGED, notification.data().clone());
    }
}
