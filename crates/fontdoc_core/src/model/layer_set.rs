//! Layer collection and the structural action history.
//!
//! # Responsibility
//! - Own the layers of a document, their order and the default layer.
//! - Record structural edits since the last save and replay them against the
//!   store so that an in-place save mutates only what changed.
//!
//! # Invariants
//! - `order` is always a permutation of the layer names.
//! - The action history is empty after every save, except for the `New`
//!   entries synthesized after writing a format without layer support.

use crate::model::base::{impl_document_object, DocumentObject, ObjectBase, ObjectKind};
use crate::model::error::{DocError, DocResult};
use crate::model::layer::{Layer, LAYER_NAME_CHANGED};
use crate::model::representation::Represented;
use crate::model::stamp::ChangeSet;
use crate::notify::{Notification, NotificationData, Observable, ObservableRef, ObserverId};
use crate::repo::{FontStore, LayerContents};
use log::{debug, info};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::rc::{Rc, Weak};

pub const LAYER_SET_LAYER_ADDED: &str = "LayerSet.LayerAdded";
pub const LAYER_SET_LAYER_WILL_BE_DELETED: &str = "LayerSet.LayerWillBeDeleted";
pub const LAYER_SET_LAYER_DELETED: &str = "LayerSet.LayerDeleted";
pub const LAYER_SET_DEFAULT_LAYER_CHANGED: &str = "LayerSet.DefaultLayerChanged";
pub const LAYER_SET_LAYER_ORDER_CHANGED: &str = "LayerSet.LayerOrderChanged";
pub const LAYER_SET_LAYERS_RELOADED: &str = "LayerSet.LayersReloaded";

/// Name given to the layer a fresh document starts with.
pub const DEFAULT_LAYER_NAME: &str = "public.default";

/// One structural edit of the layer collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerAction {
    New(String),
    Delete(String),
    Rename { old: String, new: String },
    SetDefault { old: Option<String>, new: String },
}

impl Display for LayerAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New(name) => write!(f, "new:{name}"),
            Self::Delete(name) => write!(f, "delete:{name}"),
            Self::Rename { old, new } => write!(f, "rename:{old}->{new}"),
            Self::SetDefault { old, new } => {
                write!(f, "default:{}->{new}", old.as_deref().unwrap_or("-"))
            }
        }
    }
}

/// External changes found in the layer listing and in each layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerChanges {
    pub default_changed: bool,
    pub order_changed: bool,
    pub added: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    /// Layer name to the glyph changes found in it.
    pub modified: BTreeMap<String, ChangeSet>,
}

impl LayerChanges {
    pub fn is_empty(&self) -> bool {
        !self.default_changed
            && !self.order_changed
            && self.added.is_empty()
            && self.deleted.is_empty()
            && self.modified.is_empty()
    }
}

pub struct LayerSet {
    me: Weak<LayerSet>,
    base: ObjectBase,
    layers: RefCell<BTreeMap<String, Rc<Layer>>>,
    order: RefCell<Vec<String>>,
    default_layer: RefCell<Option<String>>,
    history: RefCell<Vec<LayerAction>>,
    store: RefCell<Option<Rc<dyn FontStore>>>,
    /// Listing as of the last load, save or reload.
    stored: RefCell<LayerContents>,
}

impl_document_object!(LayerSet);

impl LayerSet {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new_cyclic(|me: &Weak<Self>| Self {
            me: me.clone(),
            base: ObjectBase::new(ObjectKind::LayerSet, ObservableRef::new(me)),
            layers: RefCell::new(BTreeMap::new()),
            order: RefCell::new(Vec::new()),
            default_layer: RefCell::new(None),
            history: RefCell::new(Vec::new()),
            store: RefCell::new(None),
            stored: RefCell::new(LayerContents::default()),
        })
    }

    pub fn len(&self) -> usize {
        self.layers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.borrow().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layers.borrow().contains_key(name)
    }

    /// Layers from top to bottom.
    pub fn layers(&self) -> Vec<Rc<Layer>> {
        let layers = self.layers.borrow();
        self.order
            .borrow()
            .iter()
            .filter_map(|name| layers.get(name).cloned())
            .collect()
    }

    pub fn layer(&self, name: &str) -> DocResult<Rc<Layer>> {
        self.layers
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| DocError::LayerNotFound(name.to_owned()))
    }

    pub fn default_layer_name(&self) -> Option<String> {
        self.default_layer.borrow().clone()
    }

    pub fn default_layer(&self) -> DocResult<Rc<Layer>> {
        let name = self.default_layer_name().ok_or(DocError::NoDefaultLayer)?;
        self.layer(&name)
    }

    pub fn set_default_layer(&self, name: &str) -> DocResult<()> {
        if !self.contains(name) {
            return Err(DocError::LayerNotFound(name.to_owned()));
        }
        let old = self.default_layer_name();
        if old.as_deref() == Some(name) {
            return Ok(());
        }
        *self.default_layer.borrow_mut() = Some(name.to_owned());
        self.history.borrow_mut().push(LayerAction::SetDefault {
            old,
            new: name.to_owned(),
        });
        self.post_notification(
            LAYER_SET_DEFAULT_LAYER_CHANGED,
            NotificationData::Name(name.to_owned()),
        );
        self.set_dirty(true);
        Ok(())
    }

    pub fn layer_order(&self) -> Vec<String> {
        self.order.borrow().clone()
    }

    /// Reorders the layers. `order` must name every layer exactly once.
    pub fn set_layer_order(&self, order: &[String]) -> DocResult<()> {
        let current = self.layer_order();
        if current == order {
            return Ok(());
        }
        let wanted: BTreeSet<&String> = order.iter().collect();
        if order.len() != current.len() || wanted.len() != order.len() {
            return Err(DocError::InvalidLayerOrder(format!(
                "expected {} distinct names, got {}",
                current.len(),
                order.len()
            )));
        }
        if let Some(unknown) = order.iter().find(|name| !self.contains(name)) {
            return Err(DocError::InvalidLayerOrder(format!("unknown layer `{unknown}`")));
        }
        *self.order.borrow_mut() = order.to_vec();
        self.post_notification(
            LAYER_SET_LAYER_ORDER_CHANGED,
            NotificationData::Names(order.to_vec()),
        );
        self.set_dirty(true);
        Ok(())
    }

    /// Creates an empty layer at the bottom of the order.
    pub fn new_layer(&self, name: &str) -> DocResult<Rc<Layer>> {
        if self.contains(name) {
            return Err(DocError::DuplicateLayerName(name.to_owned()));
        }
        let layer = self.install_layer(name);
        self.history
            .borrow_mut()
            .push(LayerAction::New(name.to_owned()));
        self.post_notification(LAYER_SET_LAYER_ADDED, NotificationData::Name(name.to_owned()));
        layer.set_dirty(true);
        if !self.is_dirty() {
            self.set_dirty(true);
        }
        Ok(layer)
    }

    /// Deletes a layer. Its stored glyph set is removed on the next save.
    /// Deleting the default layer leaves the collection without one.
    pub fn remove_layer(&self, name: &str) -> DocResult<()> {
        if !self.contains(name) {
            return Err(DocError::LayerNotFound(name.to_owned()));
        }
        self.post_notification(
            LAYER_SET_LAYER_WILL_BE_DELETED,
            NotificationData::Name(name.to_owned()),
        );
        self.drop_layer(name);
        self.history
            .borrow_mut()
            .push(LayerAction::Delete(name.to_owned()));
        self.post_notification(LAYER_SET_LAYER_DELETED, NotificationData::Name(name.to_owned()));
        self.set_dirty(true);
        Ok(())
    }

    /// Structural edits recorded since the last save, oldest first.
    pub fn action_history(&self) -> Vec<LayerAction> {
        self.history.borrow().clone()
    }

    /// Compares the stored layer listing and every stored layer with the
    /// in-memory collection.
    pub fn test_for_external_changes(&self) -> DocResult<LayerChanges> {
        let Some(store) = self.store() else {
            return Ok(LayerChanges::default());
        };
        let contents = store.layer_contents()?;
        let stored = self.stored.borrow().clone();
        let mut changes = LayerChanges {
            default_changed: contents.default != stored.default,
            order_changed: contents.order != stored.order,
            ..LayerChanges::default()
        };
        for name in &contents.order {
            if !stored.contains(name) && !self.contains(name) {
                changes.added.insert(name.clone());
            }
        }
        for name in &stored.order {
            if !contents.contains(name) && self.contains(name) {
                changes.deleted.insert(name.clone());
            }
        }
        for layer in self.layers() {
            let Some(glyph_set) = layer.glyph_set_name() else {
                continue;
            };
            if !stored.contains(&glyph_set) || !contents.contains(&glyph_set) {
                continue;
            }
            let glyph_changes = layer.test_for_external_changes()?;
            if !glyph_changes.is_empty() {
                changes.modified.insert(layer.name(), glyph_changes);
            }
        }
        debug!(
            "event=layers_reconcile module=layer_set status=ok default_changed={} order_changed={} added={} deleted={} modified={}",
            changes.default_changed,
            changes.order_changed,
            changes.added.len(),
            changes.deleted.len(),
            changes.modified.len()
        );
        Ok(changes)
    }

    /// Applies a report produced by
    /// [`test_for_external_changes`](Self::test_for_external_changes).
    pub fn reload_layers(&self, changes: &LayerChanges) -> DocResult<()> {
        let Some(store) = self.store() else {
            return Ok(());
        };
        let contents = store.layer_contents()?;
        let mut touched = Vec::new();

        for name in &changes.deleted {
            if !self.contains(name) {
                continue;
            }
            self.post_notification(
                LAYER_SET_LAYER_WILL_BE_DELETED,
                NotificationData::Name(name.clone()),
            );
            self.drop_layer(name);
            self.post_notification(LAYER_SET_LAYER_DELETED, NotificationData::Name(name.clone()));
            touched.push(name.clone());
        }

        for name in &changes.added {
            if !contents.contains(name) || self.contains(name) {
                continue;
            }
            let layer = self.install_layer(name);
            layer.load_from(store.clone(), name)?;
            self.post_notification(LAYER_SET_LAYER_ADDED, NotificationData::Name(name.clone()));
            touched.push(name.clone());
        }

        for (name, glyph_changes) in &changes.modified {
            let layer = self.layers.borrow().get(name).cloned();
            let Some(layer) = layer else {
                continue;
            };
            layer.reload_glyphs(&glyph_changes.affected())?;
            touched.push(name.clone());
        }

        if changes.order_changed {
            let mut order: Vec<String> = contents
                .order
                .iter()
                .filter(|name| self.contains(name))
                .cloned()
                .collect();
            for name in self.layer_order() {
                if !order.contains(&name) {
                    order.push(name);
                }
            }
            *self.order.borrow_mut() = order.clone();
            self.post_notification(LAYER_SET_LAYER_ORDER_CHANGED, NotificationData::Names(order));
        }

        if changes.default_changed {
            if let Some(name) = contents.default.as_deref().filter(|name| self.contains(name)) {
                *self.default_layer.borrow_mut() = Some(name.to_owned());
                self.post_notification(
                    LAYER_SET_DEFAULT_LAYER_CHANGED,
                    NotificationData::Name(name.to_owned()),
                );
            }
        }

        *self.stored.borrow_mut() = contents;
        self.post_notification(LAYER_SET_LAYERS_RELOADED, NotificationData::Names(touched));
        info!("event=layers_reload module=layer_set status=ok");
        Ok(())
    }

    /// Creates the starting layer of a fresh document when there is none.
    pub(crate) fn ensure_default_layer(&self) -> DocResult<Rc<Layer>> {
        if let Ok(layer) = self.default_layer() {
            return Ok(layer);
        }
        let layer = match self.layers().into_iter().next() {
            Some(layer) => layer,
            None => self.new_layer(DEFAULT_LAYER_NAME)?,
        };
        self.set_default_layer(&layer.name())?;
        Ok(layer)
    }

    pub(crate) fn load_from(&self, store: Rc<dyn FontStore>) -> DocResult<()> {
        let contents = store.layer_contents()?;
        for name in self.layer_order() {
            self.drop_layer(&name);
        }
        for name in &contents.order {
            let layer = self.install_layer(name);
            layer.load_from(store.clone(), name)?;
        }
        *self.default_layer.borrow_mut() = contents
            .default
            .clone()
            .filter(|name| contents.contains(name));
        self.history.borrow_mut().clear();
        *self.stored.borrow_mut() = contents;
        *self.store.borrow_mut() = Some(store);
        self.base.set_dirty_silently(false);
        debug!(
            "event=layers_load module=layer_set status=ok layers={}",
            self.len()
        );
        Ok(())
    }

    /// Saves every layer into `target`.
    ///
    /// An in-place save first replays the action history. Formats below 3
    /// only hold the default layer; the other layers are then recorded as
    /// new so that a later save in a newer format creates them.
    pub(crate) fn save(&self, target: &Rc<dyn FontStore>, save_as: bool) -> DocResult<()> {
        let format_version = target.format_version();
        if !save_as {
            self.replay_history(&**target)?;
        }

        let default_name = self.default_layer_name();
        if format_version < 3 {
            let layer = self.default_layer()?;
            let name = layer.name();
            release_stale_default(&**target, Some(&name))?;
            target.ensure_layer(&name, true)?;
            layer.save(target, save_as)?;
        } else {
            release_stale_default(&**target, default_name.as_deref())?;
            let layers: Vec<Rc<Layer>> = self.layers.borrow().values().cloned().collect();
            for layer in layers {
                let name = layer.name();
                target.ensure_layer(&name, default_name.as_deref() == Some(name.as_str()))?;
                layer.save(target, save_as)?;
            }
            let order = self.layer_order();
            if target.layer_contents()?.order != order {
                target.write_layer_order(&order)?;
            }
        }

        {
            let mut history = self.history.borrow_mut();
            history.clear();
            if format_version < 3 {
                for name in self.layer_order() {
                    if default_name.as_deref() != Some(name.as_str()) {
                        history.push(LayerAction::New(name));
                    }
                }
            }
        }
        *self.stored.borrow_mut() = target.layer_contents()?;
        *self.store.borrow_mut() = Some(target.clone());
        if self.is_dirty() {
            self.set_dirty(false);
        }
        info!(
            "event=layers_save module=layer_set status=ok save_as={save_as} format={format_version} layers={}",
            self.len()
        );
        Ok(())
    }

    fn store(&self) -> Option<Rc<dyn FontStore>> {
        self.store.borrow().clone()
    }

    fn replay_history(&self, target: &dyn FontStore) -> DocResult<()> {
        let history = self.action_history();
        for action in &history {
            let contents = target.layer_contents()?;
            let applied = match action {
                LayerAction::New(_) => false,
                LayerAction::Delete(name) => {
                    let present = contents.contains(name);
                    if present {
                        target.remove_layer(name)?;
                    }
                    present
                }
                LayerAction::Rename { old, new } => {
                    let present = contents.contains(old);
                    if present {
                        target.rename_layer(old, new)?;
                    }
                    present
                }
                LayerAction::SetDefault { old, new } => match old {
                    Some(old) if contents.contains(old) && contents.contains(new) => {
                        target.set_layer_default(old, false)?;
                        target.set_layer_default(new, true)?;
                        true
                    }
                    _ => false,
                },
            };
            debug!(
                "event=layer_history_replay module=layer_set status=ok action={action} applied={applied}"
            );
        }
        Ok(())
    }

    fn install_layer(&self, name: &str) -> Rc<Layer> {
        let layer = Layer::new(name);
        self.attach_layer(&layer);
        self.layers
            .borrow_mut()
            .insert(name.to_owned(), layer.clone());
        self.order.borrow_mut().push(name.to_owned());
        layer
    }

    fn drop_layer(&self, name: &str) {
        let layer = self.layers.borrow_mut().remove(name);
        self.order.borrow_mut().retain(|layer| layer != name);
        let is_default = self.default_layer.borrow().as_deref() == Some(name);
        if is_default {
            *self.default_layer.borrow_mut() = None;
        }
        if let Some(layer) = layer {
            self.detach_layer(&layer);
        }
    }

    fn attach_layer(&self, layer: &Rc<Layer>) {
        let parent: Weak<dyn DocumentObject> = self.me.clone();
        layer.base().set_parent(Some(parent));
        let Some(center) = self.notification_center() else {
            return;
        };
        let target = layer.observable_ref();
        center.subscribe_weak(
            self.me.clone(),
            LayerSet::on_layer_changed,
            Some(ObjectKind::Layer.changed_notification()),
            Some(&target),
        );
        center.subscribe_weak(
            self.me.clone(),
            LayerSet::on_layer_renamed,
            Some(LAYER_NAME_CHANGED),
            Some(&target),
        );
        layer.observe_self();
    }

    fn detach_layer(&self, layer: &Rc<Layer>) {
        if let Some(center) = self.notification_center() {
            let observer = ObserverId::of_weak(&self.me);
            let target = Some(layer.object_id());
            center.unsubscribe_id(observer, Some(ObjectKind::Layer.changed_notification()), target);
            center.unsubscribe_id(observer, Some(LAYER_NAME_CHANGED), target);
        }
        layer.stop_observing_self();
        layer.base().set_parent(None);
    }

    fn on_layer_changed(&self, notification: &Notification) {
        if notification.data() == &NotificationData::Dirty(true) {
            self.set_dirty(true);
        }
    }

    fn on_layer_renamed(&self, notification: &Notification) {
        let NotificationData::Renamed { old, new } = notification.data() else {
            return;
        };
        let Some(layer) = self.layers.borrow_mut().remove(old) else {
            return;
        };
        self.layers.borrow_mut().insert(new.clone(), layer);
        for name in self.order.borrow_mut().iter_mut() {
            if name == old {
                *name = new.clone();
            }
        }
        {
            let mut default_layer = self.default_layer.borrow_mut();
            if default_layer.as_deref() == Some(old.as_str()) {
                *default_layer = Some(new.clone());
            }
        }
        self.history.borrow_mut().push(LayerAction::Rename {
            old: old.clone(),
            new: new.clone(),
        });
    }
}

/// Clears the stored default flag when it sits on a layer other than
/// `wanted`, so the wanted layer can take it.
fn release_stale_default(target: &dyn FontStore, wanted: Option<&str>) -> DocResult<()> {
    let contents = target.layer_contents()?;
    if let Some(current) = contents.default {
        if Some(current.as_str()) != wanted {
            target.set_layer_default(&current, false)?;
        }
    }
    Ok(())
}
