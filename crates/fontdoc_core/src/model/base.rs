//! Shared behavior of every document object.

use crate::notify::{Notification, NotificationCenter, NotificationData, NotificationScope};
use crate::notify::{ObjectId, Observable, ObservableRef, ObserverId};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Concrete kind of a document object; drives notification names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Font,
    Info,
    Kerning,
    Groups,
    Features,
    Lib,
    LayerSet,
    Layer,
    Glyph,
    DataSet,
    ImageSet,
}

impl ObjectKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Font => "Font",
            Self::Info => "Info",
            Self::Kerning => "Kerning",
            Self::Groups => "Groups",
            Self::Features => "Features",
            Self::Lib => "Lib",
            Self::LayerSet => "LayerSet",
            Self::Layer => "Layer",
            Self::Glyph => "Glyph",
            Self::DataSet => "DataSet",
            Self::ImageSet => "ImageSet",
        }
    }

    /// `<Type>.Changed`, posted whenever the dirty flag is assigned.
    pub fn changed_notification(self) -> &'static str {
        match self {
            Self::Font => "Font.Changed",
            Self::Info => "Info.Changed",
            Self::Kerning => "Kerning.Changed",
            Self::Groups => "Groups.Changed",
            Self::Features => "Features.Changed",
            Self::Lib => "Lib.Changed",
            Self::LayerSet => "LayerSet.Changed",
            Self::Layer => "Layer.Changed",
            Self::Glyph => "Glyph.Changed",
            Self::DataSet => "DataSet.Changed",
            Self::ImageSet => "ImageSet.Changed",
        }
    }
}

/// Undo-manager hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoEvent {
    BeginUndo,
    EndUndo,
    BeginRedo,
    EndRedo,
}

impl UndoEvent {
    fn suffix(self) -> &'static str {
        match self {
            Self::BeginUndo => "BeginUndo",
            Self::EndUndo => "EndUndo",
            Self::BeginRedo => "BeginRedo",
            Self::EndRedo => "EndRedo",
        }
    }
}

/// State every document object embeds: identity, dirty flag, parent link and
/// the lazily resolved notification center.
pub struct ObjectBase {
    kind: ObjectKind,
    me: ObservableRef,
    dirty: Cell<bool>,
    parent: RefCell<Option<Weak<dyn DocumentObject>>>,
    center: RefCell<Weak<NotificationCenter>>,
}

impl ObjectBase {
    pub fn new(kind: ObjectKind, me: ObservableRef) -> Self {
        Self {
            kind,
            me,
            dirty: Cell::new(false),
            parent: RefCell::new(None),
            center: RefCell::new(Weak::new()),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.me.id()
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn observable_ref(&self) -> ObservableRef {
        self.me.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Assigns the dirty flag and posts `<Type>.Changed` carrying it.
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.set(dirty);
        self.post(self.kind.changed_notification(), NotificationData::Dirty(dirty));
    }

    /// Assigns the dirty flag without posting; used while loading.
    pub(crate) fn set_dirty_silently(&self, dirty: bool) {
        self.dirty.set(dirty);
    }

    pub fn parent(&self) -> Option<Rc<dyn DocumentObject>> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Option<Weak<dyn DocumentObject>>) {
        if parent.is_none() {
            *self.center.borrow_mut() = Weak::new();
        }
        *self.parent.borrow_mut() = parent;
    }

    pub(crate) fn attach_center(&self, center: &Rc<NotificationCenter>) {
        *self.center.borrow_mut() = Rc::downgrade(center);
    }

    /// The center of the owning document, found through the parent chain and
    /// cached once resolved.
    pub fn notification_center(&self) -> Option<Rc<NotificationCenter>> {
        let cached = self.center.borrow().upgrade();
        if cached.is_some() {
            return cached;
        }
        let center = self.parent()?.base().notification_center()?;
        *self.center.borrow_mut() = Rc::downgrade(&center);
        Some(center)
    }

    /// Posts on behalf of the owning object. A detached object posts nothing.
    pub fn post(&self, name: &str, data: NotificationData) {
        if let Some(center) = self.notification_center() {
            center.dispatch(Notification::new(name, self.me.clone(), data));
        }
    }

    fn scope(&self, notification: Option<&str>) -> NotificationScope {
        let scope = NotificationScope::all().observable_id(self.id());
        match notification {
            Some(name) => scope.notification(name),
            None => scope,
        }
    }

    /// Registers `observer` for notifications this object posts. Returns
    /// `false` when the object is not attached to a document.
    pub fn add_observer<O: 'static>(
        &self,
        observer: &Rc<O>,
        method: fn(&O, &Notification),
        notification: Option<&str>,
    ) -> bool {
        let Some(center) = self.notification_center() else {
            return false;
        };
        center.subscribe(observer, method, notification, Some(&self.me));
        true
    }

    pub fn remove_observer(&self, observer: ObserverId, notification: Option<&str>) -> bool {
        self.notification_center()
            .is_some_and(|center| center.unsubscribe_id(observer, notification, Some(self.id())))
    }

    pub fn has_observer(&self, observer: ObserverId, notification: Option<&str>) -> bool {
        self.notification_center()
            .is_some_and(|center| center.has_observer(observer, notification, Some(self.id())))
    }

    pub fn hold_notifications(&self, notification: Option<&str>) {
        if let Some(center) = self.notification_center() {
            center.hold_notifications(self.scope(notification));
        }
    }

    pub fn release_held_notifications(&self, notification: Option<&str>) {
        if let Some(center) = self.notification_center() {
            center.release_held_notifications(&self.scope(notification));
        }
    }

    pub fn disable_notifications(&self, notification: Option<&str>) {
        if let Some(center) = self.notification_center() {
            center.disable_notifications(self.scope(notification));
        }
    }

    pub fn enable_notifications(&self, notification: Option<&str>) {
        if let Some(center) = self.notification_center() {
            center.enable_notifications(&self.scope(notification));
        }
    }
}

/// An object of the document graph.
pub trait DocumentObject: Observable {
    fn base(&self) -> &ObjectBase;

    fn kind(&self) -> ObjectKind {
        self.base().kind()
    }

    fn is_dirty(&self) -> bool {
        self.base().is_dirty()
    }

    fn set_dirty(&self, dirty: bool) {
        self.base().set_dirty(dirty);
    }

    fn notification_center(&self) -> Option<Rc<NotificationCenter>> {
        self.base().notification_center()
    }

    fn post_notification(&self, name: &str, data: NotificationData) {
        self.base().post(name, data);
    }

    /// Posts `<Type>.BeginUndo` and friends for an attached undo manager.
    fn post_undo_event(&self, event: UndoEvent) {
        let name = format!("{}.{}", self.kind().name(), event.suffix());
        self.base().post(&name, NotificationData::None);
    }
}

/// Implements [`Observable`] and [`DocumentObject`] for a type with a
/// `base: ObjectBase` field.
macro_rules! impl_document_object {
    ($ty:ty) => {
        impl $crate::notify::Observable for $ty {
            fn observable_ref(&self) -> $crate::notify::ObservableRef {
                self.base.observable_ref()
            }

            fn into_any(self: ::std::rc::Rc<Self>) -> ::std::rc::Rc<dyn ::std::any::Any> {
                self
            }
        }

        impl $crate::model::base::DocumentObject for $ty {
            fn base(&self) -> &$crate::model::base::ObjectBase {
                &self.base
            }
        }
    };
}

pub(crate) use impl_document_object;
