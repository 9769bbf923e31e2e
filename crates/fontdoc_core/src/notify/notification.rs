use std::any::Any;
use std::fmt::{Display, Formatter};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identity of an observable for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Allocates a fresh, never reused identity.
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Anything that can be the source of a notification.
pub trait Observable: Any {
    /// Identity plus a weak handle back to the object.
    fn observable_ref(&self) -> ObservableRef;

    /// Upcast used to recover the concrete type of a notification source.
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;

    fn object_id(&self) -> ObjectId {
        self.observable_ref().id()
    }
}

/// Weak, identity-carrying reference to an observable.
#[derive(Debug, Clone)]
pub struct ObservableRef {
    id: ObjectId,
    target: Weak<dyn Observable>,
}

impl ObservableRef {
    /// Allocates a new identity for `target`. Call once per object.
    pub fn new<T: Observable>(target: &Weak<T>) -> Self {
        let target: Weak<dyn Observable> = target.clone();
        Self {
            id: ObjectId::next(),
            target,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Rc<dyn Observable>> {
        self.target.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }
}

/// Payload attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NotificationData {
    #[default]
    None,
    /// New dirty state of the posting object.
    Dirty(bool),
    Name(String),
    Renamed {
        old: String,
        new: String,
    },
    Names(Vec<String>),
    Unicodes {
        old: Vec<u32>,
        new: Vec<u32>,
    },
    Text(String),
}

/// A posted notification: name, weak source and payload.
#[derive(Debug, Clone)]
pub struct Notification {
    name: String,
    source: ObservableRef,
    data: NotificationData,
}

impl Notification {
    pub fn new(name: impl Into<String>, source: ObservableRef, data: NotificationData) -> Self {
        Self {
            name: name.into(),
            source,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_id(&self) -> ObjectId {
        self.source.id()
    }

    pub fn source_ref(&self) -> &ObservableRef {
        &self.source
    }

    /// The posting object, or `None` once it has been dropped.
    pub fn source(&self) -> Option<Rc<dyn Observable>> {
        self.source.upgrade()
    }

    /// The posting object downcast to its concrete type.
    pub fn source_as<T: Observable>(&self) -> Option<Rc<T>> {
        self.source()?.into_any().downcast::<T>().ok()
    }

    pub fn data(&self) -> &NotificationData {
        &self.data
    }

    /// Same name, same source and same payload.
    pub(crate) fn same_event(&self, other: &Self) -> bool {
        self.name == other.name && self.source.id == other.source.id && self.data == other.data
    }
}
