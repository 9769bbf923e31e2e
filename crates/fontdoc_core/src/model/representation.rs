//! Lazily computed, cached derived values of document objects.
//!
//! # Responsibility
//! - Keep a per-type registry of named factories with their invalidation sets.
//! - Cache factory results per object, keyed by name and normalized params.
//!
//! # Invariants
//! - A cached value never survives delivery of a notification named in its
//!   factory's invalidation set.
//! - Param order never changes the cache key.

use crate::model::base::DocumentObject;
use crate::model::error::{DocError, DocResult};
use crate::notify::{Notification, ObserverId};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Debug, Formatter};
use std::rc::{Rc, Weak};

/// A single factory parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    /// Bit pattern of an `f64`, with `-0.0` folded into `0.0`.
    Float(u64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(bits) => Some(f64::from_bits(*bits)),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        let value = if value == 0.0 { 0.0 } else { value };
        Self::Float(value.to_bits())
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Factory parameters. Stored sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepresentationParams(BTreeMap<String, ParamValue>);

impl RepresentationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for RepresentationParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepresentationKey {
    pub name: String,
    pub params: RepresentationParams,
}

impl RepresentationKey {
    pub fn new(name: &str, params: RepresentationParams) -> Self {
        Self {
            name: name.to_owned(),
            params,
        }
    }
}

type Factory<T> = Rc<dyn Fn(&T, &RepresentationParams) -> Rc<dyn Any>>;

struct FactoryEntry<T> {
    factory: Factory<T>,
    invalidated_by: BTreeSet<String>,
}

/// Named factories for one object type.
pub struct RepresentationRegistry<T> {
    entries: BTreeMap<String, FactoryEntry<T>>,
}

impl<T: 'static> RepresentationRegistry<T> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) the factory for `name`. Cached values of
    /// `name` are dropped whenever an object posts a notification listed in
    /// `invalidated_by`.
    pub fn register<V, F>(&mut self, name: &str, invalidated_by: &[&str], factory: F)
    where
        V: Any,
        F: Fn(&T, &RepresentationParams) -> V + 'static,
    {
        let factory: Factory<T> =
            Rc::new(move |object, params| Rc::new(factory(object, params)) as Rc<dyn Any>);
        self.entries.insert(
            name.to_owned(),
            FactoryEntry {
                factory,
                invalidated_by: invalidated_by.iter().map(|name| (*name).to_owned()).collect(),
            },
        );
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn invalidation_set(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(name).map(|entry| &entry.invalidated_by)
    }

    fn factory(&self, name: &str) -> Option<Factory<T>> {
        self.entries.get(name).map(|entry| entry.factory.clone())
    }

    fn names_invalidated_by(&self, notification: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.invalidated_by.contains(notification))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

thread_local! {
    static REGISTRIES: RefCell<HashMap<TypeId, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Runs `f` against the registry of `T`, creating it with the built-in
/// factories on first use. `f` must not call back into the registry.
pub fn with_registry<T: Represented, R>(f: impl FnOnce(&mut RepresentationRegistry<T>) -> R) -> R {
    REGISTRIES.with(|cell| {
        let mut registries = cell.borrow_mut();
        let slot = registries.entry(TypeId::of::<T>()).or_insert_with(|| {
            let mut registry = RepresentationRegistry::<T>::new();
            T::register_builtin_representations(&mut registry);
            Box::new(registry) as Box<dyn Any>
        });
        let registry = slot
            .downcast_mut::<RepresentationRegistry<T>>()
            .expect("registry is stored under its own type id");
        f(registry)
    })
}

/// Registers a factory for `T` at runtime.
pub fn register_representation_factory<T, V, F>(name: &str, invalidated_by: &[&str], factory: F)
where
    T: Represented,
    V: Any,
    F: Fn(&T, &RepresentationParams) -> V + 'static,
{
    with_registry::<T, _>(|registry| registry.register(name, invalidated_by, factory));
}

pub fn unregister_representation_factory<T: Represented>(name: &str) -> bool {
    with_registry::<T, _>(|registry| registry.unregister(name))
}

pub fn representation_factory_names<T: Represented>() -> Vec<String> {
    with_registry::<T, _>(|registry| registry.names())
}

/// Per-object storage of computed representations.
#[derive(Default)]
pub struct RepresentationCache {
    entries: RefCell<HashMap<RepresentationKey, Rc<dyn Any>>>,
}

impl RepresentationCache {
    fn get(&self, key: &RepresentationKey) -> Option<Rc<dyn Any>> {
        self.entries.borrow().get(key).cloned()
    }

    fn insert(&self, key: RepresentationKey, value: Rc<dyn Any>) {
        self.entries.borrow_mut().insert(key, value);
    }

    fn contains(&self, key: &RepresentationKey) -> bool {
        self.entries.borrow().contains_key(key)
    }

    fn remove(&self, key: &RepresentationKey) {
        self.entries.borrow_mut().remove(key);
    }

    fn remove_names(&self, names: &[String]) {
        self.entries
            .borrow_mut()
            .retain(|key, _| !names.contains(&key.name));
    }

    fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    fn keys(&self) -> Vec<RepresentationKey> {
        let mut keys: Vec<_> = self.entries.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Debug for RepresentationCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepresentationCache")
            .field("keys", &self.keys())
            .finish()
    }
}

/// A document object type with a representation registry.
pub trait Represented: DocumentObject + Sized {
    fn representation_cache(&self) -> &RepresentationCache;

    fn weak_self(&self) -> Weak<Self>;

    fn register_builtin_representations(_registry: &mut RepresentationRegistry<Self>) {}

    /// Returns the cached value for `name` and `params`, computing it on a
    /// miss. Objects without a reachable notification center cannot observe
    /// their own edits, so their values are computed but not cached.
    fn representation<V: Any>(&self, name: &str, params: &RepresentationParams) -> DocResult<Rc<V>> {
        let key = RepresentationKey::new(name, params.clone());
        let value = match self.representation_cache().get(&key) {
            Some(value) => value,
            None => {
                let factory = with_registry::<Self, _>(|registry| registry.factory(name))
                    .ok_or_else(|| DocError::UnknownRepresentation(name.to_owned()))?;
                let value = factory(self, params);
                if self.notification_center().is_some() {
                    self.representation_cache().insert(key, value.clone());
                }
                value
            }
        };
        value
            .downcast::<V>()
            .map_err(|_| DocError::RepresentationType(name.to_owned()))
    }

    fn has_cached_representation(&self, name: &str, params: &RepresentationParams) -> bool {
        self.representation_cache()
            .contains(&RepresentationKey::new(name, params.clone()))
    }

    fn cached_representations(&self) -> Vec<RepresentationKey> {
        self.representation_cache().keys()
    }

    fn invalidate_representation(&self, name: &str, params: &RepresentationParams) {
        self.representation_cache()
            .remove(&RepresentationKey::new(name, params.clone()));
    }

    /// Drops every parameterization of `name`.
    fn invalidate_representations_named(&self, name: &str) {
        self.representation_cache().remove_names(&[name.to_owned()]);
    }

    fn invalidate_all_representations(&self) {
        self.representation_cache().clear();
    }

    /// Subscribes the object to its own notifications so that invalidation
    /// sets are honored. Returns `false` when no center is reachable.
    fn observe_self(&self) -> bool {
        let Some(center) = self.notification_center() else {
            return false;
        };
        center.subscribe_weak(
            self.weak_self(),
            purge_stale_representations::<Self>,
            None,
            Some(&self.observable_ref()),
        );
        true
    }

    fn stop_observing_self(&self) {
        if let Some(center) = self.notification_center() {
            center.unsubscribe_id(
                ObserverId::of_weak(&self.weak_self()),
                None,
                Some(self.object_id()),
            );
        }
    }
}

fn purge_stale_representations<T: Represented>(object: &T, notification: &Notification) {
    let stale = with_registry::<T, _>(|registry| registry.names_invalidated_by(notification.name()));
    if !stale.is_empty() {
        object.representation_cache().remove_names(&stale);
    }
}
