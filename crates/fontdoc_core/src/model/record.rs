//! Font-level singleton records: info, kerning, groups, features, lib.

use crate::model::base::{DocumentObject, ObjectBase, ObjectKind};
use crate::model::error::DocResult;
use crate::model::stamp::Stamp;
use crate::notify::{Observable, ObservableRef};
use crate::repo::{EntryKind, FontStore};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

/// Value type stored in a [`Record`].
pub trait RecordValue: Serialize + DeserializeOwned + Default + Clone + PartialEq + 'static {
    const KIND: ObjectKind;
    /// Entry name in [`EntryKind::Meta`].
    const ENTRY_NAME: &'static str;

    fn encode(&self) -> DocResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    fn decode(bytes: &[u8]) -> DocResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Info {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units_per_em: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ascender: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descender: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_major: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_minor: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RecordValue for Info {
    const KIND: ObjectKind = ObjectKind::Info;
    const ENTRY_NAME: &'static str = "fontinfo.json";
}

/// First member → second member → value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kerning(pub BTreeMap<String, BTreeMap<String, f64>>);

impl Kerning {
    pub fn pair(&self, first: &str, second: &str) -> Option<f64> {
        self.0.get(first)?.get(second).copied()
    }

    pub fn set_pair(&mut self, first: &str, second: &str, value: f64) {
        self.0
            .entry(first.to_owned())
            .or_default()
            .insert(second.to_owned(), value);
    }

    pub fn remove_pair(&mut self, first: &str, second: &str) -> Option<f64> {
        let seconds = self.0.get_mut(first)?;
        let value = seconds.remove(second);
        if seconds.is_empty() {
            self.0.remove(first);
        }
        value
    }
}

impl RecordValue for Kerning {
    const KIND: ObjectKind = ObjectKind::Kerning;
    const ENTRY_NAME: &'static str = "kerning.json";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Groups(pub BTreeMap<String, Vec<String>>);

impl RecordValue for Groups {
    const KIND: ObjectKind = ObjectKind::Groups;
    const ENTRY_NAME: &'static str = "groups.json";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lib(pub BTreeMap<String, serde_json::Value>);

impl RecordValue for Lib {
    const KIND: ObjectKind = ObjectKind::Lib;
    const ENTRY_NAME: &'static str = "lib.json";
}

/// Feature source text, stored verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(pub String);

impl RecordValue for Features {
    const KIND: ObjectKind = ObjectKind::Features;
    const ENTRY_NAME: &'static str = "features.fea";

    fn encode(&self) -> DocResult<Vec<u8>> {
        Ok(self.0.clone().into_bytes())
    }

    fn decode(bytes: &[u8]) -> DocResult<Self> {
        Ok(Self(String::from_utf8_lossy(bytes).into_owned()))
    }
}

/// A stamped singleton record of the font.
pub struct Record<V: RecordValue> {
    base: ObjectBase,
    value: RefCell<V>,
    stamp: RefCell<Stamp>,
}

impl<V: RecordValue> Observable for Record<V> {
    fn observable_ref(&self) -> ObservableRef {
        self.base.observable_ref()
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl<V: RecordValue> DocumentObject for Record<V> {
    fn base(&self) -> &ObjectBase {
        &self.base
    }
}

impl<V: RecordValue> Record<V> {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new_cyclic(|me: &Weak<Self>| Self {
            base: ObjectBase::new(V::KIND, ObservableRef::new(me)),
            value: RefCell::new(V::default()),
            stamp: RefCell::new(Stamp::default()),
        })
    }

    pub fn get(&self) -> V {
        self.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Replaces the value. Equal values leave the record clean.
    pub fn set(&self, value: V) {
        if *self.value.borrow() == value {
            return;
        }
        *self.value.borrow_mut() = value;
        self.set_dirty(true);
    }

    /// Mutates the value in place and marks the record dirty.
    pub fn update<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
        let result = f(&mut self.value.borrow_mut());
        self.set_dirty(true);
        result
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp.borrow().clone()
    }

    pub(crate) fn load(&self, store: &dyn FontStore) -> DocResult<()> {
        let stamp = Stamp::capture(store, &EntryKind::Meta, V::ENTRY_NAME)?;
        let value = match stamp.content() {
            Some(bytes) => V::decode(bytes)?,
            None => V::default(),
        };
        *self.value.borrow_mut() = value;
        *self.stamp.borrow_mut() = stamp;
        self.base.set_dirty_silently(false);
        Ok(())
    }

    /// Writes the record when dirty or `force`d. Returns whether it wrote.
    pub(crate) fn save(&self, store: &dyn FontStore, force: bool) -> DocResult<bool> {
        if !force && !self.is_dirty() {
            return Ok(false);
        }
        let bytes = self.value.borrow().encode()?;
        store.write_entry(&EntryKind::Meta, V::ENTRY_NAME, &bytes)?;
        *self.stamp.borrow_mut() = Stamp::capture(store, &EntryKind::Meta, V::ENTRY_NAME)?;
        debug!(
            "event=record_save module=record status=ok record={} bytes={}",
            V::KIND.name(),
            bytes.len()
        );
        if self.is_dirty() {
            self.set_dirty(false);
        }
        Ok(true)
    }

    pub(crate) fn has_external_changes(&self, store: &dyn FontStore) -> DocResult<bool> {
        Ok(self.stamp.borrow().is_stale(store, &EntryKind::Meta, V::ENTRY_NAME)?)
    }

    /// Re-reads the record and posts `<Type>.Changed` so dependents refresh.
    pub(crate) fn reload(&self, store: &dyn FontStore) -> DocResult<()> {
        self.load(store)?;
        self.set_dirty(false);
        Ok(())
    }
}
