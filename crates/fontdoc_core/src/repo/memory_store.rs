use super::store::{EntryKind, FontStore, LayerContents, ModTime, StoreError, StoreResult};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Mutation recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOperation {
    Write { kind: EntryKind, name: String },
    Remove { kind: EntryKind, name: String },
    CreateLayer(String),
    RemoveLayer(String),
    RenameLayer { old: String, new: String },
    SetLayerDefault { name: String, default: bool },
    WriteLayerOrder(Vec<String>),
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    bytes: Vec<u8>,
    mod_time: ModTime,
}

#[derive(Debug)]
struct MemoryState {
    format_version: u32,
    clock: u128,
    entries: BTreeMap<EntryKind, BTreeMap<String, MemoryEntry>>,
    layers: Vec<String>,
    default_layer: Option<String>,
    operations: Vec<StoreOperation>,
}

impl MemoryState {
    fn tick(&mut self) -> ModTime {
        self.clock += 1;
        ModTime::from_raw(self.clock)
    }

    fn has_layer(&self, name: &str) -> bool {
        self.layers.iter().any(|layer| layer == name)
    }

    fn require_layer(&self, kind: &EntryKind) -> StoreResult<()> {
        match kind {
            EntryKind::Glyphs(layer) if !self.has_layer(layer) => {
                Err(StoreError::LayerNotFound(layer.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// In-memory store with a logical clock.
///
/// Clones share state, so a test can keep a handle and edit entries
/// "externally" while a document holds another.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Rc<RefCell<MemoryState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_format_version(3)
    }

    pub fn with_format_version(format_version: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(MemoryState {
                format_version,
                clock: 0,
                entries: BTreeMap::new(),
                layers: Vec::new(),
                default_layer: None,
                operations: Vec::new(),
            })),
        }
    }

    /// Mutations since creation or the last [`clear_operations`](Self::clear_operations).
    pub fn operations(&self) -> Vec<StoreOperation> {
        self.state.borrow().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.state.borrow_mut().operations.clear();
    }

    pub fn write_count(&self) -> usize {
        self.state
            .borrow()
            .operations
            .iter()
            .filter(|operation| matches!(operation, StoreOperation::Write { .. }))
            .count()
    }

    /// Advances an entry's modification time without changing its bytes.
    pub fn touch(&self, kind: &EntryKind, name: &str) -> StoreResult<()> {
        let mut state = self.state.borrow_mut();
        let mod_time = state.tick();
        let entry = state
            .entries
            .get_mut(kind)
            .and_then(|entries| entries.get_mut(name))
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.clone(),
                name: name.to_owned(),
            })?;
        entry.mod_time = mod_time;
        Ok(())
    }
}

impl FontStore for MemoryStore {
    fn location(&self) -> String {
        format!("memory:{:p}", Rc::as_ptr(&self.state))
    }

    fn format_version(&self) -> u32 {
        self.state.borrow().format_version
    }

    fn list_entries(&self, kind: &EntryKind) -> StoreResult<BTreeSet<String>> {
        Ok(self
            .state
            .borrow()
            .entries
            .get(kind)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn read_entry(&self, kind: &EntryKind, name: &str) -> StoreResult<Vec<u8>> {
        self.state
            .borrow()
            .entries
            .get(kind)
            .and_then(|entries| entries.get(name))
            .map(|entry| entry.bytes.clone())
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.clone(),
                name: name.to_owned(),
            })
    }

    fn mod_time(&self, kind: &EntryKind, name: &str) -> StoreResult<Option<ModTime>> {
        Ok(self
            .state
            .borrow()
            .entries
            .get(kind)
            .and_then(|entries| entries.get(name))
            .map(|entry| entry.mod_time))
    }

    fn write_entry(&self, kind: &EntryKind, name: &str, bytes: &[u8]) -> StoreResult<()> {
        let mut state = self.state.borrow_mut();
        state.require_layer(kind)?;
        let mod_time = state.tick();
        state.entries.entry(kind.clone()).or_default().insert(
            name.to_owned(),
            MemoryEntry {
                bytes: bytes.to_vec(),
                mod_time,
            },
        );
        state.operations.push(StoreOperation::Write {
            kind: kind.clone(),
            name: name.to_owned(),
        });
        Ok(())
    }

    fn remove_entry(&self, kind: &EntryKind, name: &str) -> StoreResult<()> {
        let mut state = self.state.borrow_mut();
        let removed = state
            .entries
            .get_mut(kind)
            .and_then(|entries| entries.remove(name));
        if removed.is_none() {
            return Err(StoreError::NotFound {
                kind: kind.clone(),
                name: name.to_owned(),
            });
        }
        state.operations.push(StoreOperation::Remove {
            kind: kind.clone(),
            name: name.to_owned(),
        });
        Ok(())
    }

    fn layer_contents(&self) -> StoreResult<LayerContents> {
        let state = self.state.borrow();
        Ok(LayerContents {
            order: state.layers.clone(),
            default: state.default_layer.clone(),
        })
    }

    fn ensure_layer(&self, name: &str, default: bool) -> StoreResult<()> {
        {
            let mut state = self.state.borrow_mut();
            if !state.has_layer(name) {
                state.layers.push(name.to_owned());
                state
                    .entries
                    .entry(EntryKind::Glyphs(name.to_owned()))
                    .or_default();
                state
                    .operations
                    .push(StoreOperation::CreateLayer(name.to_owned()));
            }
        }
        let is_default = self.state.borrow().default_layer.as_deref() == Some(name);
        if is_default != default {
            self.set_layer_default(name, default)?;
        }
        Ok(())
    }

    fn write_layer_order(&self, order: &[String]) -> StoreResult<()> {
        let mut state = self.state.borrow_mut();
        if let Some(missing) = order.iter().find(|name| !state.has_layer(name)) {
            return Err(StoreError::LayerNotFound(missing.clone()));
        }
        let mut reordered = order.to_vec();
        for layer in &state.layers {
            if !reordered.contains(layer) {
                reordered.push(layer.clone());
            }
        }
        if reordered != state.layers {
            state.layers = reordered;
            state
                .operations
                .push(StoreOperation::WriteLayerOrder(order.to_vec()));
        }
        Ok(())
    }

    fn remove_layer(&self, name: &str) -> StoreResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.has_layer(name) {
            return Err(StoreError::LayerNotFound(name.to_owned()));
        }
        state.layers.retain(|layer| layer != name);
        state.entries.remove(&EntryKind::Glyphs(name.to_owned()));
        if state.default_layer.as_deref() == Some(name) {
            state.default_layer = None;
        }
        state
            .operations
            .push(StoreOperation::RemoveLayer(name.to_owned()));
        Ok(())
    }

    fn rename_layer(&self, old: &str, new: &str) -> StoreResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.has_layer(old) {
            return Err(StoreError::LayerNotFound(old.to_owned()));
        }
        if state.has_layer(new) {
            return Err(StoreError::LayerExists(new.to_owned()));
        }
        for layer in state.layers.iter_mut() {
            if layer == old {
                *layer = new.to_owned();
            }
        }
        let glyphs = state
            .entries
            .remove(&EntryKind::Glyphs(old.to_owned()))
            .unwrap_or_default();
        state
            .entries
            .insert(EntryKind::Glyphs(new.to_owned()), glyphs);
        if state.default_layer.as_deref() == Some(old) {
            state.default_layer = Some(new.to_owned());
        }
        state.operations.push(StoreOperation::RenameLayer {
            old: old.to_owned(),
            new: new.to_owned(),
        });
        Ok(())
    }

    fn set_layer_default(&self, name: &str, default: bool) -> StoreResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.has_layer(name) {
            return Err(StoreError::LayerNotFound(name.to_owned()));
        }
        if default {
            state.default_layer = Some(name.to_owned());
        } else if state.default_layer.as_deref() == Some(name) {
            state.default_layer = None;
        }
        state.operations.push(StoreOperation::SetLayerDefault {
            name: name.to_owned(),
            default,
        });
        Ok(())
    }
}
