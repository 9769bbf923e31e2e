//! On-disk snapshots and external change reconciliation.

use crate::repo::{EntryKind, FontStore, ModTime, StoreResult};
use std::collections::{BTreeMap, BTreeSet};

/// What an item looked like in storage when it was last read or written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stamp {
    content: Option<Vec<u8>>,
    mod_time: Option<ModTime>,
}

impl Stamp {
    /// Reads the current bytes and modification time of an entry. A missing
    /// entry yields the empty stamp.
    pub fn capture(store: &dyn FontStore, kind: &EntryKind, name: &str) -> StoreResult<Self> {
        match store.mod_time(kind, name)? {
            None => Ok(Self::default()),
            Some(mod_time) => Ok(Self {
                content: Some(store.read_entry(kind, name)?),
                mod_time: Some(mod_time),
            }),
        }
    }

    /// Stamp carrying only a modification time, for items scheduled for
    /// deletion before they were ever read.
    pub fn from_mod_time(mod_time: Option<ModTime>) -> Self {
        Self {
            content: None,
            mod_time,
        }
    }

    /// Keeps `self` when it was taken from storage, otherwise falls back to
    /// the entry's current modification time.
    pub fn or_stored(self, store: &dyn FontStore, kind: &EntryKind, name: &str) -> StoreResult<Self> {
        if self.is_on_disk() {
            return Ok(self);
        }
        Ok(Self::from_mod_time(store.mod_time(kind, name)?))
    }

    pub fn is_on_disk(&self) -> bool {
        self.mod_time.is_some()
    }

    pub fn mod_time(&self) -> Option<ModTime> {
        self.mod_time
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// True when storage no longer holds what this stamp recorded. Bytes are
    /// only compared when the modification time moved. An entry that vanished
    /// counts as changed if it was on disk.
    pub fn is_stale(&self, store: &dyn FontStore, kind: &EntryKind, name: &str) -> StoreResult<bool> {
        match store.mod_time(kind, name)? {
            None => Ok(self.is_on_disk()),
            Some(current) if Some(current) == self.mod_time => Ok(false),
            Some(_) => {
                let bytes = store.read_entry(kind, name)?;
                Ok(self.content() != Some(bytes.as_slice()))
            }
        }
    }
}

/// Result of comparing a collection with its storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub modified: BTreeSet<String>,
    pub added: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.deleted.is_empty()
    }

    /// Names a reload should re-read: modified and added.
    pub fn to_reload(&self) -> Vec<String> {
        self.modified.union(&self.added).cloned().collect()
    }

    /// Every name in the report, deleted ones included.
    pub fn affected(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.modified.union(&self.added).cloned().collect();
        names.extend(self.deleted.iter().cloned());
        names.into_iter().collect()
    }
}

/// Name bookkeeping shared by lazily loaded, stamped collections.
#[derive(Debug, Clone, Default)]
pub(crate) struct StampLedger {
    /// Names that exist in the live collection, loaded or not.
    known: BTreeSet<String>,
    /// Names confirmed present in storage at the last load, save or reconcile.
    on_disk: BTreeSet<String>,
    /// Names deleted in memory and not yet removed from storage.
    scheduled: BTreeMap<String, Stamp>,
}

impl StampLedger {
    pub fn from_listing(listing: BTreeSet<String>) -> Self {
        Self {
            known: listing.clone(),
            on_disk: listing,
            scheduled: BTreeMap::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.known.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn scheduled_names(&self) -> Vec<String> {
        self.scheduled.keys().cloned().collect()
    }

    /// Adds a name, cancelling any pending deletion of it. Returns the stamp
    /// the cancelled deletion held.
    pub fn insert(&mut self, name: &str) -> Option<Stamp> {
        self.known.insert(name.to_owned());
        self.scheduled.remove(name)
    }

    /// Removes a name. Items that exist in storage keep `stamp` until the
    /// next save removes them.
    pub fn schedule_deletion(&mut self, name: &str, stamp: Stamp) {
        self.known.remove(name);
        if self.on_disk.contains(name) {
            self.scheduled.insert(name.to_owned(), stamp);
        }
    }

    /// Drops every trace of a name that vanished from storage.
    pub fn forget(&mut self, name: &str) {
        self.known.remove(name);
        self.on_disk.remove(name);
        self.scheduled.remove(name);
    }

    /// Every known name is in storage and nothing is pending deletion.
    pub fn finish_save(&mut self) {
        self.scheduled.clear();
        self.on_disk = self.known.clone();
    }

    /// Classifies storage against the collection.
    ///
    /// `loaded` yields the stamps of materialized items. Names found as
    /// added are adopted so they can be loaded on demand.
    pub fn reconcile<'a>(
        &mut self,
        store: &dyn FontStore,
        kind: &EntryKind,
        loaded: impl IntoIterator<Item = (&'a str, &'a Stamp)>,
    ) -> StoreResult<ChangeSet> {
        let listing = store.list_entries(kind)?;
        let mut changes = ChangeSet::default();

        for name in listing.difference(&self.known) {
            let added = match self.scheduled.get(name) {
                None => true,
                Some(stamp) => stamp.mod_time() != store.mod_time(kind, name)?,
            };
            if added {
                changes.added.insert(name.clone());
            }
        }

        for name in &self.known {
            if !listing.contains(name) && self.on_disk.contains(name) {
                changes.deleted.insert(name.clone());
            }
        }

        for (name, stamp) in loaded {
            if !stamp.is_on_disk() || !listing.contains(name) {
                continue;
            }
            if stamp.is_stale(store, kind, name)? {
                changes.modified.insert(name.to_owned());
            }
        }

        for name in &changes.added {
            self.scheduled.remove(name);
            self.known.insert(name.clone());
            self.on_disk.insert(name.clone());
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::{Stamp, StampLedger};
    use crate::repo::{EntryKind, FontStore, MemoryStore};
    use std::collections::BTreeSet;

    fn seeded(names: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for name in names {
            store
                .write_entry(&EntryKind::Data, name, name.as_bytes())
                .unwrap();
        }
        store
    }

    #[test]
    fn touched_entry_with_same_bytes_is_not_stale() {
        let store = seeded(&["a"]);
        let stamp = Stamp::capture(&store, &EntryKind::Data, "a").unwrap();
        store.touch(&EntryKind::Data, "a").unwrap();
        assert!(!stamp.is_stale(&store, &EntryKind::Data, "a").unwrap());

        store.write_entry(&EntryKind::Data, "a", b"changed").unwrap();
        assert!(stamp.is_stale(&store, &EntryKind::Data, "a").unwrap());
    }

    #[test]
    fn vanished_entry_is_stale_only_if_it_was_on_disk() {
        let store = seeded(&[]);
        assert!(!Stamp::default()
            .is_stale(&store, &EntryKind::Data, "a")
            .unwrap());
        let stamp = Stamp::from_mod_time(Some(crate::repo::ModTime::from_raw(1)));
        assert!(stamp.is_stale(&store, &EntryKind::Data, "a").unwrap());
    }

    #[test]
    fn reconcile_classifies_modified_added_and_deleted() {
        let store = seeded(&["a", "b", "c"]);
        let listing: BTreeSet<String> = store.list_entries(&EntryKind::Data).unwrap();
        let mut ledger = StampLedger::from_listing(listing);
        let stamp_a = Stamp::capture(&store, &EntryKind::Data, "a").unwrap();

        store.write_entry(&EntryKind::Data, "a", b"new a").unwrap();
        store.write_entry(&EntryKind::Data, "d", b"d").unwrap();
        store.remove_entry(&EntryKind::Data, "c").unwrap();

        let changes = ledger
            .reconcile(&store, &EntryKind::Data, [("a", &stamp_a)])
            .unwrap();
        assert_eq!(changes.modified, BTreeSet::from(["a".to_string()]));
        assert_eq!(changes.added, BTreeSet::from(["d".to_string()]));
        assert_eq!(changes.deleted, BTreeSet::from(["c".to_string()]));
        assert!(ledger.contains("d"));
    }

    #[test]
    fn scheduled_deletion_hides_untouched_entry() {
        let store = seeded(&["a"]);
        let mut ledger =
            StampLedger::from_listing(store.list_entries(&EntryKind::Data).unwrap());
        let stamp = Stamp::capture(&store, &EntryKind::Data, "a").unwrap();
        ledger.schedule_deletion("a", stamp);

        let quiet = ledger
            .reconcile(&store, &EntryKind::Data, std::iter::empty())
            .unwrap();
        assert!(quiet.is_empty());

        store.write_entry(&EntryKind::Data, "a", b"rewritten").unwrap();
        let changes = ledger
            .reconcile(&store, &EntryKind::Data, std::iter::empty())
            .unwrap();
        assert_eq!(changes.added, BTreeSet::from(["a".to_string()]));
        assert!(ledger.scheduled_names().is_empty());
    }

    #[test]
    fn readding_a_scheduled_name_hands_back_its_stamp() {
        let store = seeded(&["a"]);
        let mut ledger =
            StampLedger::from_listing(store.list_entries(&EntryKind::Data).unwrap());
        let stamp = Stamp::default()
            .or_stored(&store, &EntryKind::Data, "a")
            .unwrap();
        assert!(stamp.is_on_disk());
        ledger.schedule_deletion("a", stamp.clone());

        assert_eq!(ledger.insert("a"), Some(stamp));
        assert_eq!(ledger.insert("b"), None);
        assert!(ledger.scheduled_names().is_empty());
    }

    #[test]
    fn unsaved_names_are_never_reported_deleted() {
        let store = seeded(&[]);
        let mut ledger = StampLedger::default();
        ledger.insert("fresh");
        let changes = ledger
            .reconcile(&store, &EntryKind::Data, std::iter::empty())
            .unwrap();
        assert!(changes.is_empty());
    }
}
