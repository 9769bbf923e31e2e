//! Lazily loaded binary entries: the data directory and the image set.
//!
//! # Responsibility
//! - Read entries on first access and stamp them for reconciliation.
//! - Write dirty entries and remove deleted ones on save.
//!
//! # Invariants
//! - Image entries always start with the PNG signature and carry a
//!   file-system-legal name.

use crate::model::base::{impl_document_object, DocumentObject, ObjectBase, ObjectKind};
use crate::model::error::{DocError, DocResult};
use crate::model::stamp::{ChangeSet, Stamp, StampLedger};
use crate::notify::{NotificationData, ObservableRef};
use crate::repo::{copy_entry, EntryKind, FontStore};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

const MAX_FILE_NAME_LEN: usize = 255;

static ILLEGAL_CHAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[\x00-\x1f\x7f"*+/:<>?\[\\\]|]"#).expect("valid illegal char regex")
});
static LEGAL_IMAGE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^[^.\x00-\x1f\x7f"*/:<>?\\|][^\x00-\x1f\x7f"*/:<>?\\|]*$"#)
        .expect("valid image name regex")
});
static RESERVED_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(con|prn|aux|clock\$|nul|com[1-9]|lpt[1-9])$")
        .expect("valid reserved name regex")
});

/// Which blob collection a [`BlobSet`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Data,
    Images,
}

impl BlobKind {
    pub fn object_kind(self) -> ObjectKind {
        match self {
            Self::Data => ObjectKind::DataSet,
            Self::Images => ObjectKind::ImageSet,
        }
    }

    pub fn entry_kind(self) -> EntryKind {
        match self {
            Self::Data => EntryKind::Data,
            Self::Images => EntryKind::Images,
        }
    }

    pub fn file_added(self) -> &'static str {
        match self {
            Self::Data => "DataSet.FileAdded",
            Self::Images => "ImageSet.FileAdded",
        }
    }

    pub fn file_changed(self) -> &'static str {
        match self {
            Self::Data => "DataSet.FileChanged",
            Self::Images => "ImageSet.FileChanged",
        }
    }

    pub fn file_deleted(self) -> &'static str {
        match self {
            Self::Data => "DataSet.FileDeleted",
            Self::Images => "ImageSet.FileDeleted",
        }
    }

    pub fn files_reloaded(self) -> &'static str {
        match self {
            Self::Data => "DataSet.FilesReloaded",
            Self::Images => "ImageSet.FilesReloaded",
        }
    }

    fn not_found(self, name: &str) -> DocError {
        match self {
            Self::Data => DocError::DataNotFound(name.to_owned()),
            Self::Images => DocError::ImageNotFound(name.to_owned()),
        }
    }
}

#[derive(Debug, Clone)]
struct BlobEntry {
    bytes: Vec<u8>,
    dirty: bool,
    stamp: Stamp,
}

pub struct BlobSet {
    base: ObjectBase,
    kind: BlobKind,
    entries: RefCell<BTreeMap<String, BlobEntry>>,
    ledger: RefCell<StampLedger>,
    store: RefCell<Option<Rc<dyn FontStore>>>,
}

impl_document_object!(BlobSet);

impl BlobSet {
    pub(crate) fn new(kind: BlobKind) -> Rc<Self> {
        Rc::new_cyclic(|me: &Weak<Self>| Self {
            base: ObjectBase::new(kind.object_kind(), ObservableRef::new(me)),
            kind,
            entries: RefCell::new(BTreeMap::new()),
            ledger: RefCell::new(StampLedger::default()),
            store: RefCell::new(None),
        })
    }

    pub fn blob_kind(&self) -> BlobKind {
        self.kind
    }

    /// Sorted names of every entry, loaded or not.
    pub fn file_names(&self) -> Vec<String> {
        self.ledger.borrow().names()
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

    pub fn is_loaded(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    /// Returns the bytes of an entry, reading them on first access.
    pub fn get(&self, name: &str) -> DocResult<Vec<u8>> {
        if let Some(entry) = self.entries.borrow().get(name) {
            return Ok(entry.bytes.clone());
        }
        if !self.contains(name) {
            return Err(self.kind.not_found(name));
        }
        let store = self.store().ok_or_else(|| self.kind.not_found(name))?;
        let stamp = Stamp::capture(&*store, &self.kind.entry_kind(), name)?;
        let bytes = stamp
            .content()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| self.kind.not_found(name))?;
        self.entries.borrow_mut().insert(
            name.to_owned(),
            BlobEntry {
                bytes: bytes.clone(),
                dirty: false,
                stamp,
            },
        );
        Ok(bytes)
    }

    /// Stores `bytes` under `name`, replacing any existing entry.
    pub fn set(&self, name: &str, bytes: Vec<u8>) -> DocResult<()> {
        if self.kind == BlobKind::Images {
            if !is_legal_image_name(name) {
                return Err(DocError::IllegalFileName(name.to_owned()));
            }
            if !bytes.starts_with(PNG_SIGNATURE) {
                return Err(DocError::InvalidImage(name.to_owned()));
            }
        }
        let existed = self.contains(name);
        let (unchanged, held) = match self.entries.borrow().get(name) {
            Some(entry) => (entry.bytes == bytes, Some(entry.stamp.clone())),
            None => (false, None),
        };
        if unchanged {
            return Ok(());
        }
        let stamp = match held {
            Some(stamp) => stamp,
            None if existed => self.stored_stamp(Stamp::default(), name)?,
            None => Stamp::default(),
        };
        let stamp = self.ledger.borrow_mut().insert(name).unwrap_or(stamp);
        self.entries.borrow_mut().insert(
            name.to_owned(),
            BlobEntry {
                bytes,
                dirty: true,
                stamp,
            },
        );
        let notification = if existed {
            self.kind.file_changed()
        } else {
            self.kind.file_added()
        };
        self.post_notification(notification, NotificationData::Name(name.to_owned()));
        self.set_dirty(true);
        Ok(())
    }

    /// Deletes an entry. The stored file is removed on the next save.
    pub fn remove(&self, name: &str) -> DocResult<()> {
        if !self.contains(name) {
            return Err(self.kind.not_found(name));
        }
        let held = self
            .entries
            .borrow()
            .get(name)
            .map(|entry| entry.stamp.clone())
            .unwrap_or_default();
        let stamp = self.stored_stamp(held, name)?;
        self.entries.borrow_mut().remove(name);
        self.ledger.borrow_mut().schedule_deletion(name, stamp);
        self.post_notification(self.kind.file_deleted(), NotificationData::Name(name.to_owned()));
        self.set_dirty(true);
        Ok(())
    }

    /// Names scheduled for removal from storage at the next save.
    pub fn scheduled_for_deletion(&self) -> Vec<String> {
        self.ledger.borrow().scheduled_names()
    }

    /// A file-system-legal name derived from `name` that differs, ignoring
    /// case, from every existing entry.
    pub fn make_file_name(&self, name: &str) -> String {
        let existing: BTreeSet<String> = self
            .file_names()
            .into_iter()
            .map(|name| name.to_lowercase())
            .collect();
        user_name_to_file_name(name, &existing)
    }

    pub fn test_for_external_changes(&self) -> DocResult<ChangeSet> {
        let Some(store) = self.store() else {
            return Ok(ChangeSet::default());
        };
        let loaded: Vec<(String, Stamp)> = self
            .entries
            .borrow()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.stamp.clone()))
            .collect();
        let changes = self.ledger.borrow_mut().reconcile(
            &*store,
            &self.kind.entry_kind(),
            loaded.iter().map(|(name, stamp)| (name.as_str(), stamp)),
        )?;
        debug!(
            "event=blobs_reconcile module=blob_set status=ok kind={} modified={} added={} deleted={}",
            self.kind.entry_kind(),
            changes.modified.len(),
            changes.added.len(),
            changes.deleted.len()
        );
        Ok(changes)
    }

    /// Re-reads the named entries. Loaded entries take the stored bytes,
    /// names no longer stored are dropped without scheduling a removal.
    pub fn reload(&self, names: &[String]) -> DocResult<()> {
        let Some(store) = self.store() else {
            return Ok(());
        };
        let kind = self.kind.entry_kind();
        for name in names {
            let stamp = Stamp::capture(&*store, &kind, name)?;
            let Some(bytes) = stamp.content().map(<[u8]>::to_vec) else {
                if self.contains(name) {
                    self.entries.borrow_mut().remove(name);
                    self.ledger.borrow_mut().forget(name);
                    self.post_notification(
                        self.kind.file_deleted(),
                        NotificationData::Name(name.clone()),
                    );
                }
                continue;
            };
            self.ledger.borrow_mut().insert(name);
            if let Some(entry) = self.entries.borrow_mut().get_mut(name) {
                entry.bytes = bytes;
                entry.dirty = false;
                entry.stamp = stamp;
            }
        }
        self.post_notification(self.kind.files_reloaded(), NotificationData::Names(names.to_vec()));
        debug!(
            "event=blobs_reload module=blob_set status=ok kind={kind} entries={}",
            names.len()
        );
        Ok(())
    }

    pub(crate) fn load_from(&self, store: Rc<dyn FontStore>) -> DocResult<()> {
        let listing = store.list_entries(&self.kind.entry_kind())?;
        self.entries.borrow_mut().clear();
        *self.ledger.borrow_mut() = StampLedger::from_listing(listing);
        *self.store.borrow_mut() = Some(store);
        self.base.set_dirty_silently(false);
        Ok(())
    }

    /// Writes dirty entries. Saving somewhere other than the current storage
    /// copies unloaded entries over and rewrites loaded ones.
    pub(crate) fn save(&self, target: &Rc<dyn FontStore>, save_as: bool) -> DocResult<()> {
        let kind = self.kind.entry_kind();
        let source = self
            .store()
            .filter(|source| source.location() != target.location());
        let relocating = save_as || source.is_some();
        let mut copied = 0_usize;
        let mut written = 0_usize;
        let mut removed = 0_usize;

        if relocating {
            if let Some(source) = source {
                for name in self.file_names() {
                    if self.is_loaded(&name) {
                        continue;
                    }
                    match copy_entry(&*source, &kind, &**target, &kind, &name) {
                        Ok(()) => copied += 1,
                        Err(err) if err.is_not_found() => {
                            warn!("event=blob_copy module=blob_set status=missing kind={kind} name={name}")
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }

        let names: Vec<String> = self.entries.borrow().keys().cloned().collect();
        for name in names {
            let bytes = {
                let entries = self.entries.borrow();
                match entries.get(&name) {
                    Some(entry) if entry.dirty || relocating => entry.bytes.clone(),
                    _ => continue,
                }
            };
            target.write_entry(&kind, &name, &bytes)?;
            let stamp = Stamp::capture(&**target, &kind, &name)?;
            if let Some(entry) = self.entries.borrow_mut().get_mut(&name) {
                entry.dirty = false;
                entry.stamp = stamp;
            }
            written += 1;
        }

        if !save_as {
            for name in self.scheduled_for_deletion() {
                match target.remove_entry(&kind, &name) {
                    Ok(()) => removed += 1,
                    Err(err) if err.is_not_found() => debug!(
                        "event=blob_remove module=blob_set status=already_gone kind={kind} name={name}"
                    ),
                    Err(err) => return Err(err.into()),
                }
            }
        }

        self.ledger.borrow_mut().finish_save();
        *self.store.borrow_mut() = Some(target.clone());
        if self.is_dirty() {
            self.set_dirty(false);
        }
        debug!(
            "event=blobs_save module=blob_set status=ok kind={kind} relocating={relocating} written={written} copied={copied} removed={removed}"
        );
        Ok(())
    }

    fn store(&self) -> Option<Rc<dyn FontStore>> {
        self.store.borrow().clone()
    }

    fn stored_stamp(&self, held: Stamp, name: &str) -> DocResult<Stamp> {
        match self.store() {
            Some(store) => Ok(held.or_stored(&*store, &self.kind.entry_kind(), name)?),
            None => Ok(held),
        }
    }
}

fn is_legal_image_name(name: &str) -> bool {
    name.chars().count() <= MAX_FILE_NAME_LEN && LEGAL_IMAGE_NAME_RE.is_match(name)
}

/// Maps a user supplied name onto a legal, case-insensitively unique file
/// name. `existing` holds lowercased names.
fn user_name_to_file_name(name: &str, existing: &BTreeSet<String>) -> String {
    let (stem, suffix) = match name.len().checked_sub(4) {
        Some(split)
            if name.is_char_boundary(split) && name[split..].eq_ignore_ascii_case(".png") =>
        {
            (&name[..split], &name[split..])
        }
        _ => (name, ""),
    };

    let mut legal = String::with_capacity(stem.len());
    for ch in ILLEGAL_CHAR_RE.replace_all(stem, "_").chars() {
        legal.push(ch);
        if ch.is_uppercase() {
            legal.push('_');
        }
    }
    if legal.starts_with('.') {
        legal.replace_range(..1, "_");
    }
    let legal = legal
        .split('.')
        .map(|part| {
            if RESERVED_NAME_RE.is_match(part) {
                format!("_{part}")
            } else {
                part.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(".");

    let budget = MAX_FILE_NAME_LEN.saturating_sub(suffix.chars().count());
    let legal: String = legal.chars().take(budget).collect();
    let candidate = format!("{legal}{suffix}");
    if !existing.contains(&candidate.to_lowercase()) {
        return candidate;
    }

    let stem: String = legal.chars().take(budget.saturating_sub(15)).collect();
    (1_u64..)
        .map(|counter| format!("{stem}{counter:015}{suffix}"))
        .find(|candidate| !existing.contains(&candidate.to_lowercase()))
        .unwrap_or(candidate)
}
