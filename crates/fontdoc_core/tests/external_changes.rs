use fontdoc_core::model::layer::LAYER_GLYPHS_RELOADED;
use fontdoc_core::model::{Kerning, DEFAULT_LAYER_NAME, PNG_SIGNATURE};
use fontdoc_core::{
    ChangeSet, DocumentObject, EntryKind, Font, FontStore, GlyphData, MemoryStore, Notification,
    NotificationData,
};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

fn glyph_kind() -> EntryKind {
    EntryKind::Glyphs(DEFAULT_LAYER_NAME.to_string())
}

fn stored_glyph(name: &str, width: f64) -> Vec<u8> {
    let mut data = GlyphData::new(name);
    data.width = width;
    data.encode().unwrap()
}

fn seeded_store(names: &[&str]) -> MemoryStore {
    let store = MemoryStore::new();
    let font = Font::new();
    for name in names {
        font.new_glyph(name).unwrap().set_width(100.0);
    }
    font.save_as(Rc::new(store.clone())).unwrap();
    store
}

fn names(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn png(payload: &[u8]) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

#[derive(Default)]
struct Recorder {
    seen: RefCell<Vec<(String, NotificationData)>>,
}

impl Recorder {
    fn record(&self, notification: &Notification) {
        self.seen
            .borrow_mut()
            .push((notification.name().to_owned(), notification.data().clone()));
    }
}

#[test]
fn untouched_document_reports_nothing() {
    let store = seeded_store(&["A", "B"]);
    let font = Font::open(Rc::new(store.clone())).unwrap();
    font.glyph("A").unwrap();

    store.touch(&glyph_kind(), "A").unwrap();

    assert!(font.test_for_external_changes().unwrap().is_empty());
}

#[test]
fn modified_added_and_deleted_glyphs_are_classified_and_reloaded() {
    let store = seeded_store(&["A", "B", "C"]);
    let font = Font::open(Rc::new(store.clone())).unwrap();
    font.glyph("A").unwrap();
    font.glyph("C").unwrap();

    store.write_entry(&glyph_kind(), "A", &stored_glyph("A", 720.0)).unwrap();
    store.write_entry(&glyph_kind(), "D", &stored_glyph("D", 300.0)).unwrap();
    store.remove_entry(&glyph_kind(), "C").unwrap();

    let changes = font.test_for_external_changes().unwrap();
    let glyph_changes = &changes.layers.modified[DEFAULT_LAYER_NAME];
    assert_eq!(
        glyph_changes,
        &ChangeSet {
            modified: names(&["A"]),
            added: names(&["D"]),
            deleted: names(&["C"]),
        }
    );
    assert!(!changes.layers.order_changed);
    assert!(!changes.kerning);

    let recorder = Rc::new(Recorder::default());
    font.center()
        .subscribe(&recorder, Recorder::record, Some(LAYER_GLYPHS_RELOADED), None);
    font.reload(&changes).unwrap();

    assert_eq!(font.glyph("A").unwrap().width(), 720.0);
    assert!(!font.glyph("A").unwrap().is_dirty());
    assert_eq!(font.glyph("D").unwrap().width(), 300.0);
    assert!(!font.contains_glyph("C"));
    assert_eq!(
        recorder.seen.borrow().as_slice(),
        &[(
            LAYER_GLYPHS_RELOADED.to_string(),
            NotificationData::Names(vec!["A".to_string(), "C".to_string(), "D".to_string()])
        )]
    );
    assert!(font.test_for_external_changes().unwrap().is_empty());
}

#[test]
fn scheduled_deletion_is_not_reported_until_the_file_is_rewritten() {
    let store = seeded_store(&["A", "B"]);
    let font = Font::open(Rc::new(store.clone())).unwrap();

    font.remove_glyph("B").unwrap();
    assert!(font.test_for_external_changes().unwrap().is_empty());

    store.write_entry(&glyph_kind(), "B", &stored_glyph("B", 999.0)).unwrap();
    let changes = font.test_for_external_changes().unwrap();
    let glyph_changes = &changes.layers.modified[DEFAULT_LAYER_NAME];
    assert_eq!(glyph_changes.added, names(&["B"]));

    font.reload(&changes).unwrap();
    assert_eq!(font.glyph("B").unwrap().width(), 999.0);
    assert!(font.default_layer().unwrap().scheduled_for_deletion().is_empty());
}

#[test]
fn same_name_replacement_cancels_deletion_and_overwrites_on_save() {
    let store = seeded_store(&["A", "B"]);
    let font = Font::open(Rc::new(store.clone())).unwrap();

    font.remove_glyph("B").unwrap();
    font.new_glyph("B").unwrap().set_width(42.0);

    assert!(font.default_layer().unwrap().scheduled_for_deletion().is_empty());
    assert!(font.test_for_external_changes().unwrap().is_empty());

    store.clear_operations();
    font.save().unwrap();
    let stored = GlyphData::decode(&store.read_entry(&glyph_kind(), "B").unwrap()).unwrap();
    assert_eq!(stored.width, 42.0);
    assert!(store
        .operations()
        .iter()
        .all(|operation| !matches!(operation, fontdoc_core::repo::StoreOperation::Remove { .. })));
}

#[test]
fn unloaded_glyphs_are_never_reported_modified() {
    let store = seeded_store(&["A"]);
    let font = Font::open(Rc::new(store.clone())).unwrap();

    store.write_entry(&glyph_kind(), "A", &stored_glyph("A", 1.0)).unwrap();

    assert!(font.test_for_external_changes().unwrap().is_empty());
    assert_eq!(font.glyph("A").unwrap().width(), 1.0);
}

#[test]
fn external_record_edit_is_detected_and_reloaded() {
    let store = seeded_store(&["A"]);
    let font = Font::open(Rc::new(store.clone())).unwrap();

    store
        .write_entry(&EntryKind::Meta, "kerning.json", br#"{"A":{"V":-40.0}}"#)
        .unwrap();

    let changes = font.test_for_external_changes().unwrap();
    assert!(changes.kerning);
    assert!(!changes.info);
    assert!(changes.layers.is_empty());

    font.reload(&changes).unwrap();
    assert_eq!(font.kerning().with(|kerning: &Kerning| kerning.pair("A", "V")), Some(-40.0));
    assert!(font.test_for_external_changes().unwrap().is_empty());
}

#[test]
fn external_layer_is_added_on_reload() {
    let store = seeded_store(&["A"]);
    let font = Font::open(Rc::new(store.clone())).unwrap();

    store.ensure_layer("sketch", false).unwrap();
    store
        .write_entry(&EntryKind::Glyphs("sketch".to_string()), "A", &stored_glyph("A", 5.0))
        .unwrap();

    let changes = font.test_for_external_changes().unwrap();
    assert_eq!(changes.layers.added, names(&["sketch"]));
    assert!(changes.layers.order_changed);

    font.reload(&changes).unwrap();
    let sketch = font.layers().layer("sketch").unwrap();
    assert_eq!(sketch.glyph("A").unwrap().width(), 5.0);
    assert_eq!(font.layers().layer_order(), vec![DEFAULT_LAYER_NAME, "sketch"]);
    assert!(font.test_for_external_changes().unwrap().is_empty());
}

#[test]
fn loaded_image_modification_is_detected() {
    let store = MemoryStore::new();
    let font = Font::new();
    font.images().set("logo.png", png(b"one")).unwrap();
    font.data().set("com.example/notes.txt", b"hello".to_vec()).unwrap();
    font.save_as(Rc::new(store.clone())).unwrap();

    store.write_entry(&EntryKind::Images, "logo.png", &png(b"two")).unwrap();
    store.remove_entry(&EntryKind::Data, "com.example/notes.txt").unwrap();

    let changes = font.test_for_external_changes().unwrap();
    assert_eq!(changes.images.modified, names(&["logo.png"]));
    assert_eq!(changes.data.deleted, names(&["com.example/notes.txt"]));

    font.reload(&changes).unwrap();
    assert_eq!(font.images().get("logo.png").unwrap(), png(b"two"));
    assert!(!font.data().contains("com.example/notes.txt"));
    assert!(font.test_for_external_changes().unwrap().is_empty());
}

fn store_with_notes() -> MemoryStore {
    let store = MemoryStore::new();
    let font = Font::new();
    font.data().set("notes.txt", b"one".to_vec()).unwrap();
    font.save_as(Rc::new(store.clone())).unwrap();
    store
}

#[test]
fn edited_then_deleted_blob_is_not_reported_added() {
    let store = store_with_notes();
    let font = Font::open(Rc::new(store.clone())).unwrap();

    font.data().get("notes.txt").unwrap();
    font.data().set("notes.txt", b"two".to_vec()).unwrap();
    font.data().remove("notes.txt").unwrap();

    assert!(font.test_for_external_changes().unwrap().is_empty());
}

#[test]
fn edited_blob_rewritten_on_disk_is_reported_modified() {
    let store = store_with_notes();
    let font = Font::open(Rc::new(store.clone())).unwrap();

    font.data().get("notes.txt").unwrap();
    font.data().set("notes.txt", b"two".to_vec()).unwrap();
    store
        .write_entry(&EntryKind::Data, "notes.txt", b"external")
        .unwrap();

    let changes = font.test_for_external_changes().unwrap();
    assert_eq!(changes.data.modified, names(&["notes.txt"]));
}

#[test]
fn blob_set_without_reading_still_tracks_the_stored_file() {
    let store = store_with_notes();
    let font = Font::open(Rc::new(store.clone())).unwrap();

    font.data().set("notes.txt", b"two".to_vec()).unwrap();
    assert!(font.test_for_external_changes().unwrap().is_empty());

    store
        .write_entry(&EntryKind::Data, "notes.txt", b"external")
        .unwrap();
    let changes = font.test_for_external_changes().unwrap();
    assert_eq!(changes.data.modified, names(&["notes.txt"]));
}

#[test]
fn replaced_then_removed_glyph_is_not_reported_added() {
    let store = seeded_store(&["A", "B"]);
    let font = Font::open(Rc::new(store.clone())).unwrap();
    let layer = font.default_layer().unwrap();

    layer.glyph("A").unwrap();
    layer.new_glyph("A").set_width(1.0);
    layer.remove_glyph("A").unwrap();

    layer.new_glyph("B");
    layer.remove_glyph("B").unwrap();

    assert!(font.test_for_external_changes().unwrap().is_empty());
    assert_eq!(layer.scheduled_for_deletion(), vec!["A", "B"]);
}

#[test]
fn replacement_glyph_keeps_watching_the_stored_record() {
    let store = seeded_store(&["A"]);
    let font = Font::open(Rc::new(store.clone())).unwrap();
    let layer = font.default_layer().unwrap();

    layer.glyph("A").unwrap();
    layer.new_glyph("A");
    assert!(font.test_for_external_changes().unwrap().is_empty());

    store.write_entry(&glyph_kind(), "A", &stored_glyph("A", 810.0)).unwrap();
    let changes = font.test_for_external_changes().unwrap();
    assert_eq!(
        changes.layers.modified[DEFAULT_LAYER_NAME].modified,
        names(&["A"])
    );
}
