use fontdoc_core::model::{Kerning, DEFAULT_LAYER_NAME, PNG_SIGNATURE};
use fontdoc_core::{DirStore, EntryKind, Font, FontStore, StoreError};
use std::path::Path;
use std::rc::Rc;

fn png(payload: &[u8]) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

fn open_font(root: &Path) -> Rc<Font> {
    Font::open(Rc::new(DirStore::open(root).unwrap())).unwrap()
}

fn sample_font(root: &Path) {
    let font = Font::new();
    let upper = font.new_glyph("A").unwrap();
    upper.set_width(500.0);
    upper.set_unicodes(vec![0x41]);
    font.new_glyph("a").unwrap().set_width(400.0);
    font.layers()
        .new_layer("Sketch")
        .unwrap()
        .new_glyph("A")
        .set_width(3.0);
    font.kerning()
        .update(|kerning: &mut Kerning| kerning.set_pair("A", "V", -40.0));
    font.images().set("logo.png", png(b"logo")).unwrap();
    font.data().set("com.example/notes.txt", b"hello".to_vec()).unwrap();
    font.save_as(Rc::new(DirStore::create(root, 3).unwrap())).unwrap();
}

#[test]
fn document_round_trips_through_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Sample.font");
    sample_font(&root);

    let font = open_font(&root);
    assert_eq!(font.format_version(), Some(3));
    assert_eq!(font.glyph_names().unwrap(), vec!["A", "a"]);
    assert_eq!(font.glyph("A").unwrap().width(), 500.0);
    assert_eq!(font.glyph("A").unwrap().unicodes(), vec![0x41]);
    assert_eq!(font.glyph("a").unwrap().width(), 400.0);
    assert_eq!(
        font.layers().layer_order(),
        vec![DEFAULT_LAYER_NAME, "Sketch"]
    );
    let sketch = font.layers().layer("Sketch").unwrap();
    assert_eq!(sketch.glyph("A").unwrap().width(), 3.0);
    assert_eq!(
        font.kerning().with(|kerning: &Kerning| kerning.pair("A", "V")),
        Some(-40.0)
    );
    assert_eq!(font.images().get("logo.png").unwrap(), png(b"logo"));
    assert_eq!(font.data().get("com.example/notes.txt").unwrap(), b"hello");
    assert!(font.test_for_external_changes().unwrap().is_empty());
}

#[test]
fn recreating_the_same_directory_is_an_in_place_save() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Sample.font");
    sample_font(&root);

    let font = open_font(&root);
    font.remove_glyph("a").unwrap();
    font.save_as(Rc::new(DirStore::create(&root, 3).unwrap()))
        .unwrap();

    let store = DirStore::open(&root).unwrap();
    let names = store
        .list_entries(&EntryKind::Glyphs(DEFAULT_LAYER_NAME.to_string()))
        .unwrap();
    assert!(names.contains("A"));
    assert!(!names.contains("a"));
}

#[test]
fn files_added_and_removed_on_disk_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Sample.font");
    sample_font(&root);
    let font = open_font(&root);

    let outside = DirStore::open(&root).unwrap();
    let glyphs = EntryKind::Glyphs(DEFAULT_LAYER_NAME.to_string());
    let bytes = outside.read_entry(&glyphs, "a").unwrap();
    outside.write_entry(&glyphs, "b", &bytes).unwrap();
    outside.remove_entry(&glyphs, "A").unwrap();

    let changes = font.test_for_external_changes().unwrap();
    let glyph_changes = &changes.layers.modified[DEFAULT_LAYER_NAME];
    assert!(glyph_changes.added.contains("b"));
    assert!(glyph_changes.deleted.contains("A"));

    font.reload(&changes).unwrap();
    assert_eq!(font.glyph_names().unwrap(), vec!["a", "b"]);
}

#[test]
fn renaming_the_default_layer_keeps_its_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Sample.font");
    sample_font(&root);

    let font = open_font(&root);
    font.default_layer().unwrap().set_name("foreground").unwrap();
    font.layers().layer("Sketch").unwrap().set_name("background").unwrap();
    font.save().unwrap();

    assert!(root.join("glyphs").join("_a.json").is_file());
    assert!(root.join("glyphs.background").is_dir());
    assert!(!root.join("glyphs._sketch").exists());

    let reopened = open_font(&root);
    assert_eq!(reopened.layers().default_layer_name().as_deref(), Some("foreground"));
    assert_eq!(
        reopened.layers().layer("background").unwrap().glyph("A").unwrap().width(),
        3.0
    );
}

#[test]
fn opening_a_directory_without_metadata_fails() {
    let dir = tempfile::tempdir().unwrap();
    let error = DirStore::open(dir.path()).unwrap_err();
    assert!(matches!(error, StoreError::InvalidData(_)));
}

#[test]
fn entry_names_cannot_escape_their_subtree() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::create(dir.path(), 3).unwrap();
    let error = store
        .write_entry(&EntryKind::Data, "../outside.txt", b"x")
        .unwrap_err();
    assert!(matches!(error, StoreError::InvalidData(_)));
    assert!(!dir.path().join("outside.txt").exists());
}
