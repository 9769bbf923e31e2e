use fontdoc_core::model::{Features, DEFAULT_LAYER_NAME, PNG_SIGNATURE};
use fontdoc_core::repo::StoreOperation;
use fontdoc_core::{
    DocError, DocumentObject, EntryKind, Font, FontStore, GlyphData, LayerAction, MemoryStore,
    SaveOptions,
};
use std::rc::Rc;

fn glyph_kind(layer: &str) -> EntryKind {
    EntryKind::Glyphs(layer.to_string())
}

fn stored_width(store: &MemoryStore, layer: &str, name: &str) -> f64 {
    GlyphData::decode(&store.read_entry(&glyph_kind(layer), name).unwrap())
        .unwrap()
        .width
}

fn png(payload: &[u8]) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

fn saved_font(glyphs: &[&str], layers: &[&str]) -> (Rc<Font>, MemoryStore) {
    let store = MemoryStore::new();
    let font = Font::new();
    for name in glyphs {
        font.new_glyph(name).unwrap().set_width(100.0);
    }
    for name in layers {
        font.layers().new_layer(name).unwrap();
    }
    font.save_as(Rc::new(store.clone())).unwrap();
    (font, store)
}

#[test]
fn second_save_without_edits_touches_nothing() {
    let (font, store) = saved_font(&["A", "B"], &["sketch"]);
    assert!(!font.is_dirty());

    store.clear_operations();
    font.save().unwrap();
    assert!(store.operations().is_empty());

    font.glyph("A").unwrap().set_width(250.0);
    font.save().unwrap();
    assert_eq!(store.write_count(), 1);
    assert_eq!(stored_width(&store, DEFAULT_LAYER_NAME, "A"), 250.0);

    store.clear_operations();
    font.save().unwrap();
    assert_eq!(store.write_count(), 0);
}

#[test]
fn reopened_document_saves_nothing_until_edited() {
    let (_font, store) = saved_font(&["A"], &[]);
    let reopened = Font::open(Rc::new(store.clone())).unwrap();
    reopened.glyph("A").unwrap();

    store.clear_operations();
    reopened.save().unwrap();
    assert!(store.operations().is_empty());
    assert!(!reopened.is_dirty());
}

#[test]
fn layer_history_is_replayed_in_place() {
    let (_font, store) = saved_font(&[], &["X", "Y"]);
    let font = Font::open(Rc::new(store.clone())).unwrap();
    font.layers().layer("X").unwrap().new_glyph("x").set_width(10.0);
    font.save().unwrap();

    let layers = font.layers();
    layers.new_layer("Z").unwrap();
    layers.remove_layer("Y").unwrap();
    layers.layer("X").unwrap().set_name("X2").unwrap();
    layers.set_default_layer("X2").unwrap();
    assert_eq!(
        layers.action_history(),
        vec![
            LayerAction::New("Z".to_string()),
            LayerAction::Delete("Y".to_string()),
            LayerAction::Rename {
                old: "X".to_string(),
                new: "X2".to_string()
            },
            LayerAction::SetDefault {
                old: Some(DEFAULT_LAYER_NAME.to_string()),
                new: "X2".to_string()
            },
        ]
    );

    store.clear_operations();
    font.save().unwrap();

    let contents = store.layer_contents().unwrap();
    assert_eq!(contents.order, vec![DEFAULT_LAYER_NAME, "X2", "Z"]);
    assert_eq!(contents.default.as_deref(), Some("X2"));
    assert!(layers.action_history().is_empty());
    assert_eq!(stored_width(&store, "X2", "x"), 10.0);

    let operations = store.operations();
    assert!(operations.contains(&StoreOperation::RemoveLayer("Y".to_string())));
    assert!(operations.contains(&StoreOperation::RenameLayer {
        old: "X".to_string(),
        new: "X2".to_string()
    }));
    assert!(operations.contains(&StoreOperation::CreateLayer("Z".to_string())));
    assert!(font.test_for_external_changes().unwrap().is_empty());
}

#[test]
fn deleted_and_renamed_glyphs_are_removed_in_place() {
    let (_font, store) = saved_font(&["A", "B", "C"], &[]);
    let font = Font::open(Rc::new(store.clone())).unwrap();

    font.remove_glyph("B").unwrap();
    font.glyph("C").unwrap().set_name("C.alt").unwrap();
    assert_eq!(
        font.default_layer().unwrap().scheduled_for_deletion(),
        vec!["B".to_string(), "C".to_string()]
    );
    font.save().unwrap();

    let listing = store.list_entries(&glyph_kind(DEFAULT_LAYER_NAME)).unwrap();
    let listed: Vec<&str> = listing.iter().map(String::as_str).collect();
    assert_eq!(listed, vec!["A", "C.alt"]);
    assert!(font.default_layer().unwrap().scheduled_for_deletion().is_empty());
    assert!(font.test_for_external_changes().unwrap().is_empty());
}

#[test]
fn removing_an_already_missing_file_is_tolerated() {
    let (_font, store) = saved_font(&["A", "B"], &[]);
    let font = Font::open(Rc::new(store.clone())).unwrap();

    font.remove_glyph("B").unwrap();
    store.remove_entry(&glyph_kind(DEFAULT_LAYER_NAME), "B").unwrap();

    font.save().unwrap();
    assert!(!font.contains_glyph("B"));
}

#[test]
fn save_as_copies_unloaded_glyphs_and_rewrites_loaded_ones() {
    let (_font, source) = saved_font(&["A", "B", "D"], &[]);
    let font = Font::open(Rc::new(source.clone())).unwrap();
    font.glyph("A").unwrap().set_width(640.0);
    font.remove_glyph("B").unwrap();
    font.new_glyph("C").unwrap();

    let target = MemoryStore::new();
    font.save_as(Rc::new(target.clone())).unwrap();

    let listing = target.list_entries(&glyph_kind(DEFAULT_LAYER_NAME)).unwrap();
    let listed: Vec<&str> = listing.iter().map(String::as_str).collect();
    assert_eq!(listed, vec!["A", "C", "D"]);
    assert_eq!(stored_width(&target, DEFAULT_LAYER_NAME, "A"), 640.0);
    assert_eq!(stored_width(&target, DEFAULT_LAYER_NAME, "D"), 100.0);
    assert!(!font.default_layer().unwrap().is_loaded("D"));
    assert_eq!(stored_width(&source, DEFAULT_LAYER_NAME, "A"), 100.0);
    assert!(source
        .list_entries(&glyph_kind(DEFAULT_LAYER_NAME))
        .unwrap()
        .contains("B"));
    assert_eq!(
        font.store().map(|store| store.location()),
        Some(target.location())
    );

    target.clear_operations();
    font.save().unwrap();
    assert_eq!(target.write_count(), 0);
}

#[test]
fn save_as_copies_unloaded_blobs() {
    let source = MemoryStore::new();
    let font = Font::new();
    font.images().set("logo.png", png(b"logo")).unwrap();
    font.data().set("notes.txt", b"hello".to_vec()).unwrap();
    font.save_as(Rc::new(source.clone())).unwrap();

    let reopened = Font::open(Rc::new(source.clone())).unwrap();
    assert!(!reopened.images().is_loaded("logo.png"));
    let target = MemoryStore::new();
    reopened.save_as(Rc::new(target.clone())).unwrap();

    assert_eq!(target.read_entry(&EntryKind::Images, "logo.png").unwrap(), png(b"logo"));
    assert_eq!(target.read_entry(&EntryKind::Data, "notes.txt").unwrap(), b"hello");
}

#[test]
fn older_formats_drop_unsupported_parts_and_queue_layer_creation() {
    let font = Font::new();
    font.new_glyph("A").unwrap();
    font.layers().new_layer("sketch").unwrap().new_glyph("A");
    font.features().set(Features("languagesystem DFLT dflt;".to_string()));
    font.images().set("logo.png", png(b"logo")).unwrap();

    let format_two = MemoryStore::with_format_version(2);
    font.save_as(Rc::new(format_two.clone())).unwrap();

    let contents = format_two.layer_contents().unwrap();
    assert_eq!(contents.order, vec![DEFAULT_LAYER_NAME]);
    assert!(format_two.list_entries(&EntryKind::Images).unwrap().is_empty());
    assert!(format_two
        .list_entries(&EntryKind::Meta)
        .unwrap()
        .contains("features.fea"));
    assert_eq!(
        font.layers().action_history(),
        vec![LayerAction::New("sketch".to_string())]
    );
    assert_eq!(font.format_version(), Some(2));

    let format_three = MemoryStore::new();
    font.save_as(Rc::new(format_three.clone())).unwrap();
    let contents = format_three.layer_contents().unwrap();
    assert_eq!(contents.order, vec![DEFAULT_LAYER_NAME, "sketch"]);
    assert!(format_three
        .list_entries(&glyph_kind("sketch"))
        .unwrap()
        .contains("A"));
    assert!(font.layers().action_history().is_empty());
}

#[test]
fn format_one_skips_features() {
    let font = Font::new();
    font.features().set(Features("feature liga {} liga;".to_string()));
    let store = MemoryStore::with_format_version(1);
    font.save_as(Rc::new(store.clone())).unwrap();

    let meta = store.list_entries(&EntryKind::Meta).unwrap();
    assert!(!meta.contains("features.fea"));
    assert!(meta.contains("fontinfo.json"));
}

#[test]
fn older_format_without_a_default_layer_is_rejected() {
    let font = Font::new();
    font.layers().new_layer("sketch").unwrap();
    font.layers().remove_layer(DEFAULT_LAYER_NAME).unwrap();
    assert!(font.layers().default_layer_name().is_none());

    let error = font
        .save_as(Rc::new(MemoryStore::with_format_version(2)))
        .unwrap_err();
    assert!(matches!(error, DocError::NoDefaultLayer));
}

#[test]
fn unreferenced_images_can_be_pruned_on_save() {
    let font = Font::new();
    font.images().set("used.png", png(b"used")).unwrap();
    font.images().set("stale.png", png(b"stale")).unwrap();
    font.new_glyph("A").unwrap().set_image(Some("used.png".to_string()));
    assert_eq!(font.unreferenced_images().unwrap(), vec!["stale.png".to_string()]);

    let store = MemoryStore::new();
    font.save_with(
        Some(Rc::new(store.clone()) as Rc<dyn FontStore>),
        SaveOptions {
            remove_unreferenced_images: true,
        },
    )
    .unwrap();

    let images = store.list_entries(&EntryKind::Images).unwrap();
    assert!(images.contains("used.png"));
    assert!(!images.contains("stale.png"));
    assert!(!font.images().contains("stale.png"));
}
