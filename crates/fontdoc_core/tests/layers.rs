use fontdoc_core::model::layer_set::{LAYER_SET_LAYER_DELETED, LAYER_SET_LAYER_WILL_BE_DELETED};
use fontdoc_core::model::{Component, DEFAULT_LAYER_NAME, PNG_SIGNATURE};
use fontdoc_core::{
    DocError, DocumentObject, Font, Glyph, LayerAction, Notification, StoreError,
};
use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;

#[derive(Default)]
struct Recorder {
    seen: RefCell<Vec<String>>,
}

impl Recorder {
    fn record(&self, notification: &Notification) {
        self.seen.borrow_mut().push(notification.name().to_owned());
    }
}

#[test]
fn layer_deletion_is_announced_before_and_after() {
    let font = Font::new();
    font.layers().new_layer("sketch").unwrap();
    let recorder = Rc::new(Recorder::default());
    font.center().subscribe(
        &recorder,
        Recorder::record,
        Some(LAYER_SET_LAYER_WILL_BE_DELETED),
        None,
    );
    font.center()
        .subscribe(&recorder, Recorder::record, Some(LAYER_SET_LAYER_DELETED), None);

    font.layers().remove_layer("sketch").unwrap();

    assert_eq!(
        *recorder.seen.borrow(),
        vec![LAYER_SET_LAYER_WILL_BE_DELETED, LAYER_SET_LAYER_DELETED]
    );
    assert!(!font.layers().contains("sketch"));
    assert_eq!(
        font.layers().action_history().last(),
        Some(&LayerAction::Delete("sketch".to_string()))
    );
}

#[test]
fn layer_collection_errors_leave_state_untouched() {
    let font = Font::new();
    let layers = font.layers();
    layers.new_layer("sketch").unwrap();

    assert!(matches!(
        layers.new_layer("sketch"),
        Err(DocError::DuplicateLayerName(_))
    ));
    assert!(matches!(
        layers.layer("missing"),
        Err(DocError::LayerNotFound(_))
    ));
    assert!(matches!(
        layers.set_default_layer("missing").unwrap_err(),
        DocError::LayerNotFound(_)
    ));
    assert!(matches!(
        layers
            .set_layer_order(&["sketch".to_string(), "sketch".to_string()])
            .unwrap_err(),
        DocError::InvalidLayerOrder(_)
    ));
    assert_eq!(layers.layer_order(), vec![DEFAULT_LAYER_NAME, "sketch"]);

    layers
        .set_layer_order(&["sketch".to_string(), DEFAULT_LAYER_NAME.to_string()])
        .unwrap();
    assert_eq!(layers.layers()[0].name(), "sketch");
}

#[test]
fn layer_transport_blob_round_trips_into_another_document() {
    let source = Font::new();
    let a = source.new_glyph("A").unwrap();
    a.set_width(500.0);
    a.set_unicodes(vec![0x41]);
    source.new_glyph("Aacute").unwrap().add_component(Component::new("A")).unwrap();
    let blob = source.default_layer().unwrap().to_transport_blob().unwrap();

    let target = Font::new();
    let sketch = target.layers().new_layer("sketch").unwrap();
    sketch.new_glyph("A").set_width(1.0);
    let inserted = sketch.load_transport_blob(&blob).unwrap();

    assert_eq!(inserted, vec!["A", "Aacute"]);
    assert_eq!(sketch.glyph("A").unwrap().width(), 500.0);
    assert_eq!(sketch.glyph("A").unwrap().data(), a.data());
    assert_eq!(
        sketch
            .component_references()
            .get("A")
            .map(|users| users.iter().cloned().collect::<Vec<_>>()),
        Some(vec!["Aacute".to_string()])
    );
    assert!(sketch.is_dirty());
}

#[test]
fn malformed_transport_blob_is_rejected_without_changes() {
    let font = Font::new();
    let layer = font.default_layer().unwrap();

    let error = layer.load_transport_blob(b"{not json").unwrap_err();
    assert!(matches!(error, DocError::Codec(_)));
    assert!(error.source().is_some());
    assert!(layer.is_empty());
}

#[test]
fn glyph_copies_and_adoption() {
    let font = Font::new();
    let layer = font.default_layer().unwrap();
    let original = layer.new_glyph("A");
    original.set_width(300.0);

    let copy = layer.insert_glyph(&original, Some("A.alt")).unwrap();
    assert_eq!(copy.width(), 300.0);
    assert!(!Rc::ptr_eq(&copy, &original));
    assert_eq!(layer.glyph_names(), vec!["A", "A.alt"]);

    let detached = Glyph::new("B");
    layer.adopt_glyph(detached.clone()).unwrap();
    assert!(Rc::ptr_eq(&layer.glyph("B").unwrap(), &detached));

    let sketch = font.layers().new_layer("sketch").unwrap();
    let error = sketch.adopt_glyph(detached).unwrap_err();
    assert!(matches!(error, DocError::ForeignParent { object: "glyph", .. }));
}

#[test]
fn missing_items_are_reported_by_name() {
    let font = Font::new();
    let message = font.glyph("missing").err().map(|error| error.to_string());
    assert_eq!(message.as_deref(), Some("glyph not found: missing"));
    assert!(matches!(
        font.remove_glyph("missing").unwrap_err(),
        DocError::GlyphNotFound(_)
    ));
    assert!(matches!(
        font.images().get("nope.png").unwrap_err(),
        DocError::ImageNotFound(_)
    ));
    assert!(matches!(
        font.data().remove("nope").unwrap_err(),
        DocError::DataNotFound(_)
    ));
    assert!(matches!(
        font.images().set("../evil.png", PNG_SIGNATURE.to_vec()).unwrap_err(),
        DocError::IllegalFileName(_)
    ));
    assert!(matches!(font.save().unwrap_err(), DocError::NoStore));
}

#[test]
fn store_errors_are_wrapped_with_their_source() {
    let error = DocError::from(StoreError::LayerNotFound("sketch".to_string()));
    assert!(matches!(&error, DocError::Store(inner) if inner.is_not_found()));
    assert!(error.source().is_some());
    assert!(error.to_string().contains("sketch"));
}
