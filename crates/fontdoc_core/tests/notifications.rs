use fontdoc_core::model::glyph::{GLYPH_NAME_CHANGED, GLYPH_WIDTH_CHANGED};
use fontdoc_core::model::layer::{LAYER_GLYPH_ADDED, LAYER_GLYPH_CHANGED, LAYER_GLYPH_NAME_CHANGED};
use fontdoc_core::model::UndoEvent;
use fontdoc_core::{
    DocError, DocumentObject, Font, Notification, NotificationData, NotificationScope,
};
use std::cell::RefCell;
use std::rc::Rc;

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

    fn names(&self) -> Vec<String> {
        self.seen.borrow().iter().map(|(name, _)| name.clone()).collect()
    }

    fn count(&self, name: &str) -> usize {
        self.seen.borrow().iter().filter(|(seen, _)| seen == name).count()
    }

    fn data_of(&self, name: &str) -> Option<NotificationData> {
        self.seen
            .borrow()
            .iter()
            .find(|(seen, _)| seen == name)
            .map(|(_, data)| data.clone())
    }
}

fn watched_font() -> (Rc<Font>, Rc<Recorder>) {
    let font = Font::new();
    let recorder = Rc::new(Recorder::default());
    font.center().subscribe(&recorder, Recorder::record, None, None);
    (font, recorder)
}

#[test]
fn glyph_edit_cascades_dirty_up_to_the_font() {
    let (font, recorder) = watched_font();
    let glyph = font.new_glyph("A").unwrap();
    let layer = font.default_layer().unwrap();
    glyph.set_dirty(false);
    layer.set_dirty(false);
    font.layers().set_dirty(false);
    font.set_dirty(false);

    glyph.set_width(500.0);

    let names = recorder.names();
    for expected in [
        GLYPH_WIDTH_CHANGED,
        "Glyph.Changed",
        LAYER_GLYPH_CHANGED,
        "Layer.Changed",
        "LayerSet.Changed",
        "Font.Changed",
    ] {
        assert!(names.iter().any(|name| name == expected), "missing {expected}");
    }
    assert!(glyph.is_dirty());
    assert!(layer.is_dirty());
    assert!(font.layers().is_dirty());
    assert!(font.is_dirty());
    assert_eq!(
        recorder.data_of(LAYER_GLYPH_CHANGED),
        Some(NotificationData::Name("A".to_string()))
    );
}

#[test]
fn clearing_a_child_dirty_flag_does_not_clear_its_parents() {
    let (font, _recorder) = watched_font();
    let glyph = font.new_glyph("A").unwrap();
    assert!(font.is_dirty());

    glyph.set_dirty(false);

    assert!(!glyph.is_dirty());
    assert!(font.default_layer().unwrap().is_dirty());
    assert!(font.is_dirty());
}

#[test]
fn glyph_rename_rekeys_the_layer() {
    let (font, recorder) = watched_font();
    let glyph = font.new_glyph("A").unwrap();
    font.new_glyph("C").unwrap();
    let layer = font.default_layer().unwrap();

    glyph.set_name("B").unwrap();

    assert!(layer.contains("B"));
    assert!(!layer.contains("A"));
    assert!(Rc::ptr_eq(&layer.glyph("B").unwrap(), &glyph));
    assert_eq!(recorder.count(GLYPH_NAME_CHANGED), 1);
    assert_eq!(
        recorder.data_of(LAYER_GLYPH_NAME_CHANGED),
        Some(NotificationData::Renamed {
            old: "A".to_string(),
            new: "B".to_string()
        })
    );

    let error = glyph.set_name("C").unwrap_err();
    assert!(matches!(error, DocError::DuplicateGlyphName(name) if name == "C"));
    assert_eq!(glyph.name(), "B");
}

#[test]
fn held_notifications_are_collapsed_and_delivered_on_release() {
    let (font, recorder) = watched_font();
    let glyph = font.new_glyph("A").unwrap();
    let scope = NotificationScope::all().notification(GLYPH_WIDTH_CHANGED);

    font.center().hold_notifications(scope.clone());
    glyph.set_width(100.0);
    glyph.set_width(200.0);
    glyph.set_width(300.0);
    assert_eq!(recorder.count(GLYPH_WIDTH_CHANGED), 0);

    assert!(font.center().release_held_notifications(&scope));
    assert_eq!(recorder.count(GLYPH_WIDTH_CHANGED), 1);
    assert!(!font.center().release_held_notifications(&scope));
}

#[test]
fn disabled_object_scope_drops_only_that_notification() {
    let (font, recorder) = watched_font();
    let layer = font.default_layer().unwrap();

    layer.base().disable_notifications(Some(LAYER_GLYPH_ADDED));
    font.new_glyph("A").unwrap();
    assert_eq!(recorder.count(LAYER_GLYPH_ADDED), 0);
    assert!(recorder.count("Glyph.Changed") > 0);

    layer.base().enable_notifications(Some(LAYER_GLYPH_ADDED));
    font.new_glyph("B").unwrap();
    assert_eq!(recorder.count(LAYER_GLYPH_ADDED), 1);
}

#[test]
fn dropped_observer_is_no_longer_counted() {
    let font = Font::new();
    let before = font.center().observer_count();
    let recorder = Rc::new(Recorder::default());
    font.center().subscribe(&recorder, Recorder::record, None, None);
    assert_eq!(font.center().observer_count(), before + 1);

    drop(recorder);
    assert_eq!(font.center().observer_count(), before);
    font.post_notification("Font.Ping", NotificationData::None);
    assert_eq!(font.center().observer_count(), before);
}

#[test]
fn undo_events_are_named_after_the_object_kind() {
    let (font, recorder) = watched_font();
    let layer = font.default_layer().unwrap();

    font.post_undo_event(UndoEvent::BeginUndo);
    layer.post_undo_event(UndoEvent::EndRedo);

    let names = recorder.names();
    assert!(names.contains(&"Font.BeginUndo".to_string()));
    assert!(names.contains(&"Layer.EndRedo".to_string()));
}

#[test]
fn removed_glyph_stops_cascading() {
    let (font, _recorder) = watched_font();
    let glyph = font.new_glyph("A").unwrap();
    let layer = font.default_layer().unwrap();
    layer.remove_glyph("A").unwrap();
    layer.set_dirty(false);

    glyph.set_width(10.0);

    assert!(glyph.layer().is_none());
    assert!(glyph.notification_center().is_none());
    assert!(!layer.is_dirty());
}
