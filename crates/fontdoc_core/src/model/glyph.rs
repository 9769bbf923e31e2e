//! Glyph object and its outline value types.

use crate::model::base::{impl_document_object, DocumentObject, ObjectBase, ObjectKind};
use crate::model::error::{DocError, DocResult};
use crate::model::layer::Layer;
use crate::model::representation::{
    RepresentationCache, RepresentationParams, RepresentationRegistry, Represented,
};
use crate::model::stamp::Stamp;
use crate::notify::{NotificationData, ObservableRef};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use uuid::Uuid;

pub const GLYPH_NAME_CHANGED: &str = "Glyph.NameChanged";
pub const GLYPH_UNICODES_CHANGED: &str = "Glyph.UnicodesChanged";
pub const GLYPH_WIDTH_CHANGED: &str = "Glyph.WidthChanged";
pub const GLYPH_HEIGHT_CHANGED: &str = "Glyph.HeightChanged";
pub const GLYPH_CONTOURS_CHANGED: &str = "Glyph.ContoursChanged";
pub const GLYPH_COMPONENTS_CHANGED: &str = "Glyph.ComponentsChanged";
pub const GLYPH_ANCHORS_CHANGED: &str = "Glyph.AnchorsChanged";
pub const GLYPH_IMAGE_CHANGED: &str = "Glyph.ImageChanged";
pub const GLYPH_LIB_CHANGED: &str = "Glyph.LibChanged";
pub const GLYPH_NOTE_CHANGED: &str = "Glyph.NoteChanged";

/// Built-in representation: `Option<Bounds>` of the glyph's own points.
pub const CONTROL_POINT_BOUNDS: &str = "control_point_bounds";
/// Built-in representation: `Vec<bool>`, clockwise flag per contour.
pub const CONTOUR_DIRECTIONS: &str = "contour_directions";

const IDENTIFIER_LENGTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    Move,
    Line,
    Curve,
    QCurve,
}

/// Outline point. `segment_type == None` marks an off-curve point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_type: Option<SegmentType>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub smooth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl Point {
    pub fn on_curve(x: f64, y: f64, segment_type: SegmentType) -> Self {
        Self {
            x,
            y,
            segment_type: Some(segment_type),
            ..Self::default()
        }
    }

    pub fn off_curve(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Contour {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub points: Vec<Point>,
}

impl Contour {
    pub fn new(points: Vec<Point>) -> Self {
        Self {
            identifier: None,
            points,
        }
    }

    /// Shoelace area of the control polygon; negative when clockwise.
    pub fn signed_area(&self) -> f64 {
        let count = self.points.len();
        if count < 3 {
            return 0.0;
        }
        let twice: f64 = (0..count)
            .map(|index| {
                let current = &self.points[index];
                let next = &self.points[(index + 1) % count];
                current.x * next.y - next.x * current.y
            })
            .sum();
        twice / 2.0
    }

    pub fn is_clockwise(&self) -> bool {
        self.signed_area() < 0.0
    }

    fn identifiers(&self) -> impl Iterator<Item = &String> {
        self.identifier
            .iter()
            .chain(self.points.iter().filter_map(|point| point.identifier.as_ref()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub base_glyph: String,
    /// `[xx, xy, yx, yy, dx, dy]`
    #[serde(default = "identity_transform")]
    pub transform: [f64; 6],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl Component {
    pub fn new(base_glyph: impl Into<String>) -> Self {
        Self {
            base_glyph: base_glyph.into(),
            transform: identity_transform(),
            identifier: None,
        }
    }
}

fn identity_transform() -> [f64; 6] {
    [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Anchor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

/// Plain glyph record: what is persisted and transported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlyphData {
    pub name: String,
    pub width: f64,
    pub height: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unicodes: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contours: Vec<Contour>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<Anchor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub lib: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl GlyphData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn encode(&self) -> DocResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn decode(bytes: &[u8]) -> DocResult<Self> {
        let data: Self = serde_json::from_slice(bytes)?;
        data.identifiers()?;
        Ok(data)
    }

    /// All identifiers in use. Fails on the first duplicate.
    pub fn identifiers(&self) -> DocResult<BTreeSet<String>> {
        let mut seen = BTreeSet::new();
        let all = self
            .contours
            .iter()
            .flat_map(Contour::identifiers)
            .chain(self.components.iter().filter_map(|c| c.identifier.as_ref()))
            .chain(self.anchors.iter().filter_map(|a| a.identifier.as_ref()));
        for identifier in all {
            if !seen.insert(identifier.clone()) {
                return Err(DocError::DuplicateIdentifier(identifier.clone()));
            }
        }
        Ok(seen)
    }

    fn control_point_bounds(&self) -> Option<Bounds> {
        let mut points = self.contours.iter().flat_map(|contour| contour.points.iter());
        let first = points.next()?;
        let start = Bounds {
            x_min: first.x,
            y_min: first.y,
            x_max: first.x,
            y_max: first.y,
        };
        Some(points.fold(start, |bounds, point| Bounds {
            x_min: bounds.x_min.min(point.x),
            y_min: bounds.y_min.min(point.y),
            x_max: bounds.x_max.max(point.x),
            y_max: bounds.y_max.max(point.y),
        }))
    }
}

/// A glyph of a layer.
///
/// Mutators post a specific notification, then mark the glyph dirty.
pub struct Glyph {
    me: Weak<Glyph>,
    base: ObjectBase,
    representations: RepresentationCache,
    data: RefCell<GlyphData>,
    stamp: RefCell<Stamp>,
}

impl_document_object!(Glyph);

impl Represented for Glyph {
    fn representation_cache(&self) -> &RepresentationCache {
        &self.representations
    }

    fn weak_self(&self) -> Weak<Self> {
        self.me.clone()
    }

    fn register_builtin_representations(registry: &mut RepresentationRegistry<Self>) {
        registry.register(
            CONTROL_POINT_BOUNDS,
            &[GLYPH_CONTOURS_CHANGED],
            |glyph: &Glyph, _params: &RepresentationParams| {
                glyph.data.borrow().control_point_bounds()
            },
        );
        registry.register(
            CONTOUR_DIRECTIONS,
            &[GLYPH_CONTOURS_CHANGED],
            |glyph: &Glyph, _params: &RepresentationParams| {
                glyph
                    .data
                    .borrow()
                    .contours
                    .iter()
                    .map(Contour::is_clockwise)
                    .collect::<Vec<bool>>()
            },
        );
    }
}

impl Glyph {
    /// Creates a detached glyph.
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Self::build(GlyphData::new(name))
    }

    /// Creates a detached glyph from a record, validating identifiers.
    pub fn from_data(data: GlyphData) -> DocResult<Rc<Self>> {
        data.identifiers()?;
        Ok(Self::build(data))
    }

    /// Decodes a blob produced by [`to_transport_blob`](Self::to_transport_blob).
    pub fn from_transport_blob(blob: &[u8]) -> DocResult<Rc<Self>> {
        Self::from_data(serde_json::from_slice(blob)?)
    }

    fn build(data: GlyphData) -> Rc<Self> {
        Rc::new_cyclic(|me: &Weak<Self>| Self {
            me: me.clone(),
            base: ObjectBase::new(ObjectKind::Glyph, ObservableRef::new(me)),
            representations: RepresentationCache::default(),
            data: RefCell::new(data),
            stamp: RefCell::new(Stamp::default()),
        })
    }

    pub fn to_transport_blob(&self) -> DocResult<Vec<u8>> {
        Ok(serde_json::to_vec(&*self.data.borrow())?)
    }

    /// Snapshot of the glyph record.
    pub fn data(&self) -> GlyphData {
        self.data.borrow().clone()
    }

    pub fn layer(&self) -> Option<Rc<Layer>> {
        self.base.parent()?.into_any().downcast::<Layer>().ok()
    }

    pub fn name(&self) -> String {
        self.data.borrow().name.clone()
    }

    /// Renames the glyph. Fails when the owning layer already has `name`.
    pub fn set_name(&self, name: &str) -> DocResult<()> {
        let old = self.name();
        if old == name {
            return Ok(());
        }
        if let Some(layer) = self.layer() {
            if layer.contains(name) {
                return Err(DocError::DuplicateGlyphName(name.to_owned()));
            }
        }
        self.data.borrow_mut().name = name.to_owned();
        self.post_notification(
            GLYPH_NAME_CHANGED,
            NotificationData::Renamed {
                old,
                new: name.to_owned(),
            },
        );
        self.set_dirty(true);
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.data.borrow().width
    }

    pub fn set_width(&self, width: f64) {
        if self.data.borrow().width == width {
            return;
        }
        self.data.borrow_mut().width = width;
        self.changed(GLYPH_WIDTH_CHANGED, NotificationData::None);
    }

    pub fn height(&self) -> f64 {
        self.data.borrow().height
    }

    pub fn set_height(&self, height: f64) {
        if self.data.borrow().height == height {
            return;
        }
        self.data.borrow_mut().height = height;
        self.changed(GLYPH_HEIGHT_CHANGED, NotificationData::None);
    }

    pub fn unicodes(&self) -> Vec<u32> {
        self.data.borrow().unicodes.clone()
    }

    pub fn set_unicodes(&self, unicodes: Vec<u32>) {
        let old = self.unicodes();
        if old == unicodes {
            return;
        }
        self.data.borrow_mut().unicodes = unicodes.clone();
        self.changed(
            GLYPH_UNICODES_CHANGED,
            NotificationData::Unicodes { old, new: unicodes },
        );
    }

    pub fn contours(&self) -> Vec<Contour> {
        self.data.borrow().contours.clone()
    }

    pub fn contour_count(&self) -> usize {
        self.data.borrow().contours.len()
    }

    pub fn add_contour(&self, contour: Contour) -> DocResult<()> {
        self.check_new_identifiers(contour.identifiers())?;
        self.data.borrow_mut().contours.push(contour);
        self.changed(GLYPH_CONTOURS_CHANGED, NotificationData::None);
        Ok(())
    }

    pub fn remove_contour(&self, index: usize) -> DocResult<Contour> {
        let len = self.contour_count();
        if index >= len {
            return Err(DocError::IndexOutOfRange { index, len });
        }
        let removed = self.data.borrow_mut().contours.remove(index);
        self.changed(GLYPH_CONTOURS_CHANGED, NotificationData::None);
        Ok(removed)
    }

    pub fn clear_contours(&self) {
        if self.data.borrow().contours.is_empty() {
            return;
        }
        self.data.borrow_mut().contours.clear();
        self.changed(GLYPH_CONTOURS_CHANGED, NotificationData::None);
    }

    pub fn components(&self) -> Vec<Component> {
        self.data.borrow().components.clone()
    }

    pub fn add_component(&self, component: Component) -> DocResult<()> {
        self.check_new_identifiers(component.identifier.iter())?;
        self.data.borrow_mut().components.push(component);
        self.changed(GLYPH_COMPONENTS_CHANGED, NotificationData::None);
        Ok(())
    }

    pub fn remove_component(&self, index: usize) -> DocResult<Component> {
        let len = self.data.borrow().components.len();
        if index >= len {
            return Err(DocError::IndexOutOfRange { index, len });
        }
        let removed = self.data.borrow_mut().components.remove(index);
        self.changed(GLYPH_COMPONENTS_CHANGED, NotificationData::None);
        Ok(removed)
    }

    pub fn anchors(&self) -> Vec<Anchor> {
        self.data.borrow().anchors.clone()
    }

    pub fn add_anchor(&self, anchor: Anchor) -> DocResult<()> {
        self.check_new_identifiers(anchor.identifier.iter())?;
        self.data.borrow_mut().anchors.push(anchor);
        self.changed(GLYPH_ANCHORS_CHANGED, NotificationData::None);
        Ok(())
    }

    pub fn image(&self) -> Option<String> {
        self.data.borrow().image.clone()
    }

    /// Sets the file name of the referenced image.
    pub fn set_image(&self, file_name: Option<String>) {
        if self.data.borrow().image == file_name {
            return;
        }
        self.data.borrow_mut().image = file_name;
        self.changed(GLYPH_IMAGE_CHANGED, NotificationData::None);
    }

    pub fn lib_value(&self, key: &str) -> Option<serde_json::Value> {
        self.data.borrow().lib.get(key).cloned()
    }

    pub fn set_lib_value(&self, key: &str, value: serde_json::Value) {
        self.data.borrow_mut().lib.insert(key.to_owned(), value);
        self.changed(GLYPH_LIB_CHANGED, NotificationData::Name(key.to_owned()));
    }

    pub fn note(&self) -> Option<String> {
        self.data.borrow().note.clone()
    }

    pub fn set_note(&self, note: Option<String>) {
        if self.data.borrow().note == note {
            return;
        }
        self.data.borrow_mut().note = note;
        self.changed(GLYPH_NOTE_CHANGED, NotificationData::None);
    }

    /// Every identifier used by contours, points, components and anchors.
    pub fn identifiers(&self) -> BTreeSet<String> {
        self.data.borrow().identifiers().unwrap_or_default()
    }

    /// A fresh identifier not used anywhere in this glyph.
    pub fn generate_identifier(&self) -> String {
        let existing = self.identifiers();
        loop {
            let candidate: String = Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(IDENTIFIER_LENGTH)
                .collect();
            if !existing.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Copies everything but the name from `other`.
    pub fn copy_from(&self, other: &GlyphData) -> DocResult<()> {
        self.replace_data(other.clone(), true)
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp.borrow().clone()
    }

    pub(crate) fn set_stamp(&self, stamp: Stamp) {
        *self.stamp.borrow_mut() = stamp;
    }

    pub(crate) fn take_stamp(&self) -> Stamp {
        self.stamp.take()
    }

    /// Swaps in a new record, keeping the current name, and posts one
    /// notification per changed aspect.
    pub(crate) fn replace_data(&self, mut data: GlyphData, mark_dirty: bool) -> DocResult<()> {
        data.identifiers()?;
        data.name = self.name();
        let old = self.data.replace(data);
        let events = {
            let new = self.data.borrow();
            let mut events = Vec::new();
            if old.width != new.width {
                events.push((GLYPH_WIDTH_CHANGED, NotificationData::None));
            }
            if old.height != new.height {
                events.push((GLYPH_HEIGHT_CHANGED, NotificationData::None));
            }
            if old.unicodes != new.unicodes {
                events.push((
                    GLYPH_UNICODES_CHANGED,
                    NotificationData::Unicodes {
                        old: old.unicodes.clone(),
                        new: new.unicodes.clone(),
                    },
                ));
            }
            if old.contours != new.contours {
                events.push((GLYPH_CONTOURS_CHANGED, NotificationData::None));
            }
            if old.components != new.components {
                events.push((GLYPH_COMPONENTS_CHANGED, NotificationData::None));
            }
            if old.anchors != new.anchors {
                events.push((GLYPH_ANCHORS_CHANGED, NotificationData::None));
            }
            if old.image != new.image {
                events.push((GLYPH_IMAGE_CHANGED, NotificationData::None));
            }
            if old.lib != new.lib {
                events.push((GLYPH_LIB_CHANGED, NotificationData::None));
            }
            if old.note != new.note {
                events.push((GLYPH_NOTE_CHANGED, NotificationData::None));
            }
            events
        };
        for (name, payload) in events {
            self.post_notification(name, payload);
        }
        if mark_dirty {
            self.set_dirty(true);
        }
        Ok(())
    }

    fn changed(&self, notification: &str, data: NotificationData) {
        self.post_notification(notification, data);
        self.set_dirty(true);
    }

    fn check_new_identifiers<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a String>,
    ) -> DocResult<()> {
        let mut seen = self.identifiers();
        for identifier in candidates {
            if !seen.insert(identifier.clone()) {
                return Err(DocError::DuplicateIdentifier(identifier.clone()));
            }
        }
        Ok(())
    }
}
