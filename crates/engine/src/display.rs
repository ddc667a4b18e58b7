//! The contract between the scene and whatever draws it.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::assets::Texture;
use crate::scene::{DisplayTree, EntityId, EntityKind};

/// Scales are never sent as exactly zero.
pub const MIN_SCALE: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayTransform {
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation: f64,
    pub alpha: f64,
    pub z_index: f64,
    /// `visible` property combined with the external hide flag.
    pub visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShapeStyle {
    pub fill_color: u32,
    pub fill_alpha: f64,
    pub line_color: u32,
    pub line_alpha: f64,
    pub line_width: f64,
    pub blend_mode: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tiling {
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

/// Kind-specific drawing description, in world units.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Visual {
    Circle {
        radius: f64,
        style: ShapeStyle,
    },
    Rectangle {
        width: f64,
        height: f64,
        corner_radius: Option<f64>,
        style: ShapeStyle,
    },
    /// Segment from the node origin to `(end_x, end_y)`, relative to the origin.
    Line {
        end_x: f64,
        end_y: f64,
        style: ShapeStyle,
    },
    Polygon {
        points: Vec<f64>,
        style: ShapeStyle,
    },
    Sprite {
        texture: Texture,
        anchor_x: f64,
        anchor_y: f64,
        tint: u32,
        blend_mode: f64,
        width: Option<f64>,
        height: Option<f64>,
        scale_mode: String,
        tiling: Option<Tiling>,
    },
    Text {
        text: String,
        font_family: String,
        font_size: f64,
        font_weight: String,
        fill_color: u32,
        stroke_color: u32,
        stroke_thickness: f64,
        anchor_x: f64,
        anchor_y: f64,
        tint: u32,
        blend_mode: f64,
    },
    /// `text` is `None` when no usable font is set; nothing is drawn then.
    BitmapText {
        text: Option<String>,
        font_family: Option<String>,
        font_size: f64,
        align: String,
        max_width: f64,
        anchor_x: f64,
        anchor_y: f64,
        tint: u32,
        blend_mode: f64,
    },
    Container {
        buffered: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayUpdate {
    /// Canonical names of the properties that changed since the last update.
    pub changed: Vec<String>,
    pub transform: DisplayTransform,
    /// Present only when a property the visual depends on changed.
    pub visual: Option<Visual>,
}

/// Receives display updates. Implemented by renderers; the scene never draws itself.
pub trait DisplayBackend {
    fn init_display(&mut self, id: EntityId, kind: EntityKind, initial: &DisplayUpdate);

    fn update_display(&mut self, id: EntityId, update: &DisplayUpdate);

    fn tree_changed(&mut self, tree: &DisplayTree);

    /// Called for buffered groups after a tick in which a descendant changed.
    fn post_update(&mut self, _id: EntityId) {}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayNode {
    pub kind: EntityKind,
    pub transform: DisplayTransform,
    pub visual: Option<Visual>,
    pub update_count: u64,
    pub buffer_renders: u64,
}

/// In-memory backend that keeps the latest state of every node.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RecordingBackend {
    pub nodes: BTreeMap<EntityId, DisplayNode>,
    pub tree: Option<DisplayTree>,
    #[serde(skip)]
    pub updates: Vec<(EntityId, DisplayUpdate)>,
}

impl RecordingBackend {
    pub fn node(&self, id: EntityId) -> Option<&DisplayNode> {
        self.nodes.get(&id)
    }

    /// Drops the per-update history, keeping node state.
    pub fn clear_updates(&mut self) {
        self.updates.clear();
    }
}

impl DisplayBackend for RecordingBackend {
    fn init_display(&mut self, id: EntityId, kind: EntityKind, initial: &DisplayUpdate) {
        self.nodes.insert(
            id,
            DisplayNode {
                kind,
                transform: initial.transform,
                visual: initial.visual.clone(),
                update_count: 0,
                buffer_renders: 0,
            },
        );
    }

    fn update_display(&mut self, id: EntityId, update: &DisplayUpdate) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.transform = update.transform;
            if let Some(visual) = &update.visual {
                node.visual = Some(visual.clone());
            }
            node.update_count += 1;
        }
        self.updates.push((id, update.clone()));
    }

    fn tree_changed(&mut self, tree: &DisplayTree) {
        self.tree = Some(tree.clone());
    }

    fn post_update(&mut self, id: EntityId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.buffer_renders += 1;
        }
    }
}
