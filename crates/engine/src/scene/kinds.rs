use serde::Serialize;

use crate::assets::{AssetCatalog, Texture};
use crate::context::FrameInfo;
use crate::display::{ShapeStyle, Tiling, Visual};
use crate::errors::{ErrorLog, ViewerError};
use crate::properties::{color_in, flag_in, number_in, text_in, PropertyMap, PropertyValue};

use super::extrapolation::advance_animation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Circle,
    Rectangle,
    RoundedRectangle,
    Line,
    Polygon,
    Sprite,
    TilingSprite,
    AnimatedSprite,
    Text,
    BitmapText,
    Group,
    BufferedGroup,
}

impl EntityKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "C" => Self::Circle,
            "R" => Self::Rectangle,
            "K" => Self::RoundedRectangle,
            "L" => Self::Line,
            "P" => Self::Polygon,
            "S" => Self::Sprite,
            "D" => Self::TilingSprite,
            "A" => Self::AnimatedSprite,
            "T" => Self::Text,
            "X" => Self::BitmapText,
            "G" => Self::Group,
            "B" => Self::BufferedGroup,
            _ => return None,
        };
        Some(kind)
    }

    pub fn capabilities(self) -> &'static KindCapabilities {
        match self {
            Self::Circle => &CIRCLE,
            Self::Rectangle => &RECTANGLE,
            Self::RoundedRectangle => &ROUNDED_RECTANGLE,
            Self::Line => &LINE,
            Self::Polygon => &POLYGON,
            Self::Sprite => &SPRITE,
            Self::TilingSprite => &TILING_SPRITE,
            Self::AnimatedSprite => &ANIMATED_SPRITE,
            Self::Text => &TEXT,
            Self::BitmapText => &BITMAP_TEXT,
            Self::Group => &GROUP,
            Self::BufferedGroup => &BUFFERED_GROUP,
        }
    }

    pub fn default_state(self) -> PropertyMap {
        let mut state = PropertyMap::new();
        base_defaults(&mut state);
        (self.capabilities().defaults)(&mut state);
        state
    }

    pub fn is_container(self) -> bool {
        matches!(self, Self::Group | Self::BufferedGroup)
    }
}

/// Everything a visual builder may read besides the entity's own state.
pub struct VisualContext<'a> {
    pub catalog: &'a mut AssetCatalog,
    pub errors: &'a mut ErrorLog,
    pub to_world_units: f64,
    pub to_pixel: f64,
    pub frame: Option<&'a FrameInfo>,
    pub progress: f64,
}

type DefaultsFn = fn(&mut PropertyMap);
type VisualFn = fn(&PropertyMap, &mut VisualContext<'_>) -> Visual;

/// Per-kind behavior, looked up through [`EntityKind::capabilities`].
pub struct KindCapabilities {
    pub defaults: DefaultsFn,
    /// Properties whose change requires a new [`Visual`].
    pub redraw_on: &'static [&'static str],
    pub visual: VisualFn,
    /// Whether the backend must re-render this node's buffer after a descendant changed.
    pub post_update: bool,
    /// Whether sub-states carry a date and an animation progress.
    pub animated: bool,
}

impl KindCapabilities {
    pub fn needs_redraw(&self, changed: &[String]) -> bool {
        changed
            .iter()
            .any(|property| self.redraw_on.contains(&property.as_str()))
    }
}

static CIRCLE: KindCapabilities = KindCapabilities {
    defaults: circle_defaults,
    redraw_on: &[
        "radius",
        "fillColor",
        "fillAlpha",
        "lineColor",
        "lineAlpha",
        "lineWidth",
        "blendMode",
    ],
    visual: circle_visual,
    post_update: false,
    animated: false,
};

static RECTANGLE: KindCapabilities = KindCapabilities {
    defaults: rectangle_defaults,
    redraw_on: &[
        "width",
        "height",
        "fillColor",
        "fillAlpha",
        "lineColor",
        "lineAlpha",
        "lineWidth",
        "blendMode",
    ],
    visual: rectangle_visual,
    post_update: false,
    animated: false,
};

static ROUNDED_RECTANGLE: KindCapabilities = KindCapabilities {
    defaults: rounded_rectangle_defaults,
    redraw_on: &[
        "width",
        "height",
        "radius",
        "fillColor",
        "fillAlpha",
        "lineColor",
        "lineAlpha",
        "lineWidth",
        "blendMode",
    ],
    visual: rectangle_visual,
    post_update: false,
    animated: false,
};

// The segment is drawn relative to the node position, so moving the node redraws it.
static LINE: KindCapabilities = KindCapabilities {
    defaults: line_defaults,
    redraw_on: &[
        "x",
        "y",
        "x2",
        "y2",
        "fillColor",
        "fillAlpha",
        "lineColor",
        "lineAlpha",
        "lineWidth",
        "blendMode",
    ],
    visual: line_visual,
    post_update: false,
    animated: false,
};

static POLYGON: KindCapabilities = KindCapabilities {
    defaults: polygon_defaults,
    redraw_on: &[
        "points",
        "fillColor",
        "fillAlpha",
        "lineColor",
        "lineAlpha",
        "lineWidth",
        "blendMode",
    ],
    visual: polygon_visual,
    post_update: false,
    animated: false,
};

static SPRITE: KindCapabilities = KindCapabilities {
    defaults: sprite_defaults,
    redraw_on: &[
        "image",
        "baseWidth",
        "baseHeight",
        "scaleMode",
        "anchorX",
        "anchorY",
        "tint",
        "blendMode",
    ],
    visual: sprite_visual,
    post_update: false,
    animated: false,
};

static TILING_SPRITE: KindCapabilities = KindCapabilities {
    defaults: tiling_sprite_defaults,
    redraw_on: &[
        "image",
        "baseWidth",
        "baseHeight",
        "scaleMode",
        "anchorX",
        "anchorY",
        "tint",
        "blendMode",
        "tileX",
        "tileY",
        "tileScaleX",
        "tileScaleY",
    ],
    visual: sprite_visual,
    post_update: false,
    animated: false,
};

static ANIMATED_SPRITE: KindCapabilities = KindCapabilities {
    defaults: animated_sprite_defaults,
    redraw_on: &[
        "images",
        "loop",
        "duration",
        "playing",
        "restarted",
        "animationProgress",
        "date",
        "anchorX",
        "anchorY",
        "tint",
        "blendMode",
    ],
    visual: animated_sprite_visual,
    post_update: false,
    animated: true,
};

static TEXT: KindCapabilities = KindCapabilities {
    defaults: text_defaults,
    redraw_on: &[
        "text",
        "fontFamily",
        "fontSize",
        "fontWeight",
        "fillColor",
        "strokeColor",
        "strokeThickness",
        "anchorX",
        "anchorY",
        "tint",
        "blendMode",
    ],
    visual: text_visual,
    post_update: false,
    animated: false,
};

static BITMAP_TEXT: KindCapabilities = KindCapabilities {
    defaults: bitmap_text_defaults,
    redraw_on: &[
        "text",
        "textAlign",
        "fontSize",
        "fontFamily",
        "maxWidth",
        "anchorX",
        "anchorY",
        "tint",
        "blendMode",
    ],
    visual: bitmap_text_visual,
    post_update: false,
    animated: false,
};

static GROUP: KindCapabilities = KindCapabilities {
    defaults: container_defaults,
    redraw_on: &[],
    visual: group_visual,
    post_update: false,
    animated: false,
};

static BUFFERED_GROUP: KindCapabilities = KindCapabilities {
    defaults: container_defaults,
    redraw_on: &[],
    visual: buffered_group_visual,
    post_update: true,
    animated: false,
};

fn set(state: &mut PropertyMap, key: &str, value: PropertyValue) {
    state.insert(key.to_string(), value);
}

fn set_number(state: &mut PropertyMap, key: &str, value: f64) {
    set(state, key, PropertyValue::Number(value));
}

fn set_text(state: &mut PropertyMap, key: &str, value: &str) {
    set(state, key, PropertyValue::Text(value.to_string()));
}

fn base_defaults(state: &mut PropertyMap) {
    set_number(state, "x", 0.0);
    set_number(state, "y", 0.0);
    set_number(state, "scaleX", 1.0);
    set_number(state, "scaleY", 1.0);
    set_number(state, "zIndex", 0.0);
    set_number(state, "alpha", 1.0);
    set(state, "visible", PropertyValue::Bool(true));
    set_number(state, "rotation", 0.0);
}

fn shape_defaults(state: &mut PropertyMap) {
    set(state, "fillColor", PropertyValue::Color(0xFF_FF_FF));
    set_number(state, "lineWidth", 0.0);
    set(state, "lineColor", PropertyValue::Color(0));
    set_number(state, "fillAlpha", 1.0);
    set_number(state, "lineAlpha", 1.0);
    set_number(state, "blendMode", 0.0);
}

fn circle_defaults(state: &mut PropertyMap) {
    shape_defaults(state);
    set_number(state, "radius", 100.0);
}

fn rectangle_defaults(state: &mut PropertyMap) {
    shape_defaults(state);
    set_number(state, "width", 100.0);
    set_number(state, "height", 100.0);
}

fn rounded_rectangle_defaults(state: &mut PropertyMap) {
    rectangle_defaults(state);
    set_number(state, "radius", 20.0);
}

fn line_defaults(state: &mut PropertyMap) {
    shape_defaults(state);
    set_number(state, "x2", 100.0);
    set_number(state, "y2", 100.0);
}

fn polygon_defaults(state: &mut PropertyMap) {
    shape_defaults(state);
    set(state, "points", PropertyValue::Points(Vec::new()));
}

fn texture_defaults(state: &mut PropertyMap) {
    set_number(state, "anchorX", 0.0);
    set_number(state, "anchorY", 0.0);
    set_number(state, "blendMode", 0.0);
    set(state, "tint", PropertyValue::Color(0xFF_FF_FF));
}

fn sprite_defaults(state: &mut PropertyMap) {
    texture_defaults(state);
    set(state, "image", PropertyValue::Null);
    set(state, "baseWidth", PropertyValue::Null);
    set(state, "baseHeight", PropertyValue::Null);
    set_text(state, "scaleMode", "LINEAR");
}

fn tiling_sprite_defaults(state: &mut PropertyMap) {
    sprite_defaults(state);
    set_number(state, "tileX", 0.0);
    set_number(state, "tileY", 0.0);
    set_number(state, "tileScaleX", 1.0);
    set_number(state, "tileScaleY", 1.0);
}

fn animated_sprite_defaults(state: &mut PropertyMap) {
    texture_defaults(state);
    set_text(state, "images", "");
    set(state, "loop", PropertyValue::Bool(false));
    set_number(state, "duration", 1000.0);
    set(state, "playing", PropertyValue::Bool(true));
    set(state, "restarted", PropertyValue::Null);
    set_number(state, "animationProgress", 0.0);
    set_number(state, "date", 0.0);
}

fn text_defaults(state: &mut PropertyMap) {
    texture_defaults(state);
    set_text(state, "text", "");
    set(state, "strokeColor", PropertyValue::Color(0));
    set_number(state, "strokeThickness", 0.0);
    set(state, "fillColor", PropertyValue::Color(0));
    set_number(state, "fontSize", 26.0);
    set_text(state, "fontFamily", "Lato");
    set_text(state, "fontWeight", "normal");
}

fn bitmap_text_defaults(state: &mut PropertyMap) {
    set_text(state, "text", "");
    set_text(state, "textAlign", "left");
    set_number(state, "fontSize", 26.0);
    set(state, "fontFamily", PropertyValue::Null);
    set_number(state, "anchorX", 0.0);
    set_number(state, "anchorY", 0.0);
    set_number(state, "blendMode", 0.0);
    set(state, "tint", PropertyValue::Color(0xFF_FF_FF));
    set_number(state, "maxWidth", 0.0);
}

fn container_defaults(state: &mut PropertyMap) {
    set(state, "children", PropertyValue::Children(Vec::new()));
}

fn shape_style(state: &PropertyMap) -> ShapeStyle {
    ShapeStyle {
        fill_color: color_in(state, "fillColor"),
        fill_alpha: number_in(state, "fillAlpha"),
        line_color: color_in(state, "lineColor"),
        line_alpha: number_in(state, "lineAlpha"),
        line_width: number_in(state, "lineWidth"),
        blend_mode: number_in(state, "blendMode"),
    }
}

fn circle_visual(state: &PropertyMap, context: &mut VisualContext<'_>) -> Visual {
    Visual::Circle {
        radius: number_in(state, "radius") * context.to_world_units,
        style: shape_style(state),
    }
}

fn rectangle_visual(state: &PropertyMap, context: &mut VisualContext<'_>) -> Visual {
    Visual::Rectangle {
        width: number_in(state, "width") * context.to_world_units,
        height: number_in(state, "height") * context.to_world_units,
        corner_radius: state
            .get("radius")
            .and_then(PropertyValue::as_number)
            .map(|radius| radius * context.to_world_units),
        style: shape_style(state),
    }
}

fn line_visual(state: &PropertyMap, context: &mut VisualContext<'_>) -> Visual {
    let scale = context.to_world_units;
    Visual::Line {
        end_x: (number_in(state, "x2") - number_in(state, "x")) * scale,
        end_y: (number_in(state, "y2") - number_in(state, "y")) * scale,
        style: shape_style(state),
    }
}

fn polygon_visual(state: &PropertyMap, context: &mut VisualContext<'_>) -> Visual {
    let points = match state.get("points") {
        Some(PropertyValue::Points(points)) => points
            .iter()
            .map(|coordinate| coordinate * context.to_world_units)
            .collect(),
        _ => Vec::new(),
    };
    Visual::Polygon {
        points,
        style: shape_style(state),
    }
}

fn sprite_visual(state: &PropertyMap, context: &mut VisualContext<'_>) -> Visual {
    let texture = match text_in(state, "image") {
        Some(name) => context.catalog.resolve_texture(name, context.errors),
        None => Texture::Empty,
    };
    let tiling = state.contains_key("tileX").then(|| Tiling {
        x: number_in(state, "tileX"),
        y: number_in(state, "tileY"),
        scale_x: number_in(state, "tileScaleX"),
        scale_y: number_in(state, "tileScaleY"),
    });
    textured(state, texture, tiling)
}

fn textured(state: &PropertyMap, texture: Texture, tiling: Option<Tiling>) -> Visual {
    Visual::Sprite {
        texture,
        anchor_x: number_in(state, "anchorX"),
        anchor_y: number_in(state, "anchorY"),
        tint: color_in(state, "tint"),
        blend_mode: number_in(state, "blendMode"),
        width: state.get("baseWidth").and_then(PropertyValue::as_number),
        height: state.get("baseHeight").and_then(PropertyValue::as_number),
        scale_mode: text_in(state, "scaleMode").unwrap_or("LINEAR").to_string(),
        tiling,
    }
}

/// Frame of an animated sprite at the current render time.
fn animated_sprite_visual(state: &PropertyMap, context: &mut VisualContext<'_>) -> Visual {
    let images: Vec<&str> = text_in(state, "images")
        .unwrap_or_default()
        .split(',')
        .filter(|image| !image.is_empty())
        .collect();
    let Some(&last) = images.last() else {
        return textured(state, Texture::Empty, None);
    };

    let mut now = state.clone();
    if let Some(frame) = context.frame {
        now.insert(
            "date".to_string(),
            PropertyValue::Number(frame.date_at(context.progress)),
        );
        advance_animation(state, &mut now);
    }
    let progress = number_in(&now, "animationProgress");
    if progress < 0.0 {
        return textured(state, Texture::Empty, None);
    }

    let index = (images.len() as f64 * progress).floor() as usize;
    let image = if flag_in(state, "loop") {
        images[index % images.len()]
    } else {
        images.get(index).copied().unwrap_or(last)
    };
    let texture = context.catalog.resolve_texture(image, context.errors);
    textured(state, texture, None)
}

fn text_visual(state: &PropertyMap, context: &mut VisualContext<'_>) -> Visual {
    let stroke_thickness = number_in(state, "strokeThickness");
    Visual::Text {
        text: text_in(state, "text").unwrap_or_default().to_string(),
        font_family: text_in(state, "fontFamily").unwrap_or_default().to_string(),
        font_size: non_zero_font_size(state),
        font_weight: text_in(state, "fontWeight").unwrap_or("normal").to_string(),
        fill_color: color_in(state, "fillColor"),
        stroke_color: color_in(state, "strokeColor"),
        stroke_thickness: if stroke_thickness > 0.0 {
            stroke_thickness.max(context.to_pixel)
        } else {
            0.0
        },
        anchor_x: number_in(state, "anchorX"),
        anchor_y: number_in(state, "anchorY"),
        tint: color_in(state, "tint"),
        blend_mode: number_in(state, "blendMode"),
    }
}

fn bitmap_text_visual(state: &PropertyMap, context: &mut VisualContext<'_>) -> Visual {
    let font = text_in(state, "fontFamily").map(str::to_string);
    let text = match &font {
        Some(font) if context.catalog.has_font(font) => {
            Some(text_in(state, "text").unwrap_or_default().to_string())
        }
        Some(font) => {
            context
                .errors
                .push(ViewerError::MissingBitmapFont { font: font.clone() });
            None
        }
        None => None,
    };
    Visual::BitmapText {
        text,
        font_family: font,
        font_size: non_zero_font_size(state),
        align: text_in(state, "textAlign").unwrap_or("left").to_string(),
        max_width: number_in(state, "maxWidth"),
        anchor_x: number_in(state, "anchorX"),
        anchor_y: number_in(state, "anchorY"),
        tint: color_in(state, "tint"),
        blend_mode: number_in(state, "blendMode"),
    }
}

fn non_zero_font_size(state: &PropertyMap) -> f64 {
    let size = number_in(state, "fontSize");
    if size == 0.0 {
        1.0
    } else {
        size
    }
}

fn group_visual(_state: &PropertyMap, _context: &mut VisualContext<'_>) -> Visual {
    Visual::Container { buffered: false }
}

fn buffered_group_visual(_state: &PropertyMap, _context: &mut VisualContext<'_>) -> Visual {
    Visual::Container { buffered: true }
}
