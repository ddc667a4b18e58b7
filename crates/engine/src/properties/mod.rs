mod curves;
mod interpolation;

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::context::{FrameInfo, PlayerInfo};
use crate::errors::ViewerError;
use crate::scene::EntityId;

pub use curves::Curve;
pub use interpolation::{fit_aspect_ratio, lerp, lerp_angle, lerp_color, unlerp, unlerp_unclamped};

/// Color used when a player color token cannot be resolved.
pub const FALLBACK_COLOR: u32 = 0xFF_FF_FF;

pub type PropertyMap = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Number(f64),
    Color(u32),
    Bool(bool),
    Text(String),
    Points(Vec<f64>),
    Children(Vec<EntityId>),
    Marker { date: f64 },
}

impl PropertyValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<u32> {
        match self {
            Self::Color(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

pub(crate) fn number_in(state: &PropertyMap, key: &str) -> f64 {
    state
        .get(key)
        .and_then(PropertyValue::as_number)
        .unwrap_or_default()
}

pub(crate) fn flag_in(state: &PropertyMap, key: &str) -> bool {
    state
        .get(key)
        .and_then(PropertyValue::as_bool)
        .unwrap_or(false)
}

pub(crate) fn color_in(state: &PropertyMap, key: &str) -> u32 {
    state
        .get(key)
        .and_then(PropertyValue::as_color)
        .unwrap_or_default()
}

pub(crate) fn text_in<'a>(state: &'a PropertyMap, key: &str) -> Option<&'a str> {
    state.get(key).and_then(PropertyValue::as_text)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("'{token}' is not a finite number")]
    NotANumber { token: String },
    #[error("'{token}' is not a color")]
    NotAColor { token: String },
    #[error("'{token}' is not an entity id")]
    NotAnEntityId { token: String },
}

/// Data a conversion may read: the session's players and the turn being parsed.
#[derive(Debug, Clone, Copy)]
pub struct ConvertContext<'a> {
    pub players: &'a [PlayerInfo],
    pub frame: &'a FrameInfo,
    pub t: f64,
}

/// Conversion failure that still yields a usable value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertFailure {
    pub error: ViewerError,
    pub fallback: PropertyValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Numeric,
    Color,
    Angle,
    Step,
    Flag,
    Text,
    Points,
    Children,
    Accumulator,
    Marker,
}

type ParseFn = fn(&str) -> Result<PropertyValue, ValueError>;
type InterpolateFn = fn(&PropertyValue, &PropertyValue, f64) -> PropertyValue;
type ConvertFn = fn(PropertyValue, &ConvertContext<'_>) -> Result<PropertyValue, ConvertFailure>;

pub struct PropertyDescriptor {
    kind: PropertyKind,
    parse: ParseFn,
    interpolate: InterpolateFn,
    convert: Option<ConvertFn>,
}

impl PropertyDescriptor {
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn parse(&self, token: &str) -> Result<PropertyValue, ValueError> {
        (self.parse)(token)
    }

    pub fn interpolate(&self, start: &PropertyValue, end: &PropertyValue, u: f64) -> PropertyValue {
        (self.interpolate)(start, end, u)
    }

    pub fn convert(
        &self,
        value: PropertyValue,
        context: &ConvertContext<'_>,
    ) -> Result<PropertyValue, ConvertFailure> {
        match self.convert {
            Some(convert) => convert(value, context),
            None => Ok(value),
        }
    }
}

static NUMERIC: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Numeric,
    parse: parse_number,
    interpolate: interpolate_number,
    convert: None,
};

static COLOR: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Color,
    parse: parse_color,
    interpolate: interpolate_color,
    convert: Some(convert_color),
};

static ANGLE: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Angle,
    parse: parse_angle,
    interpolate: interpolate_angle,
    convert: None,
};

static CONSTANT: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Step,
    parse: parse_number,
    interpolate: step,
    convert: None,
};

static FLAG: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Flag,
    parse: parse_flag,
    interpolate: step,
    convert: None,
};

static STRING: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Text,
    parse: parse_text,
    interpolate: step,
    convert: None,
};

static TEXT: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Text,
    parse: parse_text,
    interpolate: step,
    convert: Some(convert_player_names),
};

static POINTS: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Points,
    parse: parse_points,
    interpolate: interpolate_points,
    convert: None,
};

static CHILDREN: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Children,
    parse: parse_children,
    interpolate: step,
    convert: None,
};

static ACCUMULATOR: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Accumulator,
    parse: parse_number,
    interpolate: interpolate_accumulator,
    convert: None,
};

static MARKER: PropertyDescriptor = PropertyDescriptor {
    kind: PropertyKind::Marker,
    parse: parse_marker,
    interpolate: step,
    convert: Some(convert_marker),
};

/// Descriptor for a canonical property name. Total: unknown names get the numeric default.
pub fn describe(name: &str) -> &'static PropertyDescriptor {
    match name {
        "visible" | "loop" | "playing" => &FLAG,
        "rotation" => &ANGLE,
        "fillColor" | "lineColor" | "strokeColor" | "tint" => &COLOR,
        "baseWidth" | "baseHeight" | "duration" | "blendMode" => &CONSTANT,
        "image" | "images" | "fontFamily" | "fontWeight" | "textAlign" | "scaleMode" => &STRING,
        "text" => &TEXT,
        "points" => &POINTS,
        "children" => &CHILDREN,
        "animationProgress" => &ACCUMULATOR,
        "restarted" => &MARKER,
        _ => &NUMERIC,
    }
}

fn parse_number(token: &str) -> Result<PropertyValue, ValueError> {
    finite(token).map(PropertyValue::Number)
}

fn finite(token: &str) -> Result<f64, ValueError> {
    match token.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ValueError::NotANumber {
            token: token.to_string(),
        }),
    }
}

// Negative values are player color tokens, resolved by `convert_color`.
fn parse_color(token: &str) -> Result<PropertyValue, ValueError> {
    let raw = token
        .trim()
        .parse::<i64>()
        .map_err(|_| ValueError::NotAColor {
            token: token.to_string(),
        })?;
    if raw < 0 {
        return Ok(PropertyValue::Number(raw as f64));
    }
    u32::try_from(raw)
        .map(|color| PropertyValue::Color(color & 0xFF_FF_FF))
        .map_err(|_| ValueError::NotAColor {
            token: token.to_string(),
        })
}

fn parse_angle(token: &str) -> Result<PropertyValue, ValueError> {
    finite(token).map(|degrees| PropertyValue::Number(degrees.to_radians()))
}

fn parse_flag(token: &str) -> Result<PropertyValue, ValueError> {
    Ok(PropertyValue::Bool(matches!(token, "1" | "true")))
}

fn parse_text(token: &str) -> Result<PropertyValue, ValueError> {
    Ok(PropertyValue::Text(token.to_string()))
}

fn parse_points(token: &str) -> Result<PropertyValue, ValueError> {
    token
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(finite)
        .collect::<Result<Vec<_>, _>>()
        .map(PropertyValue::Points)
}

fn parse_children(token: &str) -> Result<PropertyValue, ValueError> {
    token
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .map(EntityId)
                .map_err(|_| ValueError::NotAnEntityId {
                    token: part.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(PropertyValue::Children)
}

fn parse_marker(token: &str) -> Result<PropertyValue, ValueError> {
    Ok(PropertyValue::Bool(!token.is_empty() && token != "0"))
}

fn convert_color(
    value: PropertyValue,
    context: &ConvertContext<'_>,
) -> Result<PropertyValue, ConvertFailure> {
    let PropertyValue::Number(raw) = value else {
        return Ok(value);
    };
    let index = -(raw as i64 + 1);
    usize::try_from(index)
        .ok()
        .and_then(|index| context.players.get(index))
        .map(|player| PropertyValue::Color(player.color))
        .ok_or(ConvertFailure {
            error: ViewerError::InvalidPlayerColorToken { index },
            fallback: PropertyValue::Color(FALLBACK_COLOR),
        })
}

// `$<digit>` becomes that player's name; unknown indices are left as written.
fn convert_player_names(
    value: PropertyValue,
    context: &ConvertContext<'_>,
) -> Result<PropertyValue, ConvertFailure> {
    let PropertyValue::Text(text) = value else {
        return Ok(value);
    };
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '$' {
            if let Some(digit) = chars.peek().and_then(|next| next.to_digit(10)) {
                if let Some(player) = context.players.get(digit as usize) {
                    result.push_str(&player.name);
                    chars.next();
                    continue;
                }
            }
        }
        result.push(ch);
    }
    Ok(PropertyValue::Text(result))
}

fn convert_marker(
    value: PropertyValue,
    context: &ConvertContext<'_>,
) -> Result<PropertyValue, ConvertFailure> {
    match value {
        PropertyValue::Bool(true) => Ok(PropertyValue::Marker {
            date: context.frame.date_at(context.t),
        }),
        PropertyValue::Bool(false) => Ok(PropertyValue::Null),
        other => Ok(other),
    }
}

fn step(start: &PropertyValue, end: &PropertyValue, u: f64) -> PropertyValue {
    if u >= 1.0 {
        end.clone()
    } else {
        start.clone()
    }
}

fn interpolate_number(start: &PropertyValue, end: &PropertyValue, u: f64) -> PropertyValue {
    match (start, end) {
        (PropertyValue::Number(a), PropertyValue::Number(b)) => PropertyValue::Number(lerp(*a, *b, u)),
        _ => step(start, end, u),
    }
}

fn interpolate_angle(start: &PropertyValue, end: &PropertyValue, u: f64) -> PropertyValue {
    match (start, end) {
        (PropertyValue::Number(a), PropertyValue::Number(b)) => {
            PropertyValue::Number(lerp_angle(*a, *b, u))
        }
        _ => step(start, end, u),
    }
}

fn interpolate_color(start: &PropertyValue, end: &PropertyValue, u: f64) -> PropertyValue {
    match (start, end) {
        (PropertyValue::Color(a), PropertyValue::Color(b)) => PropertyValue::Color(lerp_color(*a, *b, u)),
        _ => step(start, end, u),
    }
}

fn interpolate_points(start: &PropertyValue, end: &PropertyValue, u: f64) -> PropertyValue {
    match (start, end) {
        (PropertyValue::Points(a), PropertyValue::Points(b)) if a.len() == b.len() => {
            PropertyValue::Points(a.iter().zip(b).map(|(a, b)| lerp(*a, *b, u)).collect())
        }
        _ => step(start, end, u),
    }
}

// A smaller end value means the animation restarted inside the segment.
fn interpolate_accumulator(start: &PropertyValue, end: &PropertyValue, u: f64) -> PropertyValue {
    match (start, end) {
        (PropertyValue::Number(a), PropertyValue::Number(b)) if b < a => PropertyValue::Number(*b),
        _ => interpolate_number(start, end, u),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players() -> Vec<PlayerInfo> {
        vec![
            PlayerInfo {
                name: "Alice".to_string(),
                color: 0xFF0000,
            },
            PlayerInfo {
                name: "Bob".to_string(),
                color: 0x00FF00,
            },
        ]
    }

    fn frame() -> FrameInfo {
        FrameInfo {
            number: 3,
            date_ms: 2000.0,
            frame_duration_ms: 1000.0,
        }
    }

    fn parse_and_convert(name: &str, token: &str, players: &[PlayerInfo]) -> Result<PropertyValue, ConvertFailure> {
        let frame = frame();
        let context = ConvertContext {
            players,
            frame: &frame,
            t: 0.5,
        };
        let descriptor = describe(name);
        let value = descriptor.parse(token).expect("parse");
        descriptor.convert(value, &context)
    }

    #[test]
    fn unknown_properties_fall_back_to_numeric_default() {
        let descriptor = describe("somethingNew");
        assert_eq!(descriptor.kind(), PropertyKind::Numeric);
        assert_eq!(
            descriptor.interpolate(&PropertyValue::Number(0.0), &PropertyValue::Number(10.0), 0.3),
            PropertyValue::Number(3.0)
        );
    }

    #[test]
    fn numeric_parse_rejects_garbage_and_non_finite() {
        assert!(describe("x").parse("abc").is_err());
        assert!(describe("x").parse("NaN").is_err());
        assert!(describe("x").parse("inf").is_err());
        assert_eq!(describe("x").parse("-2.5"), Ok(PropertyValue::Number(-2.5)));
    }

    #[test]
    fn flags_snap_only_at_the_end() {
        let descriptor = describe("visible");
        let off = PropertyValue::Bool(false);
        let on = PropertyValue::Bool(true);
        for u in [0.0, 0.25, 0.5, 0.99] {
            assert_eq!(descriptor.interpolate(&off, &on, u), off, "u={u}");
        }
        assert_eq!(descriptor.interpolate(&off, &on, 1.0), on);
        assert_eq!(descriptor.parse("1"), Ok(on));
        assert_eq!(descriptor.parse("0"), Ok(off));
    }

    #[test]
    fn rotation_is_parsed_from_degrees() {
        let value = describe("rotation").parse("180").expect("angle");
        assert_eq!(value, PropertyValue::Number(std::f64::consts::PI));
    }

    #[test]
    fn color_tokens_resolve_player_colors() {
        let players = players();
        assert_eq!(
            parse_and_convert("fillColor", "-2", &players),
            Ok(PropertyValue::Color(0x00FF00))
        );
        assert_eq!(
            parse_and_convert("tint", "255", &players),
            Ok(PropertyValue::Color(0x0000FF))
        );
    }

    #[test]
    fn out_of_range_player_color_reports_and_falls_back() {
        let failure = parse_and_convert("lineColor", "-5", &players()).expect_err("invalid token");
        assert_eq!(failure.error, ViewerError::InvalidPlayerColorToken { index: 4 });
        assert_eq!(failure.fallback, PropertyValue::Color(FALLBACK_COLOR));
    }

    #[test]
    fn text_substitutes_player_names() {
        assert_eq!(
            parse_and_convert("text", "$0 beats $1 ($7)", &players()),
            Ok(PropertyValue::Text("Alice beats Bob ($7)".to_string()))
        );
    }

    #[test]
    fn points_blend_elementwise_only_when_lengths_match() {
        let descriptor = describe("points");
        let a = descriptor.parse("0,0,10,10").expect("points");
        let b = descriptor.parse("10,10,20,20").expect("points");
        assert_eq!(
            descriptor.interpolate(&a, &b, 0.5),
            PropertyValue::Points(vec![5.0, 5.0, 15.0, 15.0])
        );
        let short = descriptor.parse("1,2").expect("points");
        assert_eq!(descriptor.interpolate(&a, &short, 0.5), a);
        assert_eq!(descriptor.interpolate(&a, &short, 1.0), short);
    }

    #[test]
    fn children_parse_ids_and_never_blend() {
        let descriptor = describe("children");
        let a = descriptor.parse("1,2").expect("children");
        let b = descriptor.parse("3").expect("children");
        assert_eq!(a, PropertyValue::Children(vec![EntityId(1), EntityId(2)]));
        assert_eq!(descriptor.interpolate(&a, &b, 0.5), a);
        assert_eq!(descriptor.parse(""), Ok(PropertyValue::Children(Vec::new())));
        assert!(descriptor.parse("1,x").is_err());
    }

    #[test]
    fn accumulator_restarts_to_the_smaller_value() {
        let descriptor = describe("animationProgress");
        let restarted = descriptor.interpolate(&PropertyValue::Number(3.0), &PropertyValue::Number(0.5), 0.2);
        assert_eq!(restarted, PropertyValue::Number(0.5));
        let running = descriptor.interpolate(&PropertyValue::Number(1.0), &PropertyValue::Number(2.0), 0.5);
        assert_eq!(running, PropertyValue::Number(1.5));
    }

    #[test]
    fn restart_marker_is_stamped_with_sub_state_date() {
        assert_eq!(
            parse_and_convert("restarted", "1", &[]),
            Ok(PropertyValue::Marker { date: 2500.0 })
        );
        assert_eq!(parse_and_convert("restarted", "", &[]), Ok(PropertyValue::Null));
    }
}
