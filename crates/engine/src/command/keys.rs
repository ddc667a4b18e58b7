/// Wire shorthand to canonical property name.
pub const KEY_SHORTHANDS: &[(&str, &str)] = &[
    ("r", "rotation"),
    ("R", "radius"),
    ("X", "x2"),
    ("Y", "y2"),
    ("w", "width"),
    ("h", "height"),
    ("t", "tint"),
    ("f", "fillColor"),
    ("F", "fillAlpha"),
    ("c", "lineColor"),
    ("W", "lineWidth"),
    ("A", "lineAlpha"),
    ("a", "alpha"),
    ("i", "image"),
    ("S", "strokeThickness"),
    ("sc", "strokeColor"),
    ("ff", "fontFamily"),
    ("s", "fontSize"),
    ("fw", "fontWeight"),
    ("T", "text"),
    ("ch", "children"),
    ("sx", "scaleX"),
    ("sy", "scaleY"),
    ("ax", "anchorX"),
    ("ay", "anchorY"),
    ("v", "visible"),
    ("z", "zIndex"),
    ("b", "blendMode"),
    ("I", "images"),
    ("rs", "restarted"),
    ("p", "playing"),
    ("l", "loop"),
    ("d", "duration"),
    ("bw", "baseWidth"),
    ("bh", "baseHeight"),
    ("ps", "points"),
    ("ta", "textAlign"),
    ("mw", "maxWidth"),
    ("tx", "tileX"),
    ("ty", "tileY"),
    ("tsx", "tileScaleX"),
    ("tsy", "tileScaleY"),
];

/// Expands a shorthand key. Keys outside the table are already canonical.
pub fn canonical_key(key: &str) -> &str {
    KEY_SHORTHANDS
        .iter()
        .find(|(short, _)| *short == key)
        .map(|(_, name)| *name)
        .unwrap_or(key)
}
