use serde::{Deserialize, Serialize};

use crate::errors::ErrorLog;

/// Reference world size the scene is authored against.
pub const WORLD_WIDTH: f64 = 1920.0;
pub const WORLD_HEIGHT: f64 = 1080.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    pub color: u32,
}

/// World dimensions declared by the replay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub width: f64,
    pub height: f64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            width: WORLD_WIDTH,
            height: WORLD_HEIGHT,
        }
    }
}

/// Pixel size of the surface the backend draws on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasInfo {
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_oversampling")]
    pub oversampling: f64,
}

fn default_oversampling() -> f64 {
    1.0
}

impl CanvasInfo {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            oversampling: default_oversampling(),
        }
    }

    /// World units covered by one canvas pixel.
    pub fn to_pixel(&self) -> f64 {
        if self.width <= 0.0 {
            return 1.0;
        }
        WORLD_WIDTH / self.width * self.oversampling
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameInfo {
    pub number: u32,
    /// Wall-clock start of the turn, in milliseconds since the start of the replay.
    pub date_ms: f64,
    pub frame_duration_ms: f64,
}

impl FrameInfo {
    pub fn date_at(&self, t: f64) -> f64 {
        self.date_ms + t * self.frame_duration_ms
    }
}

/// Session-wide state shared by the parser, the entities and the feature modules.
#[derive(Debug)]
pub struct SharedContext {
    pub instance_counter: u64,
    pub players: Vec<PlayerInfo>,
    pub to_world_units: f64,
    pub to_pixel: f64,
    pub must_reset_tree: bool,
    pub must_resort: bool,
    pub errors: ErrorLog,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self {
            instance_counter: 0,
            players: Vec::new(),
            to_world_units: 1.0,
            to_pixel: 1.0,
            must_reset_tree: false,
            must_resort: false,
            errors: ErrorLog::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_state_dates_are_spread_over_the_turn() {
        let frame = FrameInfo {
            number: 2,
            date_ms: 1000.0,
            frame_duration_ms: 400.0,
        };
        assert_eq!(frame.date_at(0.0), 1000.0);
        assert_eq!(frame.date_at(0.25), 1100.0);
        assert_eq!(frame.date_at(1.0), 1400.0);
    }

    #[test]
    fn half_size_canvas_doubles_the_pixel_ratio() {
        assert_eq!(CanvasInfo::new(960.0, 540.0).to_pixel(), 2.0);
        assert_eq!(CanvasInfo::new(0.0, 0.0).to_pixel(), 1.0);
    }
}
