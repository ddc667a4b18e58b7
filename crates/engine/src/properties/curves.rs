use std::f64::consts::TAU;

use serde::Serialize;

/// Easing applied to the local interpolation factor of one property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Curve {
    #[default]
    Linear,
    /// Holds the start value until the end of the segment.
    Step,
    Ease,
    Elastic,
    /// Jumps to the end value immediately.
    Immediate,
}

impl Curve {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "/" => Some(Self::Linear),
            "_" => Some(Self::Step),
            "∫" => Some(Self::Ease),
            "~" => Some(Self::Elastic),
            "Γ" => Some(Self::Immediate),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Linear => "/",
            Self::Step => "_",
            Self::Ease => "∫",
            Self::Elastic => "~",
            Self::Immediate => "Γ",
        }
    }

    pub fn apply(self, u: f64) -> f64 {
        match self {
            Self::Linear => u,
            Self::Step => {
                if u < 1.0 {
                    0.0
                } else {
                    1.0
                }
            }
            Self::Ease => ease(u),
            Self::Elastic => elastic(u),
            Self::Immediate => 1.0,
        }
    }
}

fn ease(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        -1.0 + (4.0 - 2.0 * t) * t
    }
}

// Quickly overshoots 1 and wobbles before settling.
fn elastic(t: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    if t >= 1.0 {
        return 1.0;
    }
    let period = 0.3;
    let shift = period / 4.0;
    2f64.powf(-10.0 * t) * ((t - shift) * TAU / period).sin() + 1.0
}
