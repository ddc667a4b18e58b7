use std::f64::consts::{PI, TAU};

/// Number between `a` and `b` at fraction `u`. Evaluated from the smaller end so that
/// `lerp(a, b, u)` and `lerp(b, a, 1 - u)` agree bit for bit.
pub fn lerp(a: f64, b: f64, u: f64) -> f64 {
    if a <= b {
        a + (b - a) * u
    } else {
        b + (a - b) * (1.0 - u)
    }
}

pub fn unlerp_unclamped(a: f64, b: f64, v: f64) -> f64 {
    (v - a) / (b - a)
}

/// Fraction of `v` inside `[a, b]`, clamped to `[0, 1]`. An empty range counts as reached.
pub fn unlerp(a: f64, b: f64, v: f64) -> f64 {
    if a == b {
        return 1.0;
    }
    unlerp_unclamped(a, b, v).clamp(0.0, 1.0)
}

/// Angle between `start` and `end` (radians) along the shortest way around the circle.
/// The result stays within one full turn of zero.
pub fn lerp_angle(start: f64, end: f64, amount: f64) -> f64 {
    let mut end = end;
    while end > start + PI {
        end -= TAU;
    }
    while end < start - PI {
        end += TAU;
    }
    (start + (end - start) * amount) % TAU
}

pub fn lerp_color(start: u32, end: u32, amount: f64) -> u32 {
    let channel = |color: u32, shift: u32| ((color >> shift) & 0xFF) as f64;
    let mix = |shift: u32| {
        let value = lerp(channel(start, shift), channel(end, shift), amount);
        (value.clamp(0.0, 255.0) as u32) << shift
    };
    mix(16) | mix(8) | mix(0)
}

/// Scale that fits a `src_width x src_height` world into `max_width x max_height`.
pub fn fit_aspect_ratio(src_width: f64, src_height: f64, max_width: f64, max_height: f64) -> f64 {
    if src_width <= 0.0 || src_height <= 0.0 {
        return 1.0;
    }
    (max_width / src_width).min(max_height / src_height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn angular_distance(a: f64, b: f64) -> f64 {
        let diff = (a - b).rem_euclid(TAU);
        diff.min(TAU - diff)
    }

    #[test]
    fn lerp_is_symmetric_in_direction() {
        assert_eq!(lerp(0.0, 10.0, 0.25), 2.5);
        assert_eq!(lerp(10.0, 0.0, 0.25), 7.5);
        assert_eq!(lerp(3.0, 3.0, 0.7), 3.0);
    }

    #[test]
    fn unlerp_clamps_and_handles_empty_range() {
        assert_eq!(unlerp(0.0, 1.0, 0.5), 0.5);
        assert_eq!(unlerp(0.5, 1.0, 0.2), 0.0);
        assert_eq!(unlerp(0.0, 0.5, 0.9), 1.0);
        assert_eq!(unlerp(0.4, 0.4, 0.4), 1.0);
    }

    #[test]
    fn angle_takes_shortest_path_across_zero() {
        let start = 350f64.to_radians();
        let end = 10f64.to_radians();
        let mid = lerp_angle(start, end, 0.5);
        assert!(angular_distance(mid, 0.0) < 1e-9, "mid={mid}");
        assert!(mid.abs() < TAU);
    }

    #[test]
    fn angle_interpolates_normally_inside_half_turn() {
        let mid = lerp_angle(0.0, 90f64.to_radians(), 0.5);
        assert!((mid - 45f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn color_midpoint_truncates_each_channel() {
        assert_eq!(lerp_color(0x000000, 0xFFFFFF, 0.5), 0x7F7F7F);
        assert_eq!(lerp_color(0xFF0000, 0x0000FF, 1.0), 0x0000FF);
        assert_eq!(lerp_color(0x102030, 0x102030, 0.3), 0x102030);
    }

    #[test]
    fn color_channels_are_clamped_on_overshoot() {
        assert_eq!(lerp_color(0x000000, 0xFFFFFF, 1.5), 0xFFFFFF);
        assert_eq!(lerp_color(0x000000, 0xFFFFFF, -0.5), 0x000000);
    }

    #[test]
    fn fit_aspect_ratio_uses_limiting_axis() {
        assert_eq!(fit_aspect_ratio(1920.0, 1080.0, 1920.0, 1080.0), 1.0);
        assert_eq!(fit_aspect_ratio(3840.0, 1080.0, 1920.0, 1080.0), 0.5);
        assert_eq!(fit_aspect_ratio(0.0, 1080.0, 1920.0, 1080.0), 1.0);
    }
}
