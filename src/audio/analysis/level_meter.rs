use crate::audio::config;
use serde::Serialize;

/// Root mean square of a time-domain window.
pub fn rms(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = window.iter().map(|s| s * s).sum();
    (sum_sq / window.len() as f32).sqrt()
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SegmentColor {
    Green,
    Yellow,
    Red,
}

/// Number of lit VU segments for a level.
pub fn vu_segments(level: f32) -> usize {
    if !level.is_finite() || level <= 0.0 {
        return 0;
    }
    let lit = (level * config::VU_SEGMENTS as f32 * config::VU_SENSITIVITY).round();
    (lit as usize).min(config::VU_SEGMENTS)
}

pub fn segment_color(segment: usize) -> SegmentColor {
    let ratio = segment as f32 / config::VU_SEGMENTS as f32;
    if ratio >= config::VU_RED_RATIO {
        SegmentColor::Red
    } else if ratio >= config::VU_YELLOW_RATIO {
        SegmentColor::Yellow
    } else {
        SegmentColor::Green
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_constant_and_sine() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        let sine: Vec<f32> = (0..2048)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 64.0).sin())
            .collect();
        assert!((rms(&sine) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
    }

    #[test]
    fn test_vu_segments_clamped() {
        assert_eq!(vu_segments(0.0), 0);
        assert_eq!(vu_segments(0.05), 3);
        assert_eq!(vu_segments(1.0), 12);
    }

    #[test]
    fn test_segment_colors() {
        assert_eq!(segment_color(0), SegmentColor::Green);
        assert_eq!(segment_color(8), SegmentColor::Yellow);
        assert_eq!(segment_color(11), SegmentColor::Red);
    }
}
