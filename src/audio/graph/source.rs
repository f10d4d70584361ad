use std::sync::Arc;

/// Decoded track audio at the graph's sample rate.
#[derive(Clone, Default)]
pub(crate) struct TrackSource {
    samples: Arc<Vec<f32>>,
}

impl TrackSource {
    pub(crate) fn new(samples: Arc<Vec<f32>>) -> Self {
        TrackSource { samples }
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Cubic (Catmull-Rom) interpolated read at a fractional position, falling
    /// back to linear near the edges and silence outside the buffer.
    #[inline]
    pub(crate) fn sample_at(&self, position: f64) -> f32 {
        let total = self.samples.len();
        if position < 0.0 || total == 0 {
            return 0.0;
        }
        let idx_floor = position.floor() as usize;
        if idx_floor >= total {
            return 0.0;
        }
        let fraction = position.fract() as f32;
        let s = &self.samples;

        if idx_floor >= 1 && idx_floor + 2 < total {
            let y0 = s[idx_floor - 1];
            let y1 = s[idx_floor];
            let y2 = s[idx_floor + 1];
            let y3 = s[idx_floor + 2];

            let a = -0.5 * y0 + 1.5 * y1 - 1.5 * y2 + 0.5 * y3;
            let b = y0 - 2.5 * y1 + 2.0 * y2 - 0.5 * y3;
            let c = -0.5 * y0 + 0.5 * y2;
            let d = y1;

            a * fraction * fraction * fraction + b * fraction * fraction + c * fraction + d
        } else {
            let sample1 = s[idx_floor];
            let sample2 = s[(idx_floor + 1).min(total - 1)];
            sample1 + (sample2 - sample1) * fraction
        }
    }
}
