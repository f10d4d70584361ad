/// Predicted beat timestamps for a loaded track, anchored at t = 0.
///
/// Beat `k` sits at `k * 60 / bpm` for every `k` up to the track duration;
/// positions are derived on demand rather than stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatGrid {
    bpm: f32,
    last_beat: u64,
}

impl BeatGrid {
    /// Builds the grid, or `None` when the tempo is unusable.
    pub fn new(bpm: f32, duration_secs: f64) -> Option<Self> {
        if !bpm.is_finite() || bpm <= 0.0 || !duration_secs.is_finite() || duration_secs < 0.0 {
            return None;
        }
        let interval = 60.0 / bpm as f64;
        let last_beat = (duration_secs / interval).floor() as u64;
        Some(BeatGrid { bpm, last_beat })
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn beat_interval(&self) -> f64 {
        60.0 / self.bpm as f64
    }

    pub fn beat_count(&self) -> u64 {
        self.last_beat + 1
    }

    pub fn beat_at(&self, index: u64) -> f64 {
        index as f64 * self.beat_interval()
    }

    /// Grid beat closest to `position_secs`; ties go to the earlier beat.
    pub fn nearest_beat(&self, position_secs: f64) -> f64 {
        if position_secs.is_nan() || position_secs <= 0.0 {
            return 0.0;
        }
        let interval = self.beat_interval();
        let after = (position_secs / interval).ceil();
        if after > self.last_beat as f64 {
            return self.beat_at(self.last_beat);
        }
        let after_secs = after * interval;
        let before_secs = (after - 1.0) * interval;
        if position_secs - before_secs <= after_secs - position_secs {
            before_secs
        } else {
            after_secs
        }
    }

    /// Index of the beat the playhead is in.
    pub fn beat_index(&self, position_secs: f64) -> i64 {
        (position_secs / self.beat_interval()).floor() as i64
    }
}
