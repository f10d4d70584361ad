use biquad::{Biquad, DirectForm1};

use crate::audio::analysis::level_meter;
use crate::audio::config::{
    ANALYSIS_WINDOW_SAMPLES, DELAY_MAX_FEEDBACK, DELAY_MAX_SECS, EQ_RECALC_THRESHOLD_DB,
    EQ_SMOOTHING_FACTOR,
};
use crate::audio::effects;
use crate::audio::errors::AudioEffectsError;
use crate::audio::types::EqParams;

// --- Analysis Tap ---

/// Rolling window of the most recent source samples, read by the level meter.
pub(crate) struct AnalysisTap {
    window: Vec<f32>,
    write_pos: usize,
}

impl AnalysisTap {
    pub(crate) fn new() -> Self {
        AnalysisTap {
            window: vec![0.0; ANALYSIS_WINDOW_SAMPLES],
            write_pos: 0,
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, sample: f32) {
        self.window[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.window.len();
    }

    pub(crate) fn rms(&self) -> f32 {
        level_meter::rms(&self.window)
    }

    pub(crate) fn clear(&mut self) {
        self.window.fill(0.0);
        self.write_pos = 0;
    }
}

// --- Three-Band EQ ---

pub(crate) struct EqStage {
    sample_rate: f32,
    current: EqParams,
    last_applied: EqParams,
    low_shelf: DirectForm1<f32>,
    mid_peak: DirectForm1<f32>,
    high_shelf: DirectForm1<f32>,
}

impl EqStage {
    pub(crate) fn new(sample_rate: f32, initial: EqParams) -> Result<Self, AudioEffectsError> {
        Ok(EqStage {
            sample_rate,
            current: initial,
            last_applied: initial,
            low_shelf: DirectForm1::<f32>::new(effects::calculate_low_shelf(sample_rate, initial.low_gain_db)?),
            mid_peak: DirectForm1::<f32>::new(effects::calculate_mid_peak(sample_rate, initial.mid_gain_db)?),
            high_shelf: DirectForm1::<f32>::new(effects::calculate_high_shelf(sample_rate, initial.high_gain_db)?),
        })
    }

    /// Moves the working gains toward `target` and refreshes any band that drifted
    /// past the recalculation threshold. Called once per render buffer.
    pub(crate) fn update(&mut self, target: EqParams) {
        let target = target.clamped();
        if self.current.approx_eq(&target) && self.last_applied.approx_eq(&target) {
            return;
        }
        let smooth = |current: f32, target: f32| {
            let next = target * EQ_SMOOTHING_FACTOR + current * (1.0 - EQ_SMOOTHING_FACTOR);
            if (target - next).abs() < 0.01 { target } else { next }
        };
        self.current = EqParams {
            low_gain_db: smooth(self.current.low_gain_db, target.low_gain_db),
            mid_gain_db: smooth(self.current.mid_gain_db, target.mid_gain_db),
            high_gain_db: smooth(self.current.high_gain_db, target.high_gain_db),
        };

        let settled = self.current.approx_eq(&target);
        if settled || (self.current.low_gain_db - self.last_applied.low_gain_db).abs() > EQ_RECALC_THRESHOLD_DB {
            match effects::calculate_low_shelf(self.sample_rate, self.current.low_gain_db) {
                Ok(c) => self.low_shelf.update_coefficients(c),
                Err(e) => log::error!("EQ: Failed to update low shelf: {}", e),
            }
            self.last_applied.low_gain_db = self.current.low_gain_db;
        }
        if settled || (self.current.mid_gain_db - self.last_applied.mid_gain_db).abs() > EQ_RECALC_THRESHOLD_DB {
            match effects::calculate_mid_peak(self.sample_rate, self.current.mid_gain_db) {
                Ok(c) => self.mid_peak.update_coefficients(c),
                Err(e) => log::error!("EQ: Failed to update mid peak: {}", e),
            }
            self.last_applied.mid_gain_db = self.current.mid_gain_db;
        }
        if settled || (self.current.high_gain_db - self.last_applied.high_gain_db).abs() > EQ_RECALC_THRESHOLD_DB {
            match effects::calculate_high_shelf(self.sample_rate, self.current.high_gain_db) {
                Ok(c) => self.high_shelf.update_coefficients(c),
                Err(e) => log::error!("EQ: Failed to update high shelf: {}", e),
            }
            self.last_applied.high_gain_db = self.current.high_gain_db;
        }
    }

    #[inline]
    pub(crate) fn run(&mut self, sample: f32) -> f32 {
        let low = self.low_shelf.run(sample);
        let mid = self.mid_peak.run(low);
        self.high_shelf.run(mid)
    }
}

// --- Resonant Filter ---

pub(crate) struct ResonantFilter {
    sample_rate: f32,
    position: f32,
    biquad: Option<DirectForm1<f32>>,
}

impl ResonantFilter {
    pub(crate) fn new(sample_rate: f32) -> Self {
        ResonantFilter {
            sample_rate,
            position: 0.0,
            biquad: None,
        }
    }

    pub(crate) fn set_position(&mut self, position: f32) -> Result<(), AudioEffectsError> {
        if position == self.position {
            return Ok(());
        }
        let settings = effects::filter_settings(position, self.sample_rate);
        match effects::calculate_filter(self.sample_rate, settings)? {
            None => self.biquad = None,
            Some(coeffs) => match self.biquad.as_mut() {
                Some(filter) => filter.update_coefficients(coeffs),
                None => self.biquad = Some(DirectForm1::<f32>::new(coeffs)),
            },
        }
        self.position = position;
        Ok(())
    }

    #[inline]
    pub(crate) fn run(&mut self, sample: f32) -> f32 {
        match self.biquad.as_mut() {
            Some(filter) => filter.run(sample),
            None => sample,
        }
    }
}

// --- Feedback Delay ---

/// Mono delay line with feedback, sized for the longest supported delay time.
pub(crate) struct FeedbackDelay {
    buffer: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
    feedback: f32,
    sample_rate: f32,
}

impl FeedbackDelay {
    pub(crate) fn new(sample_rate: f32, delay_secs: f32, feedback: f32) -> Self {
        let capacity = (sample_rate * DELAY_MAX_SECS).ceil() as usize + 1;
        let mut delay = FeedbackDelay {
            buffer: vec![0.0; capacity.max(2)],
            write_pos: 0,
            delay_samples: 1,
            feedback: 0.0,
            sample_rate,
        };
        delay.set_params(delay_secs, feedback);
        delay
    }

    pub(crate) fn set_params(&mut self, delay_secs: f32, feedback: f32) {
        let max = self.buffer.len() - 1;
        let samples = (delay_secs.max(0.0) * self.sample_rate).round() as usize;
        self.delay_samples = samples.clamp(1, max);
        self.feedback = if feedback.is_finite() { feedback.clamp(0.0, DELAY_MAX_FEEDBACK) } else { 0.0 };
    }

    #[inline]
    pub(crate) fn process(&mut self, input: f32) -> f32 {
        let len = self.buffer.len();
        let read_pos = (self.write_pos + len - self.delay_samples) % len;
        let delayed = self.buffer[read_pos];
        self.buffer[self.write_pos] = input + delayed * self.feedback;
        self.write_pos = (self.write_pos + 1) % len;
        delayed
    }

    pub(crate) fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_rms_tracks_recent_samples() {
        let mut tap = AnalysisTap::new();
        assert_eq!(tap.rms(), 0.0);
        for _ in 0..ANALYSIS_WINDOW_SAMPLES {
            tap.push(0.5);
        }
        assert!((tap.rms() - 0.5).abs() < 1e-5);
        tap.clear();
        assert_eq!(tap.rms(), 0.0);
    }

    #[test]
    fn test_delay_single_echo_without_feedback() {
        let mut delay = FeedbackDelay::new(1000.0, 0.01, 0.0);
        let mut out = Vec::new();
        out.push(delay.process(1.0));
        for _ in 0..30 {
            out.push(delay.process(0.0));
        }
        let echoes: Vec<usize> = out.iter().enumerate().filter(|(_, v)| **v != 0.0).map(|(i, _)| i).collect();
        assert_eq!(echoes, vec![10]);
    }

    #[test]
    fn test_delay_feedback_repeats_decaying() {
        let mut delay = FeedbackDelay::new(1000.0, 0.01, 0.5);
        let mut out = vec![delay.process(1.0)];
        for _ in 0..40 {
            out.push(delay.process(0.0));
        }
        assert_eq!(out[10], 1.0);
        assert_eq!(out[20], 0.5);
        assert_eq!(out[30], 0.25);
    }

    #[test]
    fn test_neutral_filter_is_transparent() {
        let mut filter = ResonantFilter::new(44_100.0);
        filter.set_position(0.0).expect("neutral");
        for s in [0.3f32, -0.7, 1.0] {
            assert_eq!(filter.run(s), s);
        }
        filter.set_position(-0.5).expect("low-pass");
        assert!(filter.biquad.is_some());
        filter.set_position(0.0).expect("back to neutral");
        assert!(filter.biquad.is_none());
    }

    #[test]
    fn test_eq_flat_passes_dc_after_settling() {
        let mut eq = EqStage::new(44_100.0, EqParams::default()).expect("eq");
        let mut last = 0.0;
        for _ in 0..20_000 {
            last = eq.run(0.5);
        }
        assert!((last - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_eq_smoothing_reaches_target() {
        let mut eq = EqStage::new(44_100.0, EqParams::default()).expect("eq");
        let target = EqParams { low_gain_db: -40.0, mid_gain_db: 6.0, high_gain_db: 0.0 };
        for _ in 0..500 {
            eq.update(target);
        }
        assert!(eq.current.approx_eq(&target));
        assert!(eq.last_applied.approx_eq(&target));
    }

    #[test]
    fn test_eq_recovers_from_non_finite_target() {
        let mut eq = EqStage::new(44_100.0, EqParams::default()).expect("eq");
        eq.update(EqParams { low_gain_db: f32::NAN, mid_gain_db: f32::INFINITY, high_gain_db: 0.0 });
        assert!(eq.current.low_gain_db.is_finite() && eq.current.mid_gain_db.is_finite());
        let target = EqParams { low_gain_db: -12.0, ..EqParams::default() };
        for _ in 0..500 {
            eq.update(target);
        }
        assert!(eq.current.approx_eq(&target));
        assert!(eq.run(0.25).is_finite());
    }
}
