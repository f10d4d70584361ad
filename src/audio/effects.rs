use crate::audio::config;
use crate::audio::errors::AudioEffectsError;
use biquad::{Coefficients, ToHertz, Type};
use std::f32::consts::FRAC_PI_2;

// --- EQ Coefficient Helpers ---

pub(crate) fn calculate_low_shelf(
    sample_rate: f32,
    gain_db: f32,
) -> Result<Coefficients<f32>, AudioEffectsError> {
    Coefficients::<f32>::from_params(
        Type::LowShelf(gain_db),
        sample_rate.hz(),
        config::LOW_SHELF_HZ.hz(),
        config::SHELF_Q_FACTOR,
    )
    .map_err(|e| AudioEffectsError::CoefficientCalculationError {
        filter_type: format!("LowShelf: {:?}", e),
    })
}

pub(crate) fn calculate_mid_peak(
    sample_rate: f32,
    gain_db: f32,
) -> Result<Coefficients<f32>, AudioEffectsError> {
    Coefficients::<f32>::from_params(
        Type::PeakingEQ(gain_db),
        sample_rate.hz(),
        config::MID_CENTER_HZ.hz(),
        config::MID_PEAK_Q_FACTOR,
    )
    .map_err(|e| AudioEffectsError::CoefficientCalculationError {
        filter_type: format!("MidPeak: {:?}", e),
    })
}

pub(crate) fn calculate_high_shelf(
    sample_rate: f32,
    gain_db: f32,
) -> Result<Coefficients<f32>, AudioEffectsError> {
    Coefficients::<f32>::from_params(
        Type::HighShelf(gain_db),
        sample_rate.hz(),
        config::HIGH_SHELF_HZ.hz(),
        config::SHELF_Q_FACTOR,
    )
    .map_err(|e| AudioEffectsError::CoefficientCalculationError {
        filter_type: format!("HighShelf: {:?}", e),
    })
}

// --- Resonant Filter Mapping ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Fully open; the biquad is bypassed.
    Neutral,
    LowPass,
    HighPass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    pub mode: FilterMode,
    pub cutoff_hz: f32,
    pub q: f32,
}

/// Maps a filter knob position in [-1, 1] to a mode, cutoff and resonance.
///
/// Negative positions sweep a low-pass down from Nyquist to 40 Hz, positive
/// positions sweep a high-pass up from 40 Hz to Nyquist. Both sweeps are
/// exponential so equal knob travel covers equal octaves.
pub fn filter_settings(position: f32, sample_rate: f32) -> FilterSettings {
    let p = if position.is_finite() { position.clamp(-1.0, 1.0) } else { 0.0 };
    let nyquist = sample_rate / 2.0;
    let min_cutoff = config::FILTER_MIN_CUTOFF_HZ;
    let q = config::FILTER_BASE_Q + config::FILTER_Q_SWEEP * p.abs();

    if p == 0.0 {
        FilterSettings {
            mode: FilterMode::Neutral,
            cutoff_hz: nyquist,
            q: config::FILTER_BASE_Q,
        }
    } else if p < 0.0 {
        FilterSettings {
            mode: FilterMode::LowPass,
            cutoff_hz: nyquist * (min_cutoff / nyquist).powf(p.abs()),
            q,
        }
    } else {
        FilterSettings {
            mode: FilterMode::HighPass,
            cutoff_hz: min_cutoff * (nyquist / min_cutoff).powf(p),
            q,
        }
    }
}

/// Biquad coefficients for the given settings, `None` when neutral.
pub(crate) fn calculate_filter(
    sample_rate: f32,
    settings: FilterSettings,
) -> Result<Option<Coefficients<f32>>, AudioEffectsError> {
    let filter_type = match settings.mode {
        FilterMode::Neutral => return Ok(None),
        FilterMode::LowPass => Type::LowPass,
        FilterMode::HighPass => Type::HighPass,
    };
    let cutoff = settings
        .cutoff_hz
        .min(sample_rate * config::FILTER_COEFF_CEILING_RATIO)
        .max(1.0);
    Coefficients::<f32>::from_params(filter_type, sample_rate.hz(), cutoff.hz(), settings.q)
        .map(Some)
        .map_err(|e| AudioEffectsError::CoefficientCalculationError {
            filter_type: format!("{:?}: {:?}", settings.mode, e),
        })
}

// --- Crossfader ---

/// Equal-power gains `(deck A, deck B)` for a crossfader position in [-1, 1].
pub fn crossfader_gains(position: f32) -> (f32, f32) {
    let x = if position.is_finite() { position.clamp(-1.0, 1.0) } else { 0.0 };
    let t = (x + 1.0) / 2.0;
    ((t * FRAC_PI_2).cos(), ((1.0 - t) * FRAC_PI_2).cos())
}

/// dB to linear amplitude.
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}
