use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::audio::errors::ConfigError;

// --- EQ Filter Constants ---
pub const LOW_SHELF_HZ: f32 = 320.0;
pub const MID_CENTER_HZ: f32 = 1000.0;
pub const HIGH_SHELF_HZ: f32 = 3200.0;
pub const MID_PEAK_Q_FACTOR: f32 = 0.5;
// Q factor for shelf filters
pub const SHELF_Q_FACTOR: f32 = std::f32::consts::FRAC_1_SQRT_2;
pub const EQ_GAIN_MIN_DB: f32 = -40.0;
pub const EQ_GAIN_MAX_DB: f32 = 40.0;

// --- Resonant Filter Constants ---
pub const FILTER_MIN_CUTOFF_HZ: f32 = 40.0;
pub const FILTER_BASE_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;
pub const FILTER_Q_SWEEP: f32 = 4.0;
/// Coefficients are computed slightly below Nyquist; the biquad is unstable at exactly fs/2.
pub const FILTER_COEFF_CEILING_RATIO: f32 = 0.49;

// --- Tempo Estimator Constants ---
pub const BPM_MIN: f32 = 90.0;
pub const BPM_MAX: f32 = 180.0;
pub const KICK_LOWPASS_HZ: f32 = 150.0;
pub const KICK_HIGHPASS_HZ: f32 = 100.0;
pub const KICK_FILTER_Q: f32 = 1.0;
pub const PEAK_MIN_AMPLITUDE: f32 = 0.1;
pub const PEAK_MIN_DISTANCE_SECS: f64 = 0.2;
pub const INTERVAL_EXPIRY_SECS: f64 = 10.0;
pub const TEMPO_TOP_CANDIDATES: usize = 5;
/// Samples between checks for a cancelled estimate.
pub const ANALYSIS_CANCEL_STRIDE: usize = 1 << 16;

// --- Effects Send Constants ---
pub const REVERB_IMPULSE_SECS: f32 = 2.0;
pub const REVERB_DECAY_EXPONENT: i32 = 5;
pub const REVERB_BLOCK_SIZE: usize = 512;
pub const DELAY_DEFAULT_SECS: f32 = 0.5;
pub const DELAY_MAX_SECS: f32 = 2.0;
pub const DELAY_DEFAULT_FEEDBACK: f32 = 0.0;
pub const DELAY_MAX_FEEDBACK: f32 = 0.95;

// --- Analysis Tap Constants ---
// Matches a 2048-point analyser window
pub const ANALYSIS_WINDOW_SAMPLES: usize = 2048;

// --- Transport Constants ---
pub const RATE_MIN: f32 = 0.5;
pub const RATE_MAX: f32 = 2.0;
pub const BEAT_PULSE_MS: u64 = 100;
pub const JOG_SCRUB_DIVISOR: f64 = 800.0;
pub const JOG_ROTATIONS_PER_TRACK: f64 = 2.0;

// --- VU Meter Constants ---
pub const VU_SEGMENTS: usize = 12;
pub const VU_SENSITIVITY: f32 = 5.0;
pub const VU_YELLOW_RATIO: f32 = 0.6;
pub const VU_RED_RATIO: f32 = 0.85;

// -- EQ Performance Constants --
/// Minimum change in dB before recalculating EQ filter coefficients
pub const EQ_RECALC_THRESHOLD_DB: f32 = 0.1;

/// Smoothing factor for EQ parameter changes (higher = faster response)
pub const EQ_SMOOTHING_FACTOR: f32 = 0.08;

// --- Utility Constants --
pub const DEFAULT_MONO_SAMPLE_CAPACITY: usize = 1024 * 256;
pub const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Runtime settings for the engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Rate the graphs run at when no output device dictates one.
    pub sample_rate: u32,
    /// Position/loop/beat tick cadence.
    pub tick_interval_ms: u64,
    /// Metering cadence, roughly one display frame.
    pub meter_interval_ms: u64,
    pub hotcue_pads: u8,
    pub rate_min: f32,
    pub rate_max: f32,
    pub auto_play: bool,
    pub command_channel_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44_100,
            tick_interval_ms: 20,
            meter_interval_ms: 16,
            hotcue_pads: 8,
            rate_min: RATE_MIN,
            rate_max: RATE_MAX,
            auto_play: true,
            command_channel_size: 64,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        log::info!("Config: Loaded engine config from '{}'", path.display());
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sampleRate {} outside 8000..=192000",
                self.sample_rate
            )));
        }
        if self.tick_interval_ms == 0 || self.meter_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick and meter intervals must be non-zero".to_string(),
            ));
        }
        if self.hotcue_pads == 0 {
            return Err(ConfigError::Invalid("hotcuePads must be at least 1".to_string()));
        }
        if !(self.rate_min > 0.0 && self.rate_min <= 1.0 && self.rate_max >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "rate range [{}, {}] must contain 1.0 and be positive",
                self.rate_min, self.rate_max
            )));
        }
        if self.command_channel_size == 0 {
            return Err(ConfigError::Invalid("commandChannelSize must be non-zero".to_string()));
        }
        Ok(())
    }
}
