use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfigRange};

use crate::audio::errors::GraphBuildError;
use crate::audio::graph::MixerGraph;

const FALLBACK_RATES: [u32; 2] = [48_000, 44_100];

/// The parts of a device configuration range that matter for selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ConfigCandidate {
    pub(crate) channels: u16,
    pub(crate) min_rate: u32,
    pub(crate) max_rate: u32,
    pub(crate) is_f32: bool,
}

impl ConfigCandidate {
    fn supports(&self, rate: u32) -> bool {
        self.min_rate <= rate && self.max_rate >= rate
    }
}

impl From<&SupportedStreamConfigRange> for ConfigCandidate {
    fn from(range: &SupportedStreamConfigRange) -> Self {
        ConfigCandidate {
            channels: range.channels(),
            min_rate: range.min_sample_rate().0,
            max_rate: range.max_sample_rate().0,
            is_f32: range.sample_format() == SampleFormat::F32,
        }
    }
}

/// Picks (channels, sample rate): f32 only, stereo preferred, the engine
/// rate preferred, then 48 kHz, then 44.1 kHz, then the widest range.
pub(crate) fn choose_config(candidates: &[ConfigCandidate], preferred_rate: u32) -> Option<(u16, u32)> {
    let f32_candidates: Vec<&ConfigCandidate> = candidates.iter().filter(|c| c.is_f32).collect();

    for rate in std::iter::once(preferred_rate).chain(FALLBACK_RATES) {
        let matching = f32_candidates.iter().copied().filter(|c| c.supports(rate));
        let mut best: Option<&ConfigCandidate> = None;
        for candidate in matching {
            if candidate.channels == 2 {
                best = Some(candidate);
                break;
            }
            if best.is_none() {
                best = Some(candidate);
            }
        }
        if let Some(best) = best {
            return Some((best.channels, rate));
        }
    }

    f32_candidates
        .iter()
        .max_by(|a, b| {
            a.channels
                .cmp(&b.channels)
                .then_with(|| a.max_rate.cmp(&b.max_rate))
        })
        .map(|c| (c.channels, c.max_rate))
}

/// Default output device with its chosen stream configuration.
pub(crate) struct OutputDevice {
    device: Device,
    config: StreamConfig,
}

impl OutputDevice {
    pub(crate) fn open_default(preferred_rate: u32) -> Result<Self, GraphBuildError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(GraphBuildError::NoOutputDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let candidates: Vec<ConfigCandidate> = match device.supported_output_configs() {
            Ok(configs) => configs.map(|range| ConfigCandidate::from(&range)).collect(),
            Err(e) => {
                log::warn!("Output: Could not query configs of '{}': {}", device_name, e);
                Vec::new()
            }
        };

        let (channels, sample_rate) = match choose_config(&candidates, preferred_rate) {
            Some(choice) => choice,
            None => {
                let default = device
                    .default_output_config()
                    .map_err(|e| GraphBuildError::NoOutputConfig(e.to_string()))?;
                if default.sample_format() != SampleFormat::F32 {
                    return Err(GraphBuildError::NoOutputConfig(format!(
                        "default format {:?} is not f32",
                        default.sample_format()
                    )));
                }
                log::warn!("Output: Using default output config for '{}': {:?}", device_name, default);
                (default.channels(), default.sample_rate().0)
            }
        };

        if sample_rate != preferred_rate {
            log::warn!(
                "Output: '{}' runs at {} Hz instead of {} Hz; the engine follows the device",
                device_name,
                sample_rate,
                preferred_rate
            );
        }
        log::info!("Output: '{}' at {} Hz, {} channel(s)", device_name, sample_rate, channels);

        Ok(OutputDevice {
            device,
            config: StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            },
        })
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Builds and starts the stream that renders `mixer` into the device.
    pub(crate) fn start(&self, mixer: Arc<MixerGraph>) -> Result<cpal::Stream, GraphBuildError> {
        let channels = self.config.channels as usize;
        let data_callback = move |output: &mut [f32], _info: &cpal::OutputCallbackInfo| {
            mixer.render(output, channels);
        };
        let error_callback = |err: cpal::StreamError| {
            log::error!("Output: Stream error: {}", err);
        };
        let stream = self
            .device
            .build_output_stream(&self.config, data_callback, error_callback, None)
            .map_err(|e| GraphBuildError::StreamBuild(e.to_string()))?;
        stream
            .play()
            .map_err(|e| GraphBuildError::StreamPlay(e.to_string()))?;
        log::info!("Output: Master stream started");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(channels: u16, min_rate: u32, max_rate: u32) -> ConfigCandidate {
        ConfigCandidate {
            channels,
            min_rate,
            max_rate,
            is_f32: true,
        }
    }

    #[test]
    fn test_prefers_stereo_at_engine_rate() {
        let candidates = [candidate(1, 8_000, 96_000), candidate(2, 8_000, 96_000)];
        assert_eq!(choose_config(&candidates, 44_100), Some((2, 44_100)));
    }

    #[test]
    fn test_falls_back_to_48k() {
        let candidates = [candidate(2, 48_000, 48_000)];
        assert_eq!(choose_config(&candidates, 44_100), Some((2, 48_000)));
    }

    #[test]
    fn test_ignores_non_float_formats() {
        let mut int_only = candidate(2, 8_000, 96_000);
        int_only.is_f32 = false;
        assert_eq!(choose_config(&[int_only], 44_100), None);
    }

    #[test]
    fn test_last_resort_widest_range() {
        let candidates = [candidate(1, 96_000, 96_000), candidate(2, 88_200, 88_200)];
        assert_eq!(choose_config(&candidates, 44_100), Some((2, 88_200)));
    }
}
