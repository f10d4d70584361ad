use rubato::{FftFixedIn, Resampler};
use std::io::Cursor;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use super::config::{DEFAULT_MONO_SAMPLE_CAPACITY, RESAMPLER_CHUNK_SIZE};
use super::errors::AudioDecodingError;
use super::playback::state::CancelFlag;

/// Mono audio decoded into memory, ready for a deck.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// File extension of a locator, e.g. `mp3` for `.../song.mp3?x=1`.
fn extension_of(source_name: &str) -> Option<&str> {
    let path_part = source_name.split(['?', '#']).next().unwrap_or(source_name);
    let (_, ext) = path_part.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 5 && !ext.contains('/')).then_some(ext)
}

fn hint_for(source_name: &str) -> Hint {
    let mut hint = Hint::new();
    if let Some(ext) = extension_of(source_name) {
        hint.with_extension(ext);
    }
    hint
}

/// Decodes encoded audio bytes to mono f32 samples.
pub(crate) fn decode_bytes_to_mono_samples(
    bytes: Vec<u8>,
    source_name: &str,
    cancel: &CancelFlag,
) -> Result<DecodedAudio, AudioDecodingError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let hint = hint_for(source_name);

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioDecodingError::FormatError { source_name: source_name.to_string(), source: e })?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| AudioDecodingError::NoSuitableTrack { source_name: source_name.to_string() })?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioDecodingError::MissingSampleRate { source_name: source_name.to_string() })?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| AudioDecodingError::MissingChannelInfo { source_name: source_name.to_string() })?
        .count();
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AudioDecodingError::DecoderCreationError { source_name: source_name.to_string(), source: e })?;

    let mut samples: Vec<f32> = Vec::with_capacity(DEFAULT_MONO_SAMPLE_CAPACITY);
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        if cancel.is_cancelled() {
            log::debug!("Decode: Stopped '{}' after {} samples", source_name, samples.len());
            return Err(AudioDecodingError::Cancelled { source_name: source_name.to_string() });
        }
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(audio_buf) => {
                        if sample_buf.is_none() {
                            sample_buf = Some(SampleBuffer::<f32>::new(
                                audio_buf.capacity() as u64,
                                *audio_buf.spec(),
                            ));
                        }
                        if let Some(buf) = sample_buf.as_mut() {
                            buf.copy_interleaved_ref(audio_buf);
                            let raw_samples = buf.samples();
                            if channels > 1 {
                                samples.extend(
                                    raw_samples
                                        .chunks_exact(channels)
                                        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32),
                                );
                            } else {
                                samples.extend_from_slice(raw_samples);
                            }
                        }
                    }
                    Err(SymphoniaError::DecodeError(err_desc)) => {
                        log::warn!("Decode: Ignoring decode error in '{}': {}", source_name, err_desc);
                    }
                    Err(e) => {
                        return Err(AudioDecodingError::FatalDecodeError { source_name: source_name.to_string(), source: e });
                    }
                }
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                log::debug!("Decode: Reached EOF for '{}'", source_name);
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                log::warn!("Decode: Decoder reset required unexpectedly for '{}'", source_name);
                break;
            }
            Err(e) => {
                return Err(AudioDecodingError::PacketReadIoError { source_name: source_name.to_string(), source: e });
            }
        }
    }

    decoder.finalize();
    log::debug!(
        "Decode: Decoded {} mono samples at {} Hz for '{}'",
        samples.len(),
        sample_rate,
        source_name
    );
    if samples.is_empty() {
        return Err(AudioDecodingError::NoSamplesDecoded { source_name: source_name.to_string() });
    }

    Ok(DecodedAudio { samples, sample_rate })
}

/// Converts decoded audio to the engine rate. A matching rate is a no-op.
/// The resampler's startup delay is trimmed so sample `n` of the output lines
/// up with time `n / target_rate` of the track.
pub(crate) fn resample_to(
    audio: DecodedAudio,
    target_rate: u32,
    source_name: &str,
    cancel: &CancelFlag,
) -> Result<DecodedAudio, AudioDecodingError> {
    if audio.sample_rate == target_rate || audio.samples.is_empty() {
        return Ok(audio);
    }
    let from = audio.sample_rate;
    let resample_err = |reason: String| AudioDecodingError::ResampleError {
        source_name: source_name.to_string(),
        from,
        to: target_rate,
        reason,
    };

    let mut resampler = FftFixedIn::<f32>::new(
        from as usize,
        target_rate as usize,
        RESAMPLER_CHUNK_SIZE,
        2,
        1,
    )
    .map_err(|e| resample_err(e.to_string()))?;

    let expected_len = (audio.samples.len() as f64 * target_rate as f64 / from as f64).round() as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<f32> = Vec::with_capacity(expected_len + delay + RESAMPLER_CHUNK_SIZE);
    let input = &audio.samples;
    let mut pos = 0usize;
    let cancelled = || AudioDecodingError::Cancelled { source_name: source_name.to_string() };

    while pos + resampler.input_frames_next() <= input.len() {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let frames = resampler.input_frames_next();
        let chunk = [&input[pos..pos + frames]];
        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| resample_err(e.to_string()))?;
        output.extend_from_slice(&processed[0]);
        pos += frames;
    }
    if pos < input.len() {
        let chunk = [&input[pos..]];
        let processed = resampler
            .process_partial(Some(&chunk), None)
            .map_err(|e| resample_err(e.to_string()))?;
        output.extend_from_slice(&processed[0]);
    }
    // Flush until the delayed tail is out too.
    while output.len() < expected_len + delay {
        let processed = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| resample_err(e.to_string()))?;
        if processed[0].is_empty() {
            break;
        }
        output.extend_from_slice(&processed[0]);
    }
    output.drain(..delay.min(output.len()));
    output.truncate(expected_len);

    log::debug!(
        "Decode: Resampled '{}' from {} Hz to {} Hz ({} -> {} samples)",
        source_name,
        from,
        target_rate,
        input.len(),
        output.len()
    );
    Ok(DecodedAudio {
        samples: output,
        sample_rate: target_rate,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal 16-bit PCM WAV writer for decode tests.
    pub(crate) fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
        out.extend_from_slice(&(channels * 2).to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_decode_stereo_wav_downmixes_to_mono() {
        // L = 0.5, R = -0.5 -> mono 0
        let interleaved: Vec<f32> = (0..2000).flat_map(|_| [0.5f32, -0.5f32]).collect();
        let bytes = wav_bytes(&interleaved, 22_050, 2);
        let decoded = decode_bytes_to_mono_samples(bytes, "memory://tone.wav", &CancelFlag::new()).expect("decode should succeed");
        assert_eq!(decoded.sample_rate, 22_050);
        assert_eq!(decoded.samples.len(), 2000);
        assert!(decoded.samples.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_bytes_to_mono_samples(vec![1, 2, 3, 4, 5, 6, 7, 8], "memory://junk.bin", &CancelFlag::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_resample_changes_length_proportionally() {
        let audio = DecodedAudio {
            samples: vec![0.25; 22_050],
            sample_rate: 22_050,
        };
        let resampled = resample_to(audio, 44_100, "memory://flat", &CancelFlag::new()).expect("resample should succeed");
        assert_eq!(resampled.sample_rate, 44_100);
        assert_eq!(resampled.samples.len(), 44_100);
    }

    #[test]
    fn test_resample_keeps_onsets_in_place() {
        // Silence for half a second, then a constant level.
        let mut samples = vec![0.0; 11_025];
        samples.extend(std::iter::repeat(0.8).take(11_025));
        let audio = DecodedAudio { samples, sample_rate: 22_050 };
        let resampled = resample_to(audio, 44_100, "memory://step", &CancelFlag::new()).expect("resample should succeed");
        let onset = resampled.samples.iter().position(|s| *s > 0.4).expect("step survives");
        assert!(onset.abs_diff(22_050) <= 8, "onset at {}", onset);
    }

    #[test]
    fn test_cancelled_decode_stops_early() {
        let bytes = wav_bytes(&vec![0.1; 22_050], 22_050, 1);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = decode_bytes_to_mono_samples(bytes, "memory://long.wav", &cancel);
        assert!(matches!(result, Err(AudioDecodingError::Cancelled { .. })));

        let audio = DecodedAudio { samples: vec![0.25; 22_050], sample_rate: 22_050 };
        let result = resample_to(audio, 44_100, "memory://flat", &cancel);
        assert!(matches!(result, Err(AudioDecodingError::Cancelled { .. })));
    }

    #[test]
    fn test_extension_ignores_query_string() {
        assert_eq!(extension_of("https://cdn.example.com/track.mp3?sig=abc"), Some("mp3"));
        assert_eq!(extension_of("song.flac#t=30"), Some("flac"));
        assert_eq!(extension_of("no-extension"), None);
        assert_eq!(extension_of("https://example.com/dir.v2/file"), None);
    }
}
