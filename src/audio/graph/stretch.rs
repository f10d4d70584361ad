use signalsmith_stretch::Stretch;

use super::source::TrackSource;

const CHANNELS: u32 = 1;

/// Master-tempo stretcher backed by signalsmith-stretch.
///
/// The source is read at unity speed and `rate` times more input than output
/// is handed to the stretcher, so the timeline moves at the playback rate
/// while pitch holds.
pub(crate) struct TempoStretcher {
    stretch: Stretch,
    input: Vec<f32>,
    output: Vec<f32>,
    fractional_input: f64,
    active: bool,
}

impl TempoStretcher {
    pub(crate) fn new(sample_rate: u32) -> Self {
        TempoStretcher {
            stretch: Stretch::preset_default(CHANNELS, sample_rate),
            input: Vec::new(),
            output: Vec::new(),
            fractional_input: 0.0,
            active: false,
        }
    }

    /// Drops buffered audio; the next stretched buffer starts clean.
    pub(crate) fn reset(&mut self) {
        if self.active {
            self.stretch.reset();
        }
        self.fractional_input = 0.0;
        self.active = false;
    }

    pub(crate) fn latency_samples(&self) -> usize {
        self.stretch.input_latency() + self.stretch.output_latency()
    }

    /// Stretches the source from `read_head` into `frames` output samples and
    /// returns how many source samples were consumed. Returns `None` without
    /// touching any state when the source runs out inside this buffer.
    pub(crate) fn process(&mut self, source: &TrackSource, read_head: f64, rate: f64, frames: usize) -> Option<usize> {
        let wanted = self.fractional_input + frames as f64 * rate;
        let input_len = wanted.floor() as usize;
        if read_head + input_len as f64 >= source.len() as f64 - 1.0 {
            return None;
        }
        if !self.active {
            self.stretch.reset();
            self.active = true;
        }
        self.fractional_input = wanted - input_len as f64;

        self.input.clear();
        self.input
            .extend((0..input_len).map(|i| source.sample_at(read_head + i as f64)));
        self.output.clear();
        self.output.resize(frames, 0.0);
        if input_len > 0 {
            self.stretch.process(&self.input[..], &mut self.output[..]);
        }
        Some(input_len)
    }

    /// Output of the last successful `process` call.
    pub(crate) fn output(&self) -> &[f32] {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SR: u32 = 8_000;

    fn sine(freq: f32, secs: f32) -> TrackSource {
        let samples = (0..(SR as f32 * secs) as usize)
            .map(|n| (2.0 * std::f32::consts::PI * freq * n as f32 / SR as f32).sin() * 0.5)
            .collect();
        TrackSource::new(Arc::new(samples))
    }

    fn zero_crossings(samples: &[f32]) -> usize {
        samples.windows(2).filter(|w| (w[0] < 0.0) != (w[1] < 0.0)).count()
    }

    #[test]
    fn test_consumes_rate_times_frames() {
        let source = sine(200.0, 4.0);
        let mut stretcher = TempoStretcher::new(SR);
        let mut head = 0.0;
        for _ in 0..40 {
            head += stretcher.process(&source, head, 1.25, 256).expect("enough source") as f64;
        }
        assert!((head - 40.0 * 256.0 * 1.25).abs() <= 1.0, "head {}", head);
    }

    #[test]
    fn test_refuses_buffer_past_end() {
        let source = sine(200.0, 0.1);
        let mut stretcher = TempoStretcher::new(SR);
        assert!(stretcher.process(&source, 700.0, 1.5, 256).is_none());
        assert!(stretcher.process(&source, 0.0, 1.5, 256).is_some());
    }

    #[test]
    fn test_speeds_up_without_raising_pitch() {
        let source = sine(200.0, 4.0);
        let mut stretcher = TempoStretcher::new(SR);
        assert!(stretcher.latency_samples() > 0);
        let mut head = 0.0;
        let mut rendered = Vec::new();
        while rendered.len() < SR as usize * 2 {
            let consumed = stretcher.process(&source, head, 1.5, 256).expect("enough source");
            head += consumed as f64;
            rendered.extend_from_slice(stretcher.output());
        }
        // Two seconds of output covered three seconds of track.
        assert!((head - 1.5 * rendered.len() as f64).abs() <= 1.0);
        // The second output second still carries a 200 Hz tone (about 400
        // crossings), not the 300 Hz a plain speed-up would give.
        let crossings = zero_crossings(&rendered[SR as usize..]);
        assert!((360..=440).contains(&crossings), "crossings {}", crossings);
    }
}
