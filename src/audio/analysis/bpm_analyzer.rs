use crate::audio::config;
use crate::audio::errors::BpmError;
use crate::audio::playback::state::CancelFlag;
use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TempoCandidate {
    pub tempo: u32,
    pub count: usize,
}

// --- Private Helper Functions ---

fn kick_coefficients(filter_type: Type<f32>, sample_rate: f32, cutoff_hz: f32) -> Result<Coefficients<f32>, BpmError> {
    Coefficients::<f32>::from_params(filter_type, sample_rate.hz(), cutoff_hz.hz(), config::KICK_FILTER_Q)
        .map_err(|e| BpmError::FilterSetup(format!("{:?} at {} Hz: {:?}", filter_type, cutoff_hz, e)))
}

fn check(cancel: &CancelFlag) -> Result<(), BpmError> {
    if cancel.is_cancelled() { Err(BpmError::Cancelled) } else { Ok(()) }
}

/// Offline low-pass then high-pass render isolating the kick drum band.
fn render_kick_band(samples: &[f32], sample_rate: f32, cancel: &CancelFlag) -> Result<Vec<f32>, BpmError> {
    let mut lowpass = DirectForm1::<f32>::new(kick_coefficients(Type::LowPass, sample_rate, config::KICK_LOWPASS_HZ)?);
    let mut highpass = DirectForm1::<f32>::new(kick_coefficients(Type::HighPass, sample_rate, config::KICK_HIGHPASS_HZ)?);
    let mut filtered = Vec::with_capacity(samples.len());
    for chunk in samples.chunks(config::ANALYSIS_CANCEL_STRIDE) {
        check(cancel)?;
        filtered.extend(chunk.iter().map(|&s| highpass.run(lowpass.run(s))));
    }
    Ok(filtered)
}

/// Local maxima above the volume floor, at least `PEAK_MIN_DISTANCE_SECS` apart.
/// The spacing reference starts at t = 0, so no peak is taken in the first 0.2 s.
fn find_peaks(data: &[f32], sample_rate: f32, cancel: &CancelFlag) -> Result<Vec<f64>, BpmError> {
    let mut peaks = Vec::new();
    let mut last_peak_time = 0.0f64;
    for i in 1..data.len().saturating_sub(1) {
        if i % config::ANALYSIS_CANCEL_STRIDE == 0 {
            check(cancel)?;
        }
        let sample = data[i];
        let is_peak = sample > data[i - 1] && sample > data[i + 1];
        if is_peak && sample > config::PEAK_MIN_AMPLITUDE {
            let peak_time = i as f64 / sample_rate as f64;
            if peak_time - last_peak_time > config::PEAK_MIN_DISTANCE_SECS {
                peaks.push(peak_time);
                last_peak_time = peak_time;
            }
        }
    }
    Ok(peaks)
}

fn collect_intervals(peaks: &[f64], cancel: &CancelFlag) -> Result<Vec<f64>, BpmError> {
    let mut intervals = Vec::new();
    for i in 0..peaks.len().saturating_sub(1) {
        check(cancel)?;
        for j in (i + 1)..peaks.len() {
            let interval = peaks[j] - peaks[i];
            if interval > config::INTERVAL_EXPIRY_SECS {
                break;
            }
            intervals.push(interval);
        }
    }
    Ok(intervals)
}

/// Octave-folds a tempo into [BPM_MIN, BPM_MAX].
pub(crate) fn fold_tempo(mut tempo: f64) -> f64 {
    if !tempo.is_finite() || tempo <= 0.0 {
        return tempo;
    }
    while tempo < config::BPM_MIN as f64 {
        tempo *= 2.0;
    }
    while tempo > config::BPM_MAX as f64 {
        tempo /= 2.0;
    }
    tempo
}

/// Histogram of folded, rounded tempos in first-seen order, trimmed to the top candidates.
pub(crate) fn top_candidates(intervals: &[f64]) -> Vec<TempoCandidate> {
    let tempos: Vec<u32> = intervals
        .par_iter()
        .filter(|&&interval| interval > 0.0)
        .map(|&interval| fold_tempo(60.0 / interval).round() as u32)
        .collect();

    let mut candidates: Vec<TempoCandidate> = Vec::new();
    let mut index: HashMap<u32, usize> = HashMap::new();
    for tempo in tempos {
        match index.get(&tempo) {
            Some(&slot) => candidates[slot].count += 1,
            None => {
                index.insert(tempo, candidates.len());
                candidates.push(TempoCandidate { tempo, count: 1 });
            }
        }
    }

    // Stable: equal counts keep first-seen order.
    candidates.sort_by(|a, b| b.count.cmp(&a.count));
    candidates.truncate(config::TEMPO_TOP_CANDIDATES);
    candidates
}

// --- Public Calculation Function ---

/// Estimates the tempo of a decoded mono buffer.
pub(crate) fn estimate_bpm(samples: &[f32], sample_rate: f32, cancel: &CancelFlag) -> Result<f32, BpmError> {
    if samples.is_empty() {
        return Err(BpmError::EmptySamplesForBpm);
    }
    if !sample_rate.is_finite() || sample_rate <= 2.0 * config::KICK_LOWPASS_HZ {
        return Err(BpmError::InvalidSampleRate(sample_rate));
    }

    let filtered = render_kick_band(samples, sample_rate, cancel)?;
    let peaks = find_peaks(&filtered, sample_rate, cancel)?;
    if peaks.is_empty() {
        return Err(BpmError::NoPeaks {
            duration_secs: samples.len() as f64 / sample_rate as f64,
        });
    }

    let intervals = collect_intervals(&peaks, cancel)?;
    let candidates = top_candidates(&intervals);

    let mut best: Option<TempoCandidate> = None;
    for candidate in &candidates {
        if best.is_none_or(|b| candidate.count > b.count) {
            best = Some(*candidate);
        }
    }
    let best = best.ok_or(BpmError::NoIntervals { peak_count: peaks.len() })?;

    log::debug!(
        "BPM: {} peaks, {} intervals, candidates {:?}, picked {}",
        peaks.len(),
        intervals.len(),
        candidates,
        best.tempo
    );
    Ok(best.tempo as f32)
}

/// Runs the estimator on the blocking pool against a detached copy of the audio.
/// Cancelling `cancel` stops the worker at its next check.
pub async fn estimate_bpm_detached(samples: Arc<Vec<f32>>, sample_rate: u32, cancel: CancelFlag) -> Result<f32, BpmError> {
    tokio::task::spawn_blocking(move || estimate_bpm(&samples, sample_rate as f32, &cancel))
        .await
        .map_err(|e| BpmError::TaskFailed(e.to_string()))?
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 120 Hz tone bursts of 50 ms every `period_secs`, starting one period in.
    pub(crate) fn kick_pattern(period_secs: f64, total_secs: f64, sample_rate: u32) -> Vec<f32> {
        let total = (total_secs * sample_rate as f64) as usize;
        let burst_len = (0.05 * sample_rate as f64) as usize;
        let period = (period_secs * sample_rate as f64).round() as usize;
        let mut samples = vec![0.0f32; total];
        let mut start = period;
        while start + burst_len < total {
            for n in 0..burst_len {
                let t = n as f32 / sample_rate as f32;
                samples[start + n] = (2.0 * std::f32::consts::PI * 120.0 * t).sin();
            }
            start += period;
        }
        samples
    }

    #[test]
    fn test_periodic_kicks_estimate_120() {
        let sr = 22_050;
        let samples = kick_pattern(0.5, 10.0, sr);
        let bpm = estimate_bpm(&samples, sr as f32, &CancelFlag::new()).expect("tempo should be found");
        assert_eq!(bpm, 120.0);
    }

    #[test]
    fn test_silence_fails_with_no_peaks() {
        let samples = vec![0.0f32; 22_050 * 2];
        assert!(matches!(estimate_bpm(&samples, 22_050.0, &CancelFlag::new()), Err(BpmError::NoPeaks { .. })));
    }

    #[test]
    fn test_single_kick_has_no_intervals() {
        let sr = 22_050;
        // One burst only: period longer than the buffer tail allows a second.
        let samples = kick_pattern(1.0, 1.9, sr);
        assert!(matches!(estimate_bpm(&samples, sr as f32, &CancelFlag::new()), Err(BpmError::NoIntervals { .. })));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(estimate_bpm(&[], 44_100.0, &CancelFlag::new()), Err(BpmError::EmptySamplesForBpm));
    }

    #[test]
    fn test_fold_tempo_into_range() {
        assert_eq!(fold_tempo(60.0), 120.0);
        assert_eq!(fold_tempo(240.0), 120.0);
        assert_eq!(fold_tempo(90.0), 90.0);
        assert_eq!(fold_tempo(180.0), 180.0);
        assert_eq!(fold_tempo(40.0), 160.0);
    }

    #[test]
    fn test_peaks_respect_min_distance_and_floor() {
        let mut data = vec![0.0f32; 1000];
        // Too early (t = 0.1 s at 1 kHz), accepted, too close, accepted.
        data[100] = 0.5;
        data[300] = 0.5;
        data[400] = 0.5;
        data[600] = 0.05;
        data[700] = 0.5;
        let peaks = find_peaks(&data, 1000.0, &CancelFlag::new()).expect("not cancelled");
        assert_eq!(peaks, vec![0.3, 0.7]);
    }

    #[test]
    fn test_intervals_stop_at_expiry() {
        let peaks = [0.0, 1.0, 11.5, 12.0];
        let intervals = collect_intervals(&peaks, &CancelFlag::new()).expect("not cancelled");
        // 11.5 and 10.5 exceed the expiry and end their scans.
        assert_eq!(intervals, vec![1.0, 0.5]);
    }

    #[test]
    fn test_candidates_tie_goes_to_first_seen() {
        // 0.5 s -> 120, 0.4 s -> 150, one each; first seen wins the tie.
        let candidates = top_candidates(&[0.5, 0.4]);
        assert_eq!(candidates[0].tempo, 120);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_candidates_keep_top_five() {
        let intervals: Vec<f64> = (0..8).map(|i| 60.0 / (100.0 + 10.0 * i as f64)).collect();
        assert_eq!(top_candidates(&intervals).len(), 5);
    }

    #[tokio::test]
    async fn test_detached_estimate_runs_on_worker() {
        let sr = 22_050;
        let samples = Arc::new(kick_pattern(0.5, 6.0, sr));
        let bpm = estimate_bpm_detached(samples, sr, CancelFlag::new()).await.expect("tempo should be found");
        assert_eq!(bpm, 120.0);
    }

    #[test]
    fn test_cancelled_estimate_stops() {
        let sr = 22_050;
        let samples = kick_pattern(0.5, 10.0, sr);
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert_eq!(estimate_bpm(&samples, sr as f32, &cancel), Err(BpmError::Cancelled));
    }
}
