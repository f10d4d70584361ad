use rustfft::{Fft, FftPlanner, num_complex::Complex, num_traits::Zero};
use std::sync::Arc;

use crate::audio::config::{REVERB_DECAY_EXPONENT, REVERB_IMPULSE_SECS};

/// Two-channel impulse response.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoImpulse {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoImpulse {
    pub fn len(&self) -> usize {
        self.left.len().max(self.right.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scales both channels together so the louder one has unit energy.
    pub fn normalize(&mut self) {
        let energy = |ch: &[f32]| ch.iter().map(|s| s * s).sum::<f32>();
        let peak_energy = energy(&self.left).max(energy(&self.right));
        if peak_energy > f32::EPSILON {
            let scale = 1.0 / peak_energy.sqrt();
            self.left.iter_mut().chain(self.right.iter_mut()).for_each(|s| *s *= scale);
        }
    }
}

/// Synthetic room: uniform noise shaped by `(remaining / total)^5`.
///
/// Each channel draws from its own generator. Pass a seed for reproducible output.
pub fn generate_impulse(sample_rate: u32, seed: Option<u64>) -> StereoImpulse {
    let length = (sample_rate as f32 * REVERB_IMPULSE_SECS) as usize;
    let mut seeder = match seed {
        Some(s) => fastrand::Rng::with_seed(s),
        None => fastrand::Rng::new(),
    };
    let channel = |rng: &mut fastrand::Rng| -> Vec<f32> {
        (0..length)
            .map(|i| {
                let remaining = (length - i) as f32 / length as f32;
                let noise = rng.f32() * 2.0 - 1.0;
                noise * remaining.powi(REVERB_DECAY_EXPONENT)
            })
            .collect()
    };
    let mut left_rng = fastrand::Rng::with_seed(seeder.u64(..));
    let mut right_rng = fastrand::Rng::with_seed(seeder.u64(..));
    StereoImpulse {
        left: channel(&mut left_rng),
        right: channel(&mut right_rng),
    }
}

/// Uniformly partitioned overlap-save convolution of a mono send against a
/// stereo impulse. Latency is one block.
pub struct ConvolutionReverb {
    block: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    partitions: [Vec<Vec<Complex<f32>>>; 2],
    history: Vec<Vec<Complex<f32>>>,
    history_pos: usize,
    input: Vec<f32>,
    fill: usize,
    output: [Vec<f32>; 2],
    spectrum: Vec<Complex<f32>>,
    accumulator: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl ConvolutionReverb {
    pub fn new(impulse: &StereoImpulse, block: usize) -> Option<Self> {
        if impulse.is_empty() || block == 0 {
            return None;
        }
        let fft_size = block * 2;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);
        let partition_count = impulse.len().div_ceil(block);
        let mut scratch = vec![Complex::zero(); fft.get_inplace_scratch_len().max(ifft.get_inplace_scratch_len())];

        let mut split = |channel: &[f32]| -> Vec<Vec<Complex<f32>>> {
            (0..partition_count)
                .map(|p| {
                    let mut buf = vec![Complex::zero(); fft_size];
                    let start = p * block;
                    if start < channel.len() {
                        let end = (start + block).min(channel.len());
                        for (dst, &src) in buf.iter_mut().zip(&channel[start..end]) {
                            dst.re = src;
                        }
                    }
                    fft.process_with_scratch(&mut buf, &mut scratch);
                    buf
                })
                .collect()
        };
        let partitions = [split(&impulse.left), split(&impulse.right)];

        Some(ConvolutionReverb {
            block,
            fft,
            ifft,
            partitions,
            history: vec![vec![Complex::zero(); fft_size]; partition_count],
            history_pos: 0,
            input: vec![0.0; fft_size],
            fill: 0,
            output: [vec![0.0; block], vec![0.0; block]],
            spectrum: vec![Complex::zero(); fft_size],
            accumulator: vec![Complex::zero(); fft_size],
            scratch,
        })
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> (f32, f32) {
        let out = (self.output[0][self.fill], self.output[1][self.fill]);
        self.input[self.block + self.fill] = input;
        self.fill += 1;
        if self.fill == self.block {
            self.process_block();
            self.fill = 0;
        }
        out
    }

    fn process_block(&mut self) {
        let fft_size = self.block * 2;
        for (dst, &src) in self.spectrum.iter_mut().zip(&self.input) {
            *dst = Complex::new(src, 0.0);
        }
        self.fft.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let count = self.history.len();
        self.history_pos = (self.history_pos + count - 1) % count;
        self.history[self.history_pos].copy_from_slice(&self.spectrum);

        let norm = 1.0 / fft_size as f32;
        for ch in 0..2 {
            self.accumulator.iter_mut().for_each(|c| *c = Complex::zero());
            for (p, filter) in self.partitions[ch].iter().enumerate() {
                let past = &self.history[(self.history_pos + p) % count];
                for ((acc, x), h) in self.accumulator.iter_mut().zip(past).zip(filter) {
                    *acc += x * h;
                }
            }
            self.ifft.process_with_scratch(&mut self.accumulator, &mut self.scratch);
            for (dst, src) in self.output[ch].iter_mut().zip(&self.accumulator[self.block..]) {
                *dst = src.re * norm;
            }
        }

        self.input.copy_within(self.block.., 0);
    }

    pub fn clear(&mut self) {
        self.history.iter_mut().for_each(|h| h.iter_mut().for_each(|c| *c = Complex::zero()));
        self.input.fill(0.0);
        self.output.iter_mut().for_each(|o| o.fill(0.0));
        self.fill = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_bounded_and_sized() {
        let ir = generate_impulse(8_000, Some(7));
        assert_eq!(ir.left.len(), 16_000);
        assert_eq!(ir.right.len(), 16_000);
        assert!(ir.left.iter().chain(ir.right.iter()).all(|s| s.abs() <= 1.0));
        assert_ne!(ir.left, ir.right);
    }

    #[test]
    fn test_impulse_energy_decays() {
        let ir = generate_impulse(8_000, Some(42));
        let window = 1_600;
        let energies: Vec<f32> = ir
            .left
            .chunks(window)
            .map(|c| c.iter().map(|s| s * s).sum::<f32>())
            .collect();
        for pair in energies.windows(2) {
            assert!(pair[1] < pair[0], "energy must fall: {:?}", energies);
        }
    }

    #[test]
    fn test_impulse_seed_reproducible() {
        assert_eq!(generate_impulse(4_000, Some(3)), generate_impulse(4_000, Some(3)));
    }

    #[test]
    fn test_convolution_reproduces_impulse_after_one_block() {
        let ir = StereoImpulse {
            left: vec![1.0, 0.5, 0.25],
            right: vec![0.0, 1.0, 0.0, 0.0, 0.0, -0.5],
        };
        let mut reverb = ConvolutionReverb::new(&ir, 4).expect("reverb");
        let mut left = Vec::new();
        let mut right = Vec::new();
        for i in 0..16 {
            let (l, r) = reverb.process(if i == 0 { 1.0 } else { 0.0 });
            left.push(l);
            right.push(r);
        }
        let close = |a: f32, b: f32| (a - b).abs() < 1e-5;
        assert!(left[..4].iter().all(|s| close(*s, 0.0)));
        assert!(close(left[4], 1.0) && close(left[5], 0.5) && close(left[6], 0.25) && close(left[7], 0.0));
        assert!(close(right[5], 1.0) && close(right[9], -0.5) && close(right[8], 0.0));
    }

    #[test]
    fn test_normalize_unit_energy() {
        let mut ir = StereoImpulse { left: vec![3.0, 4.0], right: vec![1.0] };
        ir.normalize();
        assert!((ir.left[0] - 0.6).abs() < 1e-6 && (ir.left[1] - 0.8).abs() < 1e-6);
    }
}
