use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::audio::config::{DELAY_DEFAULT_FEEDBACK, DELAY_DEFAULT_SECS, REVERB_BLOCK_SIZE};
use crate::audio::errors::GraphBuildError;
use crate::audio::playback::state::{AtomicF32, AtomicF64};
use crate::audio::types::{DeckId, EqParams};

pub mod nodes;
pub mod reverb;
pub(crate) mod source;
pub(crate) mod stretch;

use nodes::{AnalysisTap, EqStage, FeedbackDelay, ResonantFilter};
use reverb::ConvolutionReverb;
use source::TrackSource;
use stretch::TempoStretcher;

const NO_SEEK: f64 = -1.0;
const SEEK_FADE_INCREMENT_PER_BUFFER: f32 = 0.08;

// --- Shared Parameters ---

/// Control-side parameters of one deck, written by the engine thread and read
/// by the render callback once per buffer.
#[derive(Debug)]
pub struct DeckParams {
    pub low_gain_db: AtomicF32,
    pub mid_gain_db: AtomicF32,
    pub high_gain_db: AtomicF32,
    pub filter_position: AtomicF32,
    pub volume: AtomicF32,
    pub crossfader_gain: AtomicF32,
    pub reverb_send: AtomicF32,
    pub delay_send: AtomicF32,
    pub delay_time_secs: AtomicF32,
    pub delay_feedback: AtomicF32,
    pub playback_rate: AtomicF32,
    pub master_tempo: AtomicBool,
    pub playing: AtomicBool,
    /// Set by the renderer when the read head runs off the end of the track.
    pub ended: AtomicBool,
    read_head: AtomicF64,
    pending_seek: AtomicF64,
}

impl Default for DeckParams {
    fn default() -> Self {
        let equal_power = std::f32::consts::FRAC_1_SQRT_2;
        DeckParams {
            low_gain_db: AtomicF32::new(0.0),
            mid_gain_db: AtomicF32::new(0.0),
            high_gain_db: AtomicF32::new(0.0),
            filter_position: AtomicF32::new(0.0),
            volume: AtomicF32::new(1.0),
            crossfader_gain: AtomicF32::new(equal_power),
            reverb_send: AtomicF32::new(0.0),
            delay_send: AtomicF32::new(0.0),
            delay_time_secs: AtomicF32::new(DELAY_DEFAULT_SECS),
            delay_feedback: AtomicF32::new(DELAY_DEFAULT_FEEDBACK),
            playback_rate: AtomicF32::new(1.0),
            master_tempo: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            read_head: AtomicF64::new(0.0),
            pending_seek: AtomicF64::new(NO_SEEK),
        }
    }
}

impl DeckParams {
    pub fn eq(&self) -> EqParams {
        EqParams {
            low_gain_db: self.low_gain_db.load(Ordering::Relaxed),
            mid_gain_db: self.mid_gain_db.load(Ordering::Relaxed),
            high_gain_db: self.high_gain_db.load(Ordering::Relaxed),
        }
    }

    pub fn set_eq(&self, eq: EqParams) {
        self.low_gain_db.store(eq.low_gain_db, Ordering::Relaxed);
        self.mid_gain_db.store(eq.mid_gain_db, Ordering::Relaxed);
        self.high_gain_db.store(eq.high_gain_db, Ordering::Relaxed);
    }

    /// Read head in source samples, including a seek the renderer has not picked up yet.
    pub fn position_samples(&self) -> f64 {
        let pending = self.pending_seek.load(Ordering::Acquire);
        if pending >= 0.0 {
            pending
        } else {
            self.read_head.load(Ordering::Acquire)
        }
    }

    pub fn request_seek(&self, position_samples: f64) {
        self.pending_seek.store(position_samples.max(0.0), Ordering::Release);
    }
}

// --- Deck Processing Chain ---

/// Render-side node state: source → tap → EQ → filter → {dry, reverb, delay}.
pub(crate) struct DeckProcessor {
    source: TrackSource,
    eq: EqStage,
    filter: ResonantFilter,
    reverb: ConvolutionReverb,
    delay: FeedbackDelay,
    stretcher: TempoStretcher,
    read_head: f64,
    seek_fade: Option<f32>,
}

impl DeckProcessor {
    /// Renders one buffer of stereo channel-bus frames.
    pub(crate) fn render(&mut self, deck: DeckId, params: &DeckParams, tap: &Mutex<AnalysisTap>, out: &mut [[f32; 2]]) {
        let pending = params.pending_seek.swap(NO_SEEK, Ordering::AcqRel);
        if pending >= 0.0 {
            self.read_head = pending;
            self.stretcher.reset();
            self.seek_fade = Some(0.0);
        }

        self.eq.update(params.eq());
        if let Err(e) = self.filter.set_position(params.filter_position.load(Ordering::Relaxed)) {
            log::error!("Deck {}: Failed to update filter: {}", deck, e);
        }
        self.delay.set_params(
            params.delay_time_secs.load(Ordering::Relaxed),
            params.delay_feedback.load(Ordering::Relaxed),
        );
        let reverb_send = params.reverb_send.load(Ordering::Relaxed).clamp(0.0, 1.0);
        let delay_send = params.delay_send.load(Ordering::Relaxed).clamp(0.0, 1.0);
        let rate = params.playback_rate.load(Ordering::Relaxed) as f64;
        let master_tempo = params.master_tempo.load(Ordering::Relaxed);
        let mut playing = params.playing.load(Ordering::Relaxed) && !self.source.is_empty();

        let mut fade_gain = 1.0f32;
        if let Some(progress) = self.seek_fade.as_mut() {
            fade_gain = *progress;
            *progress += SEEK_FADE_INCREMENT_PER_BUFFER;
            if *progress >= 1.0 {
                self.seek_fade = None;
            }
        }

        let total = self.source.len() as f64;
        // Near the end of the track the unstretched path takes over and raises the end flag.
        let stretched = if playing && master_tempo && (rate - 1.0).abs() > 1e-6 {
            self.stretcher.process(&self.source, self.read_head, rate, out.len())
        } else {
            self.stretcher.reset();
            None
        };
        if let Some(consumed) = stretched {
            self.read_head += consumed as f64;
        }
        let mut tap = tap.lock().unwrap_or_else(PoisonError::into_inner);

        for (i, frame) in out.iter_mut().enumerate() {
            let mut sample = 0.0;
            if stretched.is_some() {
                sample = self.stretcher.output()[i];
            } else if playing {
                if self.read_head >= total - 1.0 {
                    playing = false;
                    params.playing.store(false, Ordering::Relaxed);
                    params.ended.store(true, Ordering::Release);
                    log::trace!("Deck {}: Read head reached the end ({:.2})", deck, self.read_head);
                } else {
                    sample = self.source.sample_at(self.read_head);
                    self.read_head += rate;
                }
            }

            tap.push(sample);
            let shaped = self.filter.run(self.eq.run(sample)) * fade_gain;
            let echo = self.delay.process(shaped * delay_send);
            let (wet_l, wet_r) = self.reverb.process(shaped * reverb_send);
            frame[0] = shaped + wet_l + echo;
            frame[1] = shaped + wet_r + echo;
        }
        drop(tap);

        // A seek that landed mid-buffer wins over the advanced head.
        if params.pending_seek.load(Ordering::Acquire) < 0.0 {
            params.read_head.store(self.read_head, Ordering::Release);
        }
    }

    fn set_source(&mut self, source: TrackSource) {
        self.source = source;
        self.read_head = 0.0;
        self.stretcher.reset();
    }

    fn silence_tails(&mut self) {
        self.delay.clear();
        self.reverb.clear();
    }
}

/// Everything a deck shares with the render callback.
pub(crate) struct DeckNodes {
    pub(crate) deck: DeckId,
    pub(crate) params: Arc<DeckParams>,
    pub(crate) processor: Mutex<DeckProcessor>,
    pub(crate) tap: Mutex<AnalysisTap>,
}

/// Builds the fixed processing chain for a deck.
pub fn build_deck_graph(
    deck: DeckId,
    sample_rate: u32,
    params: Arc<DeckParams>,
    reverb_seed: Option<u64>,
) -> Result<DeckGraph, GraphBuildError> {
    if sample_rate < 1_000 {
        return Err(GraphBuildError::InvalidSampleRate(sample_rate));
    }
    let fs = sample_rate as f32;
    let eq = EqStage::new(fs, params.eq().clamped()).map_err(|e| GraphBuildError::NodeConstruction {
        node: "eq",
        reason: e.to_string(),
    })?;
    let mut impulse = reverb::generate_impulse(sample_rate, reverb_seed);
    impulse.normalize();
    let reverb = ConvolutionReverb::new(&impulse, REVERB_BLOCK_SIZE).ok_or_else(|| GraphBuildError::NodeConstruction {
        node: "reverb",
        reason: "empty impulse response".to_string(),
    })?;
    let delay = FeedbackDelay::new(
        fs,
        params.delay_time_secs.load(Ordering::Relaxed),
        params.delay_feedback.load(Ordering::Relaxed),
    );
    let stretcher = TempoStretcher::new(sample_rate);

    log::info!(
        "Deck {}: Built audio graph at {} Hz (reverb {} samples)",
        deck,
        sample_rate,
        impulse.len()
    );
    Ok(DeckGraph {
        nodes: Arc::new(DeckNodes {
            deck,
            params,
            processor: Mutex::new(DeckProcessor {
                source: TrackSource::default(),
                eq,
                filter: ResonantFilter::new(fs),
                reverb,
                delay,
                stretcher,
                read_head: 0.0,
                seek_fade: None,
            }),
            tap: Mutex::new(AnalysisTap::new()),
        }),
        sample_rate,
        disposed: false,
    })
}

/// A deck's audio graph, owned by its deck controller.
pub struct DeckGraph {
    nodes: Arc<DeckNodes>,
    sample_rate: u32,
    disposed: bool,
}

impl DeckGraph {
    pub fn params(&self) -> &DeckParams {
        &self.nodes.params
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn nodes(&self) -> Arc<DeckNodes> {
        self.nodes.clone()
    }

    /// Installs a freshly loaded track with the head at zero.
    pub fn set_source(&self, samples: Arc<Vec<f32>>) {
        let params = self.params();
        params.playing.store(false, Ordering::Relaxed);
        params.ended.store(false, Ordering::Relaxed);
        params.read_head.store(0.0, Ordering::Release);
        params.pending_seek.store(NO_SEEK, Ordering::Release);
        let mut processor = self.nodes.processor.lock().unwrap_or_else(PoisonError::into_inner);
        processor.set_source(TrackSource::new(samples));
    }

    pub fn clear_source(&self) {
        self.set_source(Arc::new(Vec::new()));
        let mut processor = self.nodes.processor.lock().unwrap_or_else(PoisonError::into_inner);
        processor.silence_tails();
        drop(processor);
        self.nodes.tap.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn set_playing(&self, playing: bool) {
        self.params().playing.store(playing, Ordering::Relaxed);
    }

    pub fn take_ended(&self) -> bool {
        self.params().ended.swap(false, Ordering::AcqRel)
    }

    pub fn position_secs(&self) -> f64 {
        self.params().position_samples() / self.sample_rate as f64
    }

    pub fn seek_secs(&self, position_secs: f64) {
        self.params().request_seek(position_secs * self.sample_rate as f64);
    }

    pub fn level(&self) -> f32 {
        self.nodes.tap.lock().unwrap_or_else(PoisonError::into_inner).rms()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Tears the graph down once; later calls are no-ops.
    pub fn dispose(&mut self, mixer: &MixerGraph) {
        if self.disposed {
            return;
        }
        self.clear_source();
        mixer.detach(self.nodes.deck);
        self.disposed = true;
        log::info!("Deck {}: Audio graph disposed", self.nodes.deck);
    }
}

// --- Mixer Graph ---

/// Channel buses → volume → crossfader gain → master.
pub struct MixerGraph {
    sample_rate: u32,
    params: [Arc<DeckParams>; 2],
    channels: [Mutex<Option<Arc<DeckNodes>>>; 2],
    scratch: Mutex<Vec<[f32; 2]>>,
}

impl MixerGraph {
    pub fn new(sample_rate: u32) -> Self {
        MixerGraph {
            sample_rate,
            params: [Arc::new(DeckParams::default()), Arc::new(DeckParams::default())],
            channels: [Mutex::new(None), Mutex::new(None)],
            scratch: Mutex::new(Vec::new()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn params(&self, deck: DeckId) -> Arc<DeckParams> {
        self.params[deck.index()].clone()
    }

    pub fn attach(&self, deck: DeckId, graph: &DeckGraph) {
        *self.channels[deck.index()].lock().unwrap_or_else(PoisonError::into_inner) = Some(graph.nodes());
        log::debug!("Mixer: Deck {} attached to master bus", deck);
    }

    pub fn detach(&self, deck: DeckId) {
        *self.channels[deck.index()].lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_attached(&self, deck: DeckId) -> bool {
        self.channels[deck.index()].lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Renders interleaved output with `channels` per frame.
    pub fn render(&self, output: &mut [f32], channels: usize) {
        output.fill(0.0);
        if channels == 0 {
            return;
        }
        let frames = output.len() / channels;
        let mut scratch = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        scratch.resize(frames, [0.0; 2]);

        for slot in &self.channels {
            let nodes = match slot.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
                Some(nodes) => nodes.clone(),
                None => continue,
            };
            scratch.iter_mut().for_each(|f| *f = [0.0; 2]);
            {
                let mut processor = nodes.processor.lock().unwrap_or_else(PoisonError::into_inner);
                processor.render(nodes.deck, &nodes.params, &nodes.tap, &mut scratch[..]);
            }
            let gain = nodes.params.volume.load(Ordering::Relaxed).clamp(0.0, 1.0)
                * nodes.params.crossfader_gain.load(Ordering::Relaxed);

            for (frame_out, frame) in output.chunks_mut(channels).zip(scratch.iter()) {
                if channels == 1 {
                    frame_out[0] += (frame[0] + frame[1]) * 0.5 * gain;
                } else {
                    frame_out[0] += frame[0] * gain;
                    frame_out[1] += frame[1] * gain;
                }
            }
        }
        log::trace!("Mixer: Rendered {} frames", frames);
    }
}
