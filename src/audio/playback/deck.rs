use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::audio::analysis::beat_grid::BeatGrid;
use crate::audio::analysis::bpm_analyzer;
use crate::audio::config::{
    EngineConfig, BEAT_PULSE_MS, JOG_ROTATIONS_PER_TRACK, JOG_SCRUB_DIVISOR,
};
use crate::audio::errors::{BpmError, DeckError, GraphBuildError, LoadError};
use crate::audio::fetch::AudioFetcher;
use crate::audio::graph::{self, DeckGraph, MixerGraph};
use crate::audio::types::{DeckId, DeckSnapshot, LoopRegion, Track, TransportState};

use super::events::{emit_deck_update, emit_error_event, EngineEvent, EventSink, NowPlaying, NowPlayingSink};
use super::loader::{self, LoadedAudio};
use super::state::CancelFlag;

/// Results of a deck's background work, fed back into the engine loop.
#[derive(Debug)]
pub(crate) enum TaskCompletion {
    Loaded {
        deck: DeckId,
        generation: u64,
        result: Result<LoadedAudio, LoadError>,
    },
    Tempo {
        deck: DeckId,
        generation: u64,
        result: Result<f32, BpmError>,
    },
}

/// Background work of a deck. Stopping it aborts the async task and raises
/// the flag the blocking worker polls.
struct PendingTask {
    handle: JoinHandle<()>,
    cancel: CancelFlag,
}

impl PendingTask {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Collaborators shared by both decks.
#[derive(Clone)]
pub(crate) struct DeckContext {
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) now_playing: Arc<dyn NowPlayingSink>,
    pub(crate) fetcher: Arc<dyn AudioFetcher>,
    pub(crate) mixer: Arc<MixerGraph>,
    pub(crate) completions: mpsc::UnboundedSender<TaskCompletion>,
    /// Fixed impulse-response seed; `None` draws a fresh one per graph.
    pub(crate) reverb_seed: Option<u64>,
}

/// Transport state machine of one deck.
pub(crate) struct DeckController {
    id: DeckId,
    config: EngineConfig,
    ctx: DeckContext,
    graph: Option<DeckGraph>,
    /// Set once graph construction failed; the deck never recovers.
    failure: Option<String>,
    state: TransportState,
    track: Option<Arc<Track>>,
    audio: Option<Arc<Vec<f32>>>,
    duration_secs: f64,
    original_bpm: Option<f32>,
    beat_grid: Option<BeatGrid>,
    playback_rate: f32,
    sync_engaged: bool,
    quantize: bool,
    loop_region: LoopRegion,
    cue_point: f64,
    delete_modifier: bool,
    generation: u64,
    load_task: Option<PendingTask>,
    tempo_task: Option<PendingTask>,
    last_beat_index: Option<i64>,
    pulse_until: Option<Instant>,
    scrub_resume: Option<bool>,
}

impl DeckController {
    pub(crate) fn new(id: DeckId, config: EngineConfig, ctx: DeckContext) -> Self {
        DeckController {
            id,
            config,
            ctx,
            graph: None,
            failure: None,
            state: TransportState::Empty,
            track: None,
            audio: None,
            duration_secs: 0.0,
            original_bpm: None,
            beat_grid: None,
            playback_rate: 1.0,
            sync_engaged: false,
            quantize: false,
            loop_region: LoopRegion::default(),
            cue_point: 0.0,
            delete_modifier: false,
            generation: 0,
            load_task: None,
            tempo_task: None,
            last_beat_index: None,
            pulse_until: None,
            scrub_resume: None,
        }
    }

    // --- Accessors ---

    #[cfg(test)]
    pub(crate) fn state(&self) -> TransportState {
        self.state
    }

    pub(crate) fn original_bpm(&self) -> Option<f32> {
        self.original_bpm
    }

    pub(crate) fn playback_rate(&self) -> f32 {
        self.playback_rate
    }

    pub(crate) fn current_bpm(&self) -> Option<f32> {
        self.original_bpm.map(|bpm| bpm * self.playback_rate)
    }

    pub(crate) fn is_sync_engaged(&self) -> bool {
        self.sync_engaged
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn position_secs(&self) -> f64 {
        match (&self.graph, &self.audio) {
            (Some(graph), Some(_)) => graph.position_secs().clamp(0.0, self.duration_secs),
            _ => 0.0,
        }
    }

    /// Channel RMS from the analysis tap, whatever the transport state.
    pub(crate) fn level(&self) -> f32 {
        self.graph.as_ref().map(DeckGraph::level).unwrap_or(0.0)
    }

    fn jog_angle_deg(&self, position_secs: f64) -> f64 {
        if self.duration_secs <= 0.0 {
            return 0.0;
        }
        position_secs / self.duration_secs * 360.0 * JOG_ROTATIONS_PER_TRACK
    }

    pub(crate) fn snapshot(&self) -> DeckSnapshot {
        let position_secs = self.position_secs();
        DeckSnapshot {
            deck: self.id,
            state: self.state,
            track: self.track.as_ref().map(|t| t.summary()),
            position_secs,
            duration_secs: self.duration_secs,
            playback_rate: self.playback_rate,
            master_tempo: self.ctx.mixer.params(self.id).master_tempo.load(Ordering::Relaxed),
            original_bpm: self.original_bpm,
            current_bpm: self.current_bpm(),
            sync_engaged: self.sync_engaged,
            quantize: self.quantize,
            loop_region: self.loop_region,
            cue_point: self.cue_point,
            hotcues: self.track.as_ref().map(|t| Vec::from(t.hotcues())).unwrap_or_default(),
            jog_angle_deg: self.jog_angle_deg(position_secs),
            beat_pulse: self.pulse_until.is_some(),
        }
    }

    fn publish(&self) {
        emit_deck_update(self.ctx.events.as_ref(), self.snapshot());
    }

    fn notify_now_playing(&self, is_playing: bool) {
        self.ctx.now_playing.update(NowPlaying {
            deck: self.id,
            track: self.track.as_ref().map(|t| t.summary()),
            is_playing,
        });
    }

    fn loaded_graph(&self) -> Result<&DeckGraph, DeckError> {
        if let Some(reason) = &self.failure {
            return Err(DeckError::GraphFailed {
                deck: self.id,
                reason: reason.clone(),
            });
        }
        match (&self.graph, &self.audio) {
            (Some(graph), Some(_)) => Ok(graph),
            _ => Err(DeckError::NoTrackLoaded { deck: self.id }),
        }
    }

    fn quantized(&self, position_secs: f64) -> f64 {
        match (&self.beat_grid, self.quantize) {
            (Some(grid), true) => grid.nearest_beat(position_secs).min(self.duration_secs),
            _ => position_secs,
        }
    }

    // --- Loading ---

    fn cancel_pending(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.stop();
            log::debug!("Deck {}: Cancelled in-flight load", self.id);
        }
        if let Some(task) = self.tempo_task.take() {
            task.stop();
            log::debug!("Deck {}: Cancelled in-flight tempo estimation", self.id);
        }
    }

    fn reset_transport(&mut self) {
        self.audio = None;
        self.duration_secs = 0.0;
        self.original_bpm = None;
        self.beat_grid = None;
        self.sync_engaged = false;
        self.loop_region = LoopRegion::default();
        self.cue_point = 0.0;
        self.last_beat_index = None;
        self.pulse_until = None;
        self.scrub_resume = None;
    }

    fn rebuild_beat_grid(&mut self) {
        self.beat_grid = self
            .original_bpm
            .and_then(|bpm| BeatGrid::new(bpm, self.duration_secs));
        self.last_beat_index = None;
    }

    /// Starts loading `track`, superseding any load in flight.
    pub(crate) fn load(&mut self, track: Arc<Track>) -> Result<(), DeckError> {
        if let Some(reason) = &self.failure {
            return Err(DeckError::GraphFailed {
                deck: self.id,
                reason: reason.clone(),
            });
        }
        self.cancel_pending();
        self.generation += 1;
        if let Some(graph) = &self.graph {
            graph.clear_source();
        }
        self.reset_transport();
        self.original_bpm = track.known_bpm.filter(|bpm| bpm.is_finite() && *bpm > 0.0);
        self.track = Some(track.clone());
        self.state = TransportState::Loading;
        log::info!(
            "Deck {}: Loading '{}' from {} (generation {})",
            self.id,
            track.title,
            track.url,
            self.generation
        );
        self.publish();
        self.notify_now_playing(false);

        let deck = self.id;
        let generation = self.generation;
        let fetcher = self.ctx.fetcher.clone();
        let completions = self.ctx.completions.clone();
        let target_rate = self.ctx.mixer.sample_rate();
        let locator = track.url.clone();
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = loader::load_audio(fetcher, locator, target_rate, worker_cancel).await;
            if completions
                .send(TaskCompletion::Loaded { deck, generation, result })
                .is_err()
            {
                log::debug!("Deck {}: Engine gone before load completed", deck);
            }
        });
        self.load_task = Some(PendingTask { handle, cancel });
        Ok(())
    }

    fn ensure_graph(&mut self) -> Result<(), GraphBuildError> {
        if self.graph.is_some() {
            return Ok(());
        }
        let graph = graph::build_deck_graph(
            self.id,
            self.ctx.mixer.sample_rate(),
            self.ctx.mixer.params(self.id),
            self.ctx.reverb_seed,
        )?;
        self.ctx.mixer.attach(self.id, &graph);
        self.graph = Some(graph);
        Ok(())
    }

    pub(crate) fn finish_load(&mut self, generation: u64, result: Result<LoadedAudio, LoadError>) {
        if generation != self.generation {
            log::debug!(
                "Deck {}: Discarding stale load result (generation {}, current {})",
                self.id,
                generation,
                self.generation
            );
            return;
        }
        self.load_task = None;

        let audio = match result {
            Ok(audio) => audio,
            Err(e) if e.is_cancelled() => {
                log::debug!("Deck {}: Load cancelled", self.id);
                return;
            }
            Err(e) => {
                log::error!("Deck {}: Load failed: {}", self.id, e);
                emit_error_event(self.ctx.events.as_ref(), self.id, &e.to_string());
                self.reset_transport();
                self.track = None;
                self.state = TransportState::Empty;
                self.publish();
                self.notify_now_playing(false);
                return;
            }
        };

        if let Err(e) = self.ensure_graph() {
            log::error!("Deck {}: Audio graph construction failed: {}", self.id, e);
            emit_error_event(self.ctx.events.as_ref(), self.id, &e.to_string());
            self.failure = Some(e.to_string());
            self.reset_transport();
            self.track = None;
            self.state = TransportState::Failed;
            self.publish();
            self.notify_now_playing(false);
            return;
        }
        let Some(graph) = &self.graph else {
            return;
        };
        graph.set_source(audio.samples.clone());
        self.duration_secs = audio.duration_secs();
        self.audio = Some(audio.samples.clone());
        self.rebuild_beat_grid();
        self.state = TransportState::Ready;
        log::info!(
            "Deck {}: Ready, {:.2}s{}",
            self.id,
            self.duration_secs,
            self.original_bpm
                .map(|bpm| format!(", provided BPM {:.1}", bpm))
                .unwrap_or_default()
        );

        let deck = self.id;
        let completions = self.ctx.completions.clone();
        let samples = audio.samples.clone();
        let sample_rate = audio.sample_rate;
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = bpm_analyzer::estimate_bpm_detached(samples, sample_rate, worker_cancel).await;
            if completions
                .send(TaskCompletion::Tempo { deck, generation, result })
                .is_err()
            {
                log::debug!("Deck {}: Engine gone before tempo estimation completed", deck);
            }
        });
        self.tempo_task = Some(PendingTask { handle, cancel });

        self.publish();
        if self.config.auto_play {
            if let Err(e) = self.play() {
                log::warn!("Deck {}: Auto-play failed: {}", self.id, e);
            }
        }
    }

    /// Applies a tempo estimate. Returns whether the deck's BPM changed.
    pub(crate) fn finish_tempo(&mut self, generation: u64, result: Result<f32, BpmError>) -> bool {
        if generation != self.generation {
            log::debug!("Deck {}: Discarding stale tempo estimate (generation {})", self.id, generation);
            return false;
        }
        self.tempo_task = None;
        match result {
            Ok(bpm) => {
                log::info!("BPM: Deck {} estimated {:.1}", self.id, bpm);
                self.original_bpm = Some(bpm);
                self.rebuild_beat_grid();
                self.publish();
                true
            }
            Err(e) => {
                match self.original_bpm {
                    Some(bpm) => log::warn!(
                        "BPM: Deck {} estimation failed ({}); keeping provided {:.1}",
                        self.id,
                        e,
                        bpm
                    ),
                    None => log::warn!(
                        "BPM: Deck {} estimation failed ({}); beat features disabled",
                        self.id,
                        e
                    ),
                }
                false
            }
        }
    }

    // --- Transport ---

    pub(crate) fn play(&mut self) -> Result<(), DeckError> {
        let graph = self.loaded_graph()?;
        if self.state == TransportState::Playing {
            return Ok(());
        }
        graph.set_playing(true);
        self.state = TransportState::Playing;
        log::debug!("Deck {}: Play", self.id);
        self.publish();
        self.notify_now_playing(true);
        Ok(())
    }

    pub(crate) fn pause(&mut self) -> Result<(), DeckError> {
        let graph = self.loaded_graph()?;
        if self.state != TransportState::Playing {
            return Ok(());
        }
        graph.set_playing(false);
        self.state = TransportState::Paused;
        log::debug!("Deck {}: Pause", self.id);
        self.publish();
        self.notify_now_playing(false);
        Ok(())
    }

    /// Unloads the deck and frees its now-playing slot.
    pub(crate) fn stop(&mut self) {
        self.cancel_pending();
        self.generation += 1;
        if let Some(graph) = &self.graph {
            graph.clear_source();
        }
        let had_track = self.track.take().is_some();
        self.reset_transport();
        if self.failure.is_none() {
            self.state = TransportState::Empty;
        }
        log::info!("Deck {}: Stopped", self.id);
        self.publish();
        if had_track {
            self.notify_now_playing(false);
        }
    }

    pub(crate) fn seek(&mut self, position_secs: f64) -> Result<(), DeckError> {
        let graph = self.loaded_graph()?;
        let target = position_secs.clamp(0.0, self.duration_secs);
        graph.seek_secs(target);
        log::debug!("Deck {}: Seek to {:.3}s", self.id, target);
        Ok(())
    }

    pub(crate) fn set_cue(&mut self) -> Result<(), DeckError> {
        self.loaded_graph()?;
        self.cue_point = self.quantized(self.position_secs());
        log::debug!("Deck {}: Cue set at {:.3}s", self.id, self.cue_point);
        self.publish();
        Ok(())
    }

    pub(crate) fn go_to_cue(&mut self) -> Result<(), DeckError> {
        self.seek(self.cue_point)?;
        self.pause()?;
        self.publish();
        Ok(())
    }

    // --- Loops ---

    pub(crate) fn loop_in(&mut self) -> Result<(), DeckError> {
        self.loaded_graph()?;
        let start = self.quantized(self.position_secs());
        self.loop_region = LoopRegion {
            start: Some(start),
            end: None,
            active: false,
        };
        log::debug!("Deck {}: Loop in at {:.3}s", self.id, start);
        self.publish();
        Ok(())
    }

    pub(crate) fn loop_out(&mut self) -> Result<(), DeckError> {
        self.loaded_graph()?;
        let Some(start) = self.loop_region.start else {
            log::debug!("Deck {}: Loop out ignored, no loop start", self.id);
            return Ok(());
        };
        let end = self.quantized(self.position_secs());
        if end <= start {
            return Err(DeckError::LoopEndBeforeStart {
                deck: self.id,
                start,
                end,
            });
        }
        self.loop_region.end = Some(end);
        self.loop_region.active = true;
        log::debug!("Deck {}: Loop {:.3}s..{:.3}s active", self.id, start, end);
        self.publish();
        Ok(())
    }

    pub(crate) fn exit_loop(&mut self) -> Result<(), DeckError> {
        self.loaded_graph()?;
        self.loop_region.active = false;
        self.publish();
        Ok(())
    }

    pub(crate) fn beat_jump(&mut self, beats: f64) -> Result<(), DeckError> {
        self.loaded_graph()?;
        let Some(bpm) = self.original_bpm else {
            log::debug!("Deck {}: Beat jump ignored, tempo unknown", self.id);
            return Ok(());
        };
        let target = self.position_secs() + beats * 60.0 / bpm as f64;
        self.seek(target)
    }

    // --- Hotcues ---

    pub(crate) fn set_delete_modifier(&mut self, held: bool) {
        self.delete_modifier = held;
    }

    pub(crate) fn hotcue(&mut self, pad: u8) -> Result<(), DeckError> {
        let max = self.config.hotcue_pads;
        if pad == 0 || pad > max {
            return Err(DeckError::InvalidPad { deck: self.id, pad, max });
        }
        let track = self
            .track
            .clone()
            .ok_or(DeckError::NoTrackLoaded { deck: self.id })?;

        if self.delete_modifier && track.hotcues().get(pad).is_some() {
            track.update_hotcues(|cues| cues.remove(pad));
            log::info!("Deck {}: Hotcue {} deleted", self.id, pad);
            self.publish();
            return Ok(());
        }

        self.loaded_graph()?;
        match track.hotcues().get(pad) {
            Some(cue) => {
                self.seek(cue.time_offset_seconds)?;
                self.play()?;
            }
            None => {
                let time = self.quantized(self.position_secs());
                track.update_hotcues(|cues| cues.set(pad, time));
                log::info!("Deck {}: Hotcue {} set at {:.3}s", self.id, pad, time);
            }
        }
        self.publish();
        Ok(())
    }

    // --- Tempo ---

    pub(crate) fn set_quantize(&mut self, enabled: bool) {
        self.quantize = enabled;
        self.publish();
    }

    pub(crate) fn set_master_tempo(&mut self, enabled: bool) {
        self.ctx
            .mixer
            .params(self.id)
            .master_tempo
            .store(enabled, Ordering::Relaxed);
        self.publish();
    }

    /// Manual rate change; always disengages sync.
    pub(crate) fn set_playback_rate(&mut self, rate: f32) {
        if self.sync_engaged {
            log::info!("Deck {}: Sync disengaged by manual rate change", self.id);
        }
        self.sync_engaged = false;
        self.apply_rate(rate);
    }

    pub(crate) fn reset_rate(&mut self) {
        self.set_playback_rate(1.0);
    }

    /// Rate change driven by sync; leaves the engaged flag alone.
    pub(crate) fn apply_rate(&mut self, rate: f32) {
        let rate = if rate.is_finite() { rate } else { 1.0 };
        self.playback_rate = rate.clamp(self.config.rate_min, self.config.rate_max);
        self.ctx
            .mixer
            .params(self.id)
            .playback_rate
            .store(self.playback_rate, Ordering::Relaxed);
        self.publish();
    }

    pub(crate) fn set_sync_engaged(&mut self, engaged: bool) {
        self.sync_engaged = engaged;
        self.publish();
    }

    // --- Jog Wheel ---

    pub(crate) fn scrub_begin(&mut self) -> Result<(), DeckError> {
        self.loaded_graph()?;
        if self.scrub_resume.is_none() {
            let was_playing = self.state == TransportState::Playing;
            self.scrub_resume = Some(was_playing);
            if was_playing {
                self.pause()?;
            }
        }
        Ok(())
    }

    pub(crate) fn scrub(&mut self, dx: f64) -> Result<(), DeckError> {
        self.loaded_graph()?;
        let target = self.position_secs() + dx / JOG_SCRUB_DIVISOR * self.duration_secs;
        self.seek(target)?;
        self.publish();
        Ok(())
    }

    pub(crate) fn scrub_end(&mut self) -> Result<(), DeckError> {
        match self.scrub_resume.take() {
            Some(true) => self.play(),
            _ => Ok(()),
        }
    }

    // --- Position Tick ---

    /// Drives end-of-track, loop boundaries and the beat pulse.
    pub(crate) fn on_tick(&mut self, now: Instant) {
        if self.pulse_until.is_some_and(|until| now >= until) {
            self.pulse_until = None;
        }
        let Some(graph) = &self.graph else {
            return;
        };
        if graph.take_ended() && self.audio.is_some() {
            log::info!("Deck {}: Reached end of track", self.id);
            self.stop();
            return;
        }
        if self.state != TransportState::Playing {
            return;
        }

        let mut position = self.position_secs();
        if let LoopRegion {
            start: Some(start),
            end: Some(end),
            active: true,
        } = self.loop_region
        {
            if position >= end {
                graph.seek_secs(start);
                position = start;
                log::trace!("Deck {}: Loop wrapped to {:.3}s", self.id, start);
            }
        }

        if let Some(grid) = &self.beat_grid {
            let index = grid.beat_index(position);
            if self.last_beat_index != Some(index) {
                self.last_beat_index = Some(index);
                self.pulse_until = Some(now + Duration::from_millis(BEAT_PULSE_MS));
                self.ctx.events.emit(EngineEvent::BeatPulse {
                    deck: self.id,
                    beat_index: index,
                });
            }
        }

        self.ctx.events.emit(EngineEvent::Tick {
            deck: self.id,
            position_secs: position,
            jog_angle_deg: self.jog_angle_deg(position),
        });
    }

    /// Releases the graph; the controller is unusable afterwards.
    pub(crate) fn dispose(&mut self) {
        self.cancel_pending();
        if let Some(graph) = self.graph.as_mut() {
            graph.dispose(&self.ctx.mixer);
        }
    }
}
