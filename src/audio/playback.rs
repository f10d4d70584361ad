use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::audio::config::EngineConfig;
use crate::audio::errors::DeckError;
use crate::audio::fetch::AudioFetcher;
use crate::audio::graph::MixerGraph;
use crate::audio::output::OutputDevice;
use crate::audio::types::DeckId;

pub mod commands;
pub(crate) mod deck;
pub mod events;
pub mod loader;
pub mod mixer;
pub mod state;
pub(crate) mod sync;
pub(crate) mod time;

use commands::{EngineCommand, EngineSnapshot};
use deck::{DeckContext, DeckController, TaskCompletion};
use events::{emit_error_event, EventSink, NowPlayingSink};
use mixer::MixerController;

// --- Engine State ---

/// Everything the engine thread owns. Driven by the loop in
/// [`run_engine_loop`]; testable without an output device.
pub(crate) struct Engine {
    decks: [DeckController; 2],
    mixer: MixerController,
    graph: Arc<MixerGraph>,
    events: Arc<dyn EventSink>,
    /// Renders into a scratch buffer on each tick when no device pulls audio.
    headless: Option<HeadlessClock>,
}

struct HeadlessClock {
    last: Option<Instant>,
    buffer: Vec<f32>,
}

impl Engine {
    pub(crate) fn new(config: EngineConfig, graph: Arc<MixerGraph>, ctx: DeckContext, headless: bool) -> Self {
        let events = ctx.events.clone();
        let decks = [
            DeckController::new(DeckId::A, config.clone(), ctx.clone()),
            DeckController::new(DeckId::B, config, ctx),
        ];
        Engine {
            decks,
            mixer: MixerController::new(graph.clone()),
            graph,
            events,
            headless: headless.then(|| HeadlessClock {
                last: None,
                buffer: Vec::new(),
            }),
        }
    }

    fn deck_mut(&mut self, deck: DeckId) -> &mut DeckController {
        &mut self.decks[deck.index()]
    }

    fn report(&self, deck: DeckId, result: Result<(), DeckError>) {
        if let Err(e) = result {
            log::warn!("Engine: {}", e);
            emit_error_event(self.events.as_ref(), deck, &e.to_string());
        }
    }

    fn publish_mixer(&self) {
        self.events.emit(self.mixer.update_event());
    }

    /// Applies one command. Returns `false` once the engine should stop.
    pub(crate) fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Load { deck, track } => {
                let result = self.deck_mut(deck).load(track);
                self.report(deck, result);
                sync::propagate_sync(&mut self.decks);
            }
            EngineCommand::Play(deck) => {
                let result = self.deck_mut(deck).play();
                self.report(deck, result);
            }
            EngineCommand::Pause(deck) => {
                let result = self.deck_mut(deck).pause();
                self.report(deck, result);
            }
            EngineCommand::Stop(deck) => {
                self.deck_mut(deck).stop();
            }
            EngineCommand::Seek { deck, position_secs } => {
                let result = self.deck_mut(deck).seek(position_secs);
                self.report(deck, result);
            }
            EngineCommand::SetCue(deck) => {
                let result = self.deck_mut(deck).set_cue();
                self.report(deck, result);
            }
            EngineCommand::GoToCue(deck) => {
                let result = self.deck_mut(deck).go_to_cue();
                self.report(deck, result);
            }
            EngineCommand::LoopIn(deck) => {
                let result = self.deck_mut(deck).loop_in();
                self.report(deck, result);
            }
            EngineCommand::LoopOut(deck) => {
                let result = self.deck_mut(deck).loop_out();
                self.report(deck, result);
            }
            EngineCommand::ExitLoop(deck) => {
                let result = self.deck_mut(deck).exit_loop();
                self.report(deck, result);
            }
            EngineCommand::BeatJump { deck, beats } => {
                let result = self.deck_mut(deck).beat_jump(beats);
                self.report(deck, result);
            }
            EngineCommand::Hotcue { deck, pad } => {
                let result = self.deck_mut(deck).hotcue(pad);
                self.report(deck, result);
            }
            EngineCommand::SetDeleteModifier { deck, held } => {
                self.deck_mut(deck).set_delete_modifier(held);
            }
            EngineCommand::SetQuantize { deck, enabled } => {
                self.deck_mut(deck).set_quantize(enabled);
            }
            EngineCommand::SetMasterTempo { deck, enabled } => {
                self.deck_mut(deck).set_master_tempo(enabled);
            }
            EngineCommand::SetPlaybackRate { deck, rate } => {
                self.deck_mut(deck).set_playback_rate(rate);
                sync::propagate_sync(&mut self.decks);
            }
            EngineCommand::ResetRate(deck) => {
                self.deck_mut(deck).reset_rate();
                sync::propagate_sync(&mut self.decks);
            }
            EngineCommand::ToggleSync(deck) => {
                let result = sync::toggle_sync(&mut self.decks, deck);
                self.report(deck, result);
            }
            EngineCommand::ScrubBegin(deck) => {
                let result = self.deck_mut(deck).scrub_begin();
                self.report(deck, result);
            }
            EngineCommand::Scrub { deck, dx } => {
                let result = self.deck_mut(deck).scrub(dx);
                self.report(deck, result);
            }
            EngineCommand::ScrubEnd(deck) => {
                let result = self.deck_mut(deck).scrub_end();
                self.report(deck, result);
            }
            EngineCommand::SetEq { deck, band, gain_db } => {
                self.mixer.set_eq(deck, band, gain_db);
                self.publish_mixer();
            }
            EngineCommand::SetFilter { deck, position } => {
                self.mixer.set_filter(deck, position);
                self.publish_mixer();
            }
            EngineCommand::SetVolume { deck, volume } => {
                self.mixer.set_volume(deck, volume);
                self.publish_mixer();
            }
            EngineCommand::SetCrossfader(position) => {
                self.mixer.set_crossfader(position);
                self.publish_mixer();
            }
            EngineCommand::SetReverbSend { deck, level } => self.mixer.set_reverb_send(deck, level),
            EngineCommand::SetDelaySend { deck, level } => self.mixer.set_delay_send(deck, level),
            EngineCommand::SetDelayTime { deck, secs } => self.mixer.set_delay_time(deck, secs),
            EngineCommand::SetDelayFeedback { deck, feedback } => {
                self.mixer.set_delay_feedback(deck, feedback)
            }
            EngineCommand::ResetChannel(deck) => {
                self.mixer.reset_channel(deck);
                self.publish_mixer();
            }
            EngineCommand::Snapshot(reply) => {
                if reply.send(self.snapshot()).is_err() {
                    log::debug!("Engine: Snapshot requester went away");
                }
            }
            EngineCommand::Shutdown(done) => {
                log::info!("Engine: Shutdown received. Cleaning up decks.");
                self.shutdown();
                if done.send(()).is_err() {
                    log::error!("Engine: Failed to send shutdown completion signal.");
                }
                return false;
            }
        }
        true
    }

    pub(crate) fn handle_completion(&mut self, completion: TaskCompletion) {
        match completion {
            TaskCompletion::Loaded { deck, generation, result } => {
                self.deck_mut(deck).finish_load(generation, result);
            }
            TaskCompletion::Tempo { deck, generation, result } => {
                if self.deck_mut(deck).finish_tempo(generation, result) {
                    sync::propagate_sync(&mut self.decks);
                }
            }
        }
    }

    pub(crate) fn on_tick(&mut self, now: Instant) {
        if let Some(clock) = self.headless.as_mut() {
            if let Some(last) = clock.last {
                let frames = (now.saturating_duration_since(last).as_secs_f64()
                    * self.graph.sample_rate() as f64) as usize;
                clock.buffer.resize(frames * 2, 0.0);
                self.graph.render(&mut clock.buffer, 2);
            }
            clock.last = Some(now);
        }
        time::process_time_slice_updates(&mut self.decks, now);
    }

    pub(crate) fn on_meter(&self) {
        time::process_meter_updates(&self.decks, &self.mixer, self.events.as_ref());
    }

    pub(crate) fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            decks: self.decks.iter().map(DeckController::snapshot).collect(),
            channels: DeckId::ALL.iter().map(|d| self.mixer.controls(*d)).collect(),
            sends: DeckId::ALL.iter().map(|d| self.mixer.sends(*d)).collect(),
            crossfader: self.mixer.crossfader(),
            levels: self.mixer.levels([self.decks[0].level(), self.decks[1].level()]),
            sample_rate: self.graph.sample_rate(),
        }
    }

    fn shutdown(&mut self) {
        for deck in self.decks.iter_mut() {
            deck.dispose();
        }
    }
}

// --- Engine Thread ---

/// Command/tick/meter loop; returns after shutdown or when every handle is dropped.
pub(crate) async fn run_engine_loop(
    mut engine: Engine,
    mut receiver: mpsc::Receiver<EngineCommand>,
    mut completions: mpsc::UnboundedReceiver<TaskCompletion>,
    config: &EngineConfig,
) {
    log::info!("Engine: Entering main loop.");
    let mut tick_interval = tokio::time::interval(Duration::from_millis(config.tick_interval_ms));
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut meter_interval = tokio::time::interval(Duration::from_millis(config.meter_interval_ms));
    meter_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_command = receiver.recv() => {
                match maybe_command {
                    Some(command) => {
                        log::trace!("Engine Received: {:?}", command);
                        if !engine.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        log::info!("Engine: Command channel closed. Exiting loop.");
                        engine.shutdown();
                        break;
                    }
                }
            }
            Some(completion) = completions.recv() => {
                engine.handle_completion(completion);
            }
            _ = tick_interval.tick() => {
                engine.on_tick(Instant::now());
            }
            _ = meter_interval.tick() => {
                engine.on_meter();
            }
        }
    }
    log::info!("Engine: Loop finished.");
}

/// Body of the dedicated engine thread.
pub fn run_engine_thread(
    config: EngineConfig,
    receiver: mpsc::Receiver<EngineCommand>,
    events: Arc<dyn EventSink>,
    now_playing: Arc<dyn NowPlayingSink>,
    fetcher: Arc<dyn AudioFetcher>,
) {
    log::info!("Engine: Starting...");

    let (graph, stream) = match OutputDevice::open_default(config.sample_rate) {
        Ok(device) => {
            let graph = Arc::new(MixerGraph::new(device.sample_rate()));
            match device.start(graph.clone()) {
                Ok(stream) => (graph, Some(stream)),
                Err(e) => {
                    log::warn!("Engine: {}; rendering headless at {} Hz", e, graph.sample_rate());
                    (graph, None)
                }
            }
        }
        Err(e) => {
            log::warn!("Engine: {}; rendering headless at {} Hz", e, config.sample_rate);
            (Arc::new(MixerGraph::new(config.sample_rate)), None)
        }
    };
    let headless = stream.is_none();

    log::info!("Engine: Building Tokio current_thread runtime...");
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Engine: Failed to build Tokio runtime: {}", e);
            return;
        }
    };

    rt.block_on(async move {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let ctx = DeckContext {
            events,
            now_playing,
            fetcher,
            mixer: graph.clone(),
            completions: completion_tx,
            reverb_seed: None,
        };
        let engine = Engine::new(config.clone(), graph, ctx, headless);
        run_engine_loop(engine, receiver, completion_rx, &config).await;
    });
    drop(stream);
    log::info!("Engine: Thread has stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    use crate::audio::playback::commands::EngineHandle;
    use crate::audio::playback::deck::tests::{quiet_wav, track, GatedFetcher, StaticFetcher, SR};
    use crate::audio::playback::events::tests::RecordingSink;
    use crate::audio::playback::events::EngineEvent;
    use crate::audio::types::TransportState;

    struct Rig {
        engine: Engine,
        sink: Arc<RecordingSink>,
        graph: Arc<MixerGraph>,
        completions: mpsc::UnboundedReceiver<TaskCompletion>,
    }

    fn rig(fetcher: Arc<dyn AudioFetcher>) -> Rig {
        let sink = Arc::new(RecordingSink::default());
        let graph = Arc::new(MixerGraph::new(SR));
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = DeckContext {
            events: sink.clone(),
            now_playing: sink.clone(),
            fetcher,
            mixer: graph.clone(),
            completions: tx,
            reverb_seed: Some(11),
        };
        let config = EngineConfig {
            sample_rate: SR,
            ..EngineConfig::default()
        };
        Rig {
            engine: Engine::new(config, graph.clone(), ctx, true),
            sink,
            graph,
            completions: rx,
        }
    }

    impl Rig {
        async fn drain(&mut self, count: usize) {
            for _ in 0..count {
                let completion = self.completions.recv().await.expect("completion");
                self.engine.handle_completion(completion);
            }
        }

        fn rate(&self, deck: DeckId) -> f32 {
            self.engine.snapshot().deck(deck).playback_rate
        }
    }

    async fn synced_rig() -> Rig {
        let mut rig = rig(Arc::new(StaticFetcher(quiet_wav(4.0, SR))));
        rig.engine.handle_command(EngineCommand::Load {
            deck: DeckId::A,
            track: track("a", Some(128.0)),
        });
        rig.engine.handle_command(EngineCommand::Load {
            deck: DeckId::B,
            track: track("b", Some(140.0)),
        });
        rig.drain(4).await;
        rig
    }

    #[tokio::test]
    async fn test_sync_matches_other_deck_tempo() {
        let mut rig = synced_rig().await;
        rig.engine.handle_command(EngineCommand::ToggleSync(DeckId::B));
        let snapshot = rig.engine.snapshot();
        assert!(snapshot.deck(DeckId::B).sync_engaged);
        assert!((snapshot.deck(DeckId::B).playback_rate - 0.914_286).abs() < 1e-5);
        assert!((snapshot.deck(DeckId::B).current_bpm.unwrap_or_default() - 128.0).abs() < 1e-3);

        // The follower tracks changes of the target's effective tempo.
        rig.engine.handle_command(EngineCommand::SetPlaybackRate {
            deck: DeckId::A,
            rate: 1.1,
        });
        assert!((rig.rate(DeckId::B) - 128.0 * 1.1 / 140.0).abs() < 1e-5);
        assert_eq!(rig.engine.snapshot().deck(DeckId::A).original_bpm, Some(128.0));
    }

    #[tokio::test]
    async fn test_manual_rate_disengages_sync() {
        let mut rig = synced_rig().await;
        rig.engine.handle_command(EngineCommand::ToggleSync(DeckId::B));
        rig.engine.handle_command(EngineCommand::SetPlaybackRate {
            deck: DeckId::B,
            rate: 1.02,
        });
        let snapshot = rig.engine.snapshot();
        assert!(!snapshot.deck(DeckId::B).sync_engaged);
        assert_eq!(snapshot.deck(DeckId::B).playback_rate, 1.02);

        rig.engine.handle_command(EngineCommand::SetPlaybackRate {
            deck: DeckId::A,
            rate: 1.2,
        });
        assert_eq!(rig.rate(DeckId::B), 1.02);
    }

    #[tokio::test]
    async fn test_only_one_deck_synced() {
        let mut rig = synced_rig().await;
        rig.engine.handle_command(EngineCommand::ToggleSync(DeckId::B));
        rig.engine.handle_command(EngineCommand::ToggleSync(DeckId::A));
        let snapshot = rig.engine.snapshot();
        assert!(snapshot.deck(DeckId::A).sync_engaged);
        assert!(!snapshot.deck(DeckId::B).sync_engaged);
        // A follows B's effective tempo, which still carries the old sync rate.
        let b_bpm = snapshot.deck(DeckId::B).current_bpm.unwrap_or_default();
        assert!((snapshot.deck(DeckId::A).current_bpm.unwrap_or_default() - b_bpm).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_sync_without_target_tempo_is_reported() {
        let mut rig = rig(Arc::new(StaticFetcher(quiet_wav(2.0, SR))));
        rig.engine.handle_command(EngineCommand::Load {
            deck: DeckId::A,
            track: track("a", Some(128.0)),
        });
        rig.drain(2).await;
        rig.engine.handle_command(EngineCommand::ToggleSync(DeckId::A));
        assert!(!rig.engine.snapshot().deck(DeckId::A).sync_engaged);
        assert_eq!(rig.sink.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_commands_on_empty_deck_emit_errors() {
        let mut rig = rig(Arc::new(StaticFetcher(Vec::new())));
        assert!(rig.engine.handle_command(EngineCommand::Play(DeckId::A)));
        rig.engine.handle_command(EngineCommand::Hotcue { deck: DeckId::B, pad: 0 });
        assert_eq!(rig.sink.errors().len(), 2);
    }

    #[tokio::test]
    async fn test_supersession_through_commands() {
        let (fetcher, mut gates) = GatedFetcher::new(quiet_wav(1.0, SR), 2);
        let mut rig = rig(Arc::new(fetcher));
        rig.engine.handle_command(EngineCommand::Load {
            deck: DeckId::A,
            track: track("old", None),
        });
        rig.engine.handle_command(EngineCommand::Load {
            deck: DeckId::A,
            track: track("new", None),
        });
        for gate in gates.drain(..) {
            let _ = gate.send(());
        }
        rig.drain(1).await;
        let deck = rig.engine.snapshot().deck(DeckId::A).clone();
        assert_eq!(deck.track.map(|t| t.id), Some("new".to_string()));
        assert_eq!(deck.state, TransportState::Playing);
        assert!(rig.sink.errors().is_empty());
    }

    #[tokio::test]
    async fn test_headless_tick_advances_and_meters() {
        let mut rig = rig(Arc::new(StaticFetcher(quiet_wav(4.0, SR))));
        rig.engine.handle_command(EngineCommand::Load {
            deck: DeckId::A,
            track: track("a", None),
        });
        rig.drain(1).await;
        let start = Instant::now();
        rig.engine.on_tick(start);
        rig.engine.on_tick(start + Duration::from_secs(1));
        let position = rig.engine.snapshot().deck(DeckId::A).position_secs;
        assert!((position - 1.0).abs() < 1e-3, "position {}", position);

        rig.engine.on_meter();
        let levels = rig.sink.events().into_iter().rev().find_map(|e| match e {
            EngineEvent::Levels { levels } => Some(levels),
            _ => None,
        });
        let levels = levels.expect("levels event");
        assert!(levels[0].rms > 0.0);
        assert_eq!(levels[1].rms, 0.0);
    }

    #[tokio::test]
    async fn test_mixer_commands_publish_updates() {
        let mut rig = rig(Arc::new(StaticFetcher(Vec::new())));
        rig.engine.handle_command(EngineCommand::SetCrossfader(1.0));
        rig.engine.handle_command(EngineCommand::SetVolume {
            deck: DeckId::A,
            volume: 0.5,
        });
        let last = rig.sink.events().pop().expect("event");
        match last {
            EngineEvent::MixerUpdate { channels, crossfader } => {
                assert_eq!(crossfader, 1.0);
                assert_eq!(channels[0].volume, 0.5);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(rig.graph.params(DeckId::A).crossfader_gain.load(std::sync::atomic::Ordering::Relaxed) < 1e-6);
    }

    #[tokio::test]
    async fn test_loop_serves_handle_until_shutdown() {
        let rig = rig(Arc::new(StaticFetcher(quiet_wav(1.0, SR))));
        let graph = rig.graph.clone();
        let (sender, receiver) = mpsc::channel(8);
        let handle = EngineHandle::new(sender);
        let config = EngineConfig {
            sample_rate: SR,
            ..EngineConfig::default()
        };
        let engine_task = tokio::spawn(async move {
            run_engine_loop(rig.engine, receiver, rig.completions, &config).await;
        });

        handle.load(DeckId::B, track("b", Some(124.0))).await.expect("load");
        handle.set_crossfader(-0.5).await.expect("crossfader");
        let mut snapshot = handle.snapshot().await.expect("snapshot");
        for _ in 0..100 {
            if snapshot.deck(DeckId::B).state == TransportState::Playing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            snapshot = handle.snapshot().await.expect("snapshot");
        }
        assert_eq!(snapshot.deck(DeckId::B).state, TransportState::Playing);
        assert_eq!(snapshot.crossfader, -0.5);

        handle.shutdown().await.expect("shutdown");
        engine_task.await.expect("engine task");
        assert!(!graph.is_attached(DeckId::B));
        assert!(handle.play(DeckId::A).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_reply() {
        let mut rig = rig(Arc::new(StaticFetcher(Vec::new())));
        let (tx, rx) = oneshot::channel();
        assert!(!rig.engine.handle_command(EngineCommand::Shutdown(tx)));
        assert!(rx.await.is_ok());
    }
}
