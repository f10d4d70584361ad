use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::events::{ChannelLevel, EventSink, NowPlayingSink};
use super::mixer::SendControls;
use crate::audio::config::EngineConfig;
use crate::audio::errors::EngineError;
use crate::audio::fetch::AudioFetcher;
use crate::audio::types::{ChannelControls, DeckId, DeckSnapshot, EqBand, Track};

// --- Engine Commands ---

#[derive(Debug)]
pub enum EngineCommand {
    Load { deck: DeckId, track: Arc<Track> },
    Play(DeckId),
    Pause(DeckId),
    Stop(DeckId),
    Seek { deck: DeckId, position_secs: f64 },
    SetCue(DeckId),
    GoToCue(DeckId),
    LoopIn(DeckId),
    LoopOut(DeckId),
    ExitLoop(DeckId),
    BeatJump { deck: DeckId, beats: f64 },
    Hotcue { deck: DeckId, pad: u8 },
    SetDeleteModifier { deck: DeckId, held: bool },
    SetQuantize { deck: DeckId, enabled: bool },
    SetMasterTempo { deck: DeckId, enabled: bool },
    SetPlaybackRate { deck: DeckId, rate: f32 },
    ResetRate(DeckId),
    ToggleSync(DeckId),
    ScrubBegin(DeckId),
    Scrub { deck: DeckId, dx: f64 },
    ScrubEnd(DeckId),
    SetEq { deck: DeckId, band: EqBand, gain_db: f32 },
    SetFilter { deck: DeckId, position: f32 },
    SetVolume { deck: DeckId, volume: f32 },
    SetCrossfader(f32),
    SetReverbSend { deck: DeckId, level: f32 },
    SetDelaySend { deck: DeckId, level: f32 },
    SetDelayTime { deck: DeckId, secs: f32 },
    SetDelayFeedback { deck: DeckId, feedback: f32 },
    ResetChannel(DeckId),
    Snapshot(oneshot::Sender<EngineSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Point-in-time view of both decks and the mixer.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub decks: Vec<DeckSnapshot>,
    pub channels: Vec<ChannelControls>,
    pub sends: Vec<SendControls>,
    pub crossfader: f32,
    pub levels: Vec<ChannelLevel>,
    pub sample_rate: u32,
}

impl EngineSnapshot {
    pub fn deck(&self, deck: DeckId) -> &DeckSnapshot {
        &self.decks[deck.index()]
    }
}

// --- Engine Handle ---

/// Cloneable sender side of the engine thread.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub(crate) fn new(sender: mpsc::Sender<EngineCommand>) -> Self {
        EngineHandle { sender }
    }

    /// Starts the engine thread and returns its handle.
    pub fn spawn(
        config: EngineConfig,
        events: Arc<dyn EventSink>,
        now_playing: Arc<dyn NowPlayingSink>,
        fetcher: Arc<dyn AudioFetcher>,
    ) -> Result<(EngineHandle, std::thread::JoinHandle<()>), EngineError> {
        config.validate()?;
        let (sender, receiver) = mpsc::channel(config.command_channel_size);
        let thread = std::thread::Builder::new()
            .name("twin-deck-engine".to_string())
            .spawn(move || super::run_engine_thread(config, receiver, events, now_playing, fetcher))
            .map_err(EngineError::Runtime)?;
        Ok((EngineHandle::new(sender), thread))
    }

    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.sender.send(command).await?;
        Ok(())
    }

    pub async fn load(&self, deck: DeckId, track: Arc<Track>) -> Result<(), EngineError> {
        log::info!("CMD: Load '{}' on deck {}", track.title, deck);
        self.send(EngineCommand::Load { deck, track }).await
    }

    pub async fn play(&self, deck: DeckId) -> Result<(), EngineError> {
        log::debug!("CMD: Play deck {}", deck);
        self.send(EngineCommand::Play(deck)).await
    }

    pub async fn pause(&self, deck: DeckId) -> Result<(), EngineError> {
        log::debug!("CMD: Pause deck {}", deck);
        self.send(EngineCommand::Pause(deck)).await
    }

    pub async fn stop(&self, deck: DeckId) -> Result<(), EngineError> {
        log::debug!("CMD: Stop deck {}", deck);
        self.send(EngineCommand::Stop(deck)).await
    }

    pub async fn seek(&self, deck: DeckId, position_secs: f64) -> Result<(), EngineError> {
        self.send(EngineCommand::Seek { deck, position_secs }).await
    }

    pub async fn set_cue(&self, deck: DeckId) -> Result<(), EngineError> {
        self.send(EngineCommand::SetCue(deck)).await
    }

    pub async fn go_to_cue(&self, deck: DeckId) -> Result<(), EngineError> {
        self.send(EngineCommand::GoToCue(deck)).await
    }

    pub async fn loop_in(&self, deck: DeckId) -> Result<(), EngineError> {
        self.send(EngineCommand::LoopIn(deck)).await
    }

    pub async fn loop_out(&self, deck: DeckId) -> Result<(), EngineError> {
        self.send(EngineCommand::LoopOut(deck)).await
    }

    pub async fn exit_loop(&self, deck: DeckId) -> Result<(), EngineError> {
        self.send(EngineCommand::ExitLoop(deck)).await
    }

    pub async fn beat_jump(&self, deck: DeckId, beats: f64) -> Result<(), EngineError> {
        self.send(EngineCommand::BeatJump { deck, beats }).await
    }

    pub async fn hotcue(&self, deck: DeckId, pad: u8) -> Result<(), EngineError> {
        self.send(EngineCommand::Hotcue { deck, pad }).await
    }

    pub async fn set_delete_modifier(&self, deck: DeckId, held: bool) -> Result<(), EngineError> {
        self.send(EngineCommand::SetDeleteModifier { deck, held }).await
    }

    pub async fn set_quantize(&self, deck: DeckId, enabled: bool) -> Result<(), EngineError> {
        self.send(EngineCommand::SetQuantize { deck, enabled }).await
    }

    pub async fn set_master_tempo(&self, deck: DeckId, enabled: bool) -> Result<(), EngineError> {
        self.send(EngineCommand::SetMasterTempo { deck, enabled }).await
    }

    pub async fn set_playback_rate(&self, deck: DeckId, rate: f32) -> Result<(), EngineError> {
        self.send(EngineCommand::SetPlaybackRate { deck, rate }).await
    }

    pub async fn reset_rate(&self, deck: DeckId) -> Result<(), EngineError> {
        self.send(EngineCommand::ResetRate(deck)).await
    }

    pub async fn toggle_sync(&self, deck: DeckId) -> Result<(), EngineError> {
        log::debug!("CMD: Toggle sync on deck {}", deck);
        self.send(EngineCommand::ToggleSync(deck)).await
    }

    pub async fn scrub_begin(&self, deck: DeckId) -> Result<(), EngineError> {
        self.send(EngineCommand::ScrubBegin(deck)).await
    }

    pub async fn scrub(&self, deck: DeckId, dx: f64) -> Result<(), EngineError> {
        self.send(EngineCommand::Scrub { deck, dx }).await
    }

    pub async fn scrub_end(&self, deck: DeckId) -> Result<(), EngineError> {
        self.send(EngineCommand::ScrubEnd(deck)).await
    }

    pub async fn set_eq(&self, deck: DeckId, band: EqBand, gain_db: f32) -> Result<(), EngineError> {
        self.send(EngineCommand::SetEq { deck, band, gain_db }).await
    }

    pub async fn set_filter(&self, deck: DeckId, position: f32) -> Result<(), EngineError> {
        self.send(EngineCommand::SetFilter { deck, position }).await
    }

    pub async fn set_volume(&self, deck: DeckId, volume: f32) -> Result<(), EngineError> {
        self.send(EngineCommand::SetVolume { deck, volume }).await
    }

    pub async fn set_crossfader(&self, position: f32) -> Result<(), EngineError> {
        self.send(EngineCommand::SetCrossfader(position)).await
    }

    pub async fn set_reverb_send(&self, deck: DeckId, level: f32) -> Result<(), EngineError> {
        self.send(EngineCommand::SetReverbSend { deck, level }).await
    }

    pub async fn set_delay_send(&self, deck: DeckId, level: f32) -> Result<(), EngineError> {
        self.send(EngineCommand::SetDelaySend { deck, level }).await
    }

    pub async fn set_delay_time(&self, deck: DeckId, secs: f32) -> Result<(), EngineError> {
        self.send(EngineCommand::SetDelayTime { deck, secs }).await
    }

    pub async fn set_delay_feedback(&self, deck: DeckId, feedback: f32) -> Result<(), EngineError> {
        self.send(EngineCommand::SetDelayFeedback { deck, feedback }).await
    }

    pub async fn reset_channel(&self, deck: DeckId) -> Result<(), EngineError> {
        self.send(EngineCommand::ResetChannel(deck)).await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot(reply_tx)).await?;
        Ok(reply_rx.await?)
    }

    /// Stops the engine and waits until both decks are torn down.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        log::info!("CMD: Shutdown engine");
        let (done_tx, done_rx) = oneshot::channel();
        self.send(EngineCommand::Shutdown(done_tx)).await?;
        Ok(done_rx.await?)
    }
}
