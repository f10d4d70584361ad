use serde::Serialize;
use tokio::sync::mpsc;

use crate::audio::analysis::level_meter::{self, SegmentColor};
use crate::audio::types::{ChannelControls, DeckId, DeckSnapshot, TrackSummary};

// --- Event Payloads for the UI Layer ---

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelLevel {
    pub deck: DeckId,
    pub rms: f32,
    pub vu_segments: usize,
    /// Colour of the topmost lit segment.
    pub peak_color: Option<SegmentColor>,
}

impl ChannelLevel {
    pub fn new(deck: DeckId, rms: f32) -> Self {
        let vu_segments = level_meter::vu_segments(rms);
        ChannelLevel {
            deck,
            rms,
            vu_segments,
            peak_color: vu_segments.checked_sub(1).map(level_meter::segment_color),
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Full deck state after any change.
    #[serde(rename_all = "camelCase")]
    DeckUpdate { snapshot: DeckSnapshot },
    /// Playhead position, emitted on each tick while a deck is playing.
    #[serde(rename_all = "camelCase")]
    Tick {
        deck: DeckId,
        position_secs: f64,
        jog_angle_deg: f64,
    },
    #[serde(rename_all = "camelCase")]
    BeatPulse { deck: DeckId, beat_index: i64 },
    #[serde(rename_all = "camelCase")]
    Levels { levels: Vec<ChannelLevel> },
    #[serde(rename_all = "camelCase")]
    MixerUpdate {
        channels: Vec<ChannelControls>,
        crossfader: f32,
    },
    #[serde(rename_all = "camelCase")]
    DeckError { deck: DeckId, error: String },
}

/// Receives engine events. Implementations must not block the engine thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Writes events to the log; the default sink for the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: EngineEvent) {
        match &event {
            EngineEvent::Tick { .. } | EngineEvent::Levels { .. } => log::trace!("Event: {:?}", event),
            EngineEvent::DeckError { deck, error } => log::warn!("Event: Deck {} error: {}", deck, error),
            _ => match serde_json::to_string(&event) {
                Ok(json) => log::debug!("Event: {}", json),
                Err(e) => log::warn!("Event: Failed to serialize {:?}: {}", event, e),
            },
        }
    }
}

/// Forwards events into an unbounded channel for a UI task to drain.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelEventSink { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            log::trace!("Event: Receiver dropped, event discarded");
        }
    }
}

// --- Global "Now Playing" State ---

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub deck: DeckId,
    /// `None` once the deck's slot is free.
    pub track: Option<TrackSummary>,
    pub is_playing: bool,
}

/// One-way, fire-and-forget player-state notifications.
pub trait NowPlayingSink: Send + Sync {
    fn update(&self, state: NowPlaying);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNowPlayingSink;

impl NowPlayingSink for LogNowPlayingSink {
    fn update(&self, state: NowPlaying) {
        match &state.track {
            Some(track) => log::info!(
                "Now Playing: Deck {} '{}' by {} ({})",
                state.deck,
                track.title,
                track.artist,
                if state.is_playing { "playing" } else { "paused" }
            ),
            None => log::info!("Now Playing: Deck {} is free", state.deck),
        }
    }
}

// --- Emitter Helpers ---

pub(crate) fn emit_deck_update(sink: &dyn EventSink, snapshot: DeckSnapshot) {
    sink.emit(EngineEvent::DeckUpdate { snapshot });
}

pub(crate) fn emit_error_event(sink: &dyn EventSink, deck: DeckId, error_message: &str) {
    sink.emit(EngineEvent::DeckError {
        deck,
        error: error_message.to_string(),
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Mutex, PoisonError};

    /// Records everything it receives.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) events: Mutex<Vec<EngineEvent>>,
        pub(crate) now_playing: Mutex<Vec<NowPlaying>>,
    }

    impl RecordingSink {
        pub(crate) fn events(&self) -> Vec<EngineEvent> {
            self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        pub(crate) fn now_playing(&self) -> Vec<NowPlaying> {
            self.now_playing.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        pub(crate) fn errors(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    EngineEvent::DeckError { error, .. } => Some(error),
                    _ => None,
                })
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: EngineEvent) {
            self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
        }
    }

    impl NowPlayingSink for RecordingSink {
        fn update(&self, state: NowPlaying) {
            self.now_playing.lock().unwrap_or_else(PoisonError::into_inner).push(state);
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(EngineEvent::BeatPulse { deck: DeckId::A, beat_index: 4 })
            .expect("serialize");
        assert_eq!(json["type"], "beatPulse");
        assert_eq!(json["beatIndex"], 4);
        assert_eq!(json["deck"], "A");
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelEventSink::new();
        emit_error_event(&sink, DeckId::B, "boom");
        match rx.try_recv() {
            Ok(EngineEvent::DeckError { deck, error }) => {
                assert_eq!(deck, DeckId::B);
                assert_eq!(error, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_channel_level_derives_segments() {
        let full = ChannelLevel::new(DeckId::A, 1.0);
        assert_eq!(full.vu_segments, 12);
        assert_eq!(full.peak_color, Some(SegmentColor::Red));
        assert_eq!(ChannelLevel::new(DeckId::A, 0.0).peak_color, None);
    }
}
