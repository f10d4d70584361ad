use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::audio::config::{DELAY_MAX_FEEDBACK, DELAY_MAX_SECS, EQ_GAIN_MAX_DB, EQ_GAIN_MIN_DB};
use crate::audio::effects;
use crate::audio::graph::MixerGraph;
use crate::audio::types::{ChannelControls, DeckId, EqBand, EqParams};

use super::events::{ChannelLevel, EngineEvent};

/// Send-effect settings of one channel.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendControls {
    pub reverb: f32,
    pub delay: f32,
    pub delay_time_secs: f32,
    pub delay_feedback: f32,
}

/// Owns the channel strips and the crossfader, and pushes them into the
/// shared deck parameters read by the renderer.
pub(crate) struct MixerController {
    graph: Arc<MixerGraph>,
    channels: [ChannelControls; 2],
    sends: [SendControls; 2],
    crossfader: f32,
}

impl MixerController {
    pub(crate) fn new(graph: Arc<MixerGraph>) -> Self {
        let defaults = graph.params(DeckId::A);
        let sends = SendControls {
            reverb: defaults.reverb_send.load(Ordering::Relaxed),
            delay: defaults.delay_send.load(Ordering::Relaxed),
            delay_time_secs: defaults.delay_time_secs.load(Ordering::Relaxed),
            delay_feedback: defaults.delay_feedback.load(Ordering::Relaxed),
        };
        let mut mixer = MixerController {
            graph,
            channels: [ChannelControls::default(); 2],
            sends: [sends; 2],
            crossfader: 0.0,
        };
        mixer.set_crossfader(0.0);
        mixer
    }

    pub(crate) fn controls(&self, deck: DeckId) -> ChannelControls {
        self.channels[deck.index()]
    }

    pub(crate) fn sends(&self, deck: DeckId) -> SendControls {
        self.sends[deck.index()]
    }

    pub(crate) fn crossfader(&self) -> f32 {
        self.crossfader
    }

    pub(crate) fn set_eq(&mut self, deck: DeckId, band: EqBand, gain_db: f32) {
        if !gain_db.is_finite() {
            log::warn!("Mixer: Ignoring non-finite EQ gain {} for deck {}", gain_db, deck);
            return;
        }
        let gain_db = gain_db.clamp(EQ_GAIN_MIN_DB, EQ_GAIN_MAX_DB);
        let eq = &mut self.channels[deck.index()].eq;
        match band {
            EqBand::Low => eq.low_gain_db = gain_db,
            EqBand::Mid => eq.mid_gain_db = gain_db,
            EqBand::High => eq.high_gain_db = gain_db,
        }
        self.graph.params(deck).set_eq(*eq);
        log::debug!("Mixer: Deck {} {:?} EQ {:.1} dB", deck, band, gain_db);
    }

    pub(crate) fn set_filter(&mut self, deck: DeckId, position: f32) {
        let position = if position.is_finite() { position.clamp(-1.0, 1.0) } else { 0.0 };
        self.channels[deck.index()].filter = position;
        self.graph
            .params(deck)
            .filter_position
            .store(position, Ordering::Relaxed);
    }

    pub(crate) fn set_volume(&mut self, deck: DeckId, volume: f32) {
        if !volume.is_finite() {
            log::warn!("Mixer: Ignoring non-finite volume {} for deck {}", volume, deck);
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        self.channels[deck.index()].volume = volume;
        self.graph.params(deck).volume.store(volume, Ordering::Relaxed);
    }

    pub(crate) fn set_crossfader(&mut self, position: f32) {
        self.crossfader = if position.is_finite() { position.clamp(-1.0, 1.0) } else { 0.0 };
        let (gain_a, gain_b) = effects::crossfader_gains(self.crossfader);
        self.graph
            .params(DeckId::A)
            .crossfader_gain
            .store(gain_a, Ordering::Relaxed);
        self.graph
            .params(DeckId::B)
            .crossfader_gain
            .store(gain_b, Ordering::Relaxed);
        log::debug!(
            "Mixer: Crossfader {:.2} (A {:.3}, B {:.3})",
            self.crossfader,
            gain_a,
            gain_b
        );
    }

    pub(crate) fn set_reverb_send(&mut self, deck: DeckId, level: f32) {
        if !level.is_finite() {
            log::warn!("Mixer: Ignoring non-finite reverb send {} for deck {}", level, deck);
            return;
        }
        let level = level.clamp(0.0, 1.0);
        self.sends[deck.index()].reverb = level;
        self.graph.params(deck).reverb_send.store(level, Ordering::Relaxed);
    }

    pub(crate) fn set_delay_send(&mut self, deck: DeckId, level: f32) {
        if !level.is_finite() {
            log::warn!("Mixer: Ignoring non-finite delay send {} for deck {}", level, deck);
            return;
        }
        let level = level.clamp(0.0, 1.0);
        self.sends[deck.index()].delay = level;
        self.graph.params(deck).delay_send.store(level, Ordering::Relaxed);
    }

    pub(crate) fn set_delay_time(&mut self, deck: DeckId, secs: f32) {
        if !secs.is_finite() {
            log::warn!("Mixer: Ignoring non-finite delay time {} for deck {}", secs, deck);
            return;
        }
        let secs = secs.clamp(0.0, DELAY_MAX_SECS);
        self.sends[deck.index()].delay_time_secs = secs;
        self.graph.params(deck).delay_time_secs.store(secs, Ordering::Relaxed);
    }

    pub(crate) fn set_delay_feedback(&mut self, deck: DeckId, feedback: f32) {
        if !feedback.is_finite() {
            log::warn!("Mixer: Ignoring non-finite delay feedback {} for deck {}", feedback, deck);
            return;
        }
        let feedback = feedback.clamp(0.0, DELAY_MAX_FEEDBACK);
        self.sends[deck.index()].delay_feedback = feedback;
        self.graph
            .params(deck)
            .delay_feedback
            .store(feedback, Ordering::Relaxed);
    }

    /// Flattens EQ and filter, leaving volume alone.
    pub(crate) fn reset_channel(&mut self, deck: DeckId) {
        self.channels[deck.index()].eq = EqParams::default();
        self.graph.params(deck).set_eq(EqParams::default());
        self.set_filter(deck, 0.0);
        log::debug!("Mixer: Deck {} EQ and filter reset", deck);
    }

    pub(crate) fn update_event(&self) -> EngineEvent {
        EngineEvent::MixerUpdate {
            channels: self.channels.to_vec(),
            crossfader: self.crossfader,
        }
    }

    pub(crate) fn levels(&self, rms: [f32; 2]) -> Vec<ChannelLevel> {
        DeckId::ALL
            .iter()
            .map(|deck| ChannelLevel::new(*deck, rms[deck.index()]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer() -> (MixerController, Arc<MixerGraph>) {
        let graph = Arc::new(MixerGraph::new(8_000));
        (MixerController::new(graph.clone()), graph)
    }

    #[test]
    fn test_centre_crossfader_is_equal_power() {
        let (mixer, graph) = mixer();
        let a = graph.params(DeckId::A).crossfader_gain.load(Ordering::Relaxed);
        let b = graph.params(DeckId::B).crossfader_gain.load(Ordering::Relaxed);
        assert_eq!(mixer.crossfader(), 0.0);
        assert!((a - b).abs() < 1e-6);
        assert!((a * a + b * b - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_crossfader_extremes_and_clamping() {
        let (mut mixer, graph) = mixer();
        mixer.set_crossfader(-5.0);
        assert_eq!(mixer.crossfader(), -1.0);
        assert!((graph.params(DeckId::A).crossfader_gain.load(Ordering::Relaxed) - 1.0).abs() < 1e-6);
        assert!(graph.params(DeckId::B).crossfader_gain.load(Ordering::Relaxed).abs() < 1e-6);
    }

    #[test]
    fn test_eq_and_filter_only_touch_owning_deck() {
        let (mut mixer, graph) = mixer();
        mixer.set_eq(DeckId::A, EqBand::Low, -60.0);
        mixer.set_filter(DeckId::A, 0.4);
        assert_eq!(mixer.controls(DeckId::A).eq.low_gain_db, EQ_GAIN_MIN_DB);
        assert_eq!(graph.params(DeckId::A).eq().low_gain_db, EQ_GAIN_MIN_DB);
        assert_eq!(graph.params(DeckId::A).filter_position.load(Ordering::Relaxed), 0.4);
        assert_eq!(mixer.controls(DeckId::B), ChannelControls::default());
        assert_eq!(graph.params(DeckId::B).eq(), EqParams::default());
    }

    #[test]
    fn test_non_finite_settings_are_ignored() {
        let (mut mixer, graph) = mixer();
        mixer.set_eq(DeckId::A, EqBand::Low, -6.0);
        mixer.set_volume(DeckId::A, 0.5);
        mixer.set_delay_time(DeckId::A, 0.25);

        mixer.set_eq(DeckId::A, EqBand::Low, f32::NAN);
        mixer.set_volume(DeckId::A, f32::NAN);
        mixer.set_reverb_send(DeckId::A, f32::INFINITY);
        mixer.set_delay_send(DeckId::A, f32::NAN);
        mixer.set_delay_time(DeckId::A, f32::NAN);
        mixer.set_delay_feedback(DeckId::A, f32::NEG_INFINITY);

        let params = graph.params(DeckId::A);
        assert_eq!(mixer.controls(DeckId::A).eq.low_gain_db, -6.0);
        assert_eq!(params.eq().low_gain_db, -6.0);
        assert_eq!(params.volume.load(Ordering::Relaxed), 0.5);
        assert_eq!(params.reverb_send.load(Ordering::Relaxed), 0.0);
        assert_eq!(params.delay_send.load(Ordering::Relaxed), 0.0);
        assert_eq!(params.delay_time_secs.load(Ordering::Relaxed), 0.25);
        let sends = mixer.sends(DeckId::A);
        assert!(sends.delay_feedback.is_finite() && sends.delay_time_secs == 0.25);
    }

    #[test]
    fn test_reset_channel_keeps_volume() {
        let (mut mixer, _graph) = mixer();
        mixer.set_volume(DeckId::B, 0.3);
        mixer.set_eq(DeckId::B, EqBand::High, 6.0);
        mixer.set_filter(DeckId::B, -0.7);
        mixer.reset_channel(DeckId::B);
        let controls = mixer.controls(DeckId::B);
        assert_eq!(controls.eq, EqParams::default());
        assert_eq!(controls.filter, 0.0);
        assert_eq!(controls.volume, 0.3);
    }

    #[test]
    fn test_delay_settings_clamp() {
        let (mut mixer, graph) = mixer();
        mixer.set_delay_feedback(DeckId::A, 2.0);
        mixer.set_delay_time(DeckId::A, 9.0);
        assert_eq!(mixer.sends(DeckId::A).delay_feedback, DELAY_MAX_FEEDBACK);
        assert_eq!(graph.params(DeckId::A).delay_time_secs.load(Ordering::Relaxed), DELAY_MAX_SECS);
    }
}
