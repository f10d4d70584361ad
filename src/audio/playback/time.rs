use tokio::time::Instant;

use super::deck::DeckController;
use super::events::{EngineEvent, EventSink};
use super::mixer::MixerController;

/// Position tick: end-of-track, loop boundaries, beat pulses and playhead events.
pub(crate) fn process_time_slice_updates(decks: &mut [DeckController; 2], now: Instant) {
    for deck in decks.iter_mut() {
        deck.on_tick(now);
    }
}

/// Metering tick; runs whether or not anything is playing.
pub(crate) fn process_meter_updates(decks: &[DeckController; 2], mixer: &MixerController, events: &dyn EventSink) {
    let rms = [decks[0].level(), decks[1].level()];
    events.emit(EngineEvent::Levels {
        levels: mixer.levels(rms),
    });
}
