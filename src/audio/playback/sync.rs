use super::deck::DeckController;
use crate::audio::errors::DeckError;
use crate::audio::types::DeckId;

// --- Tempo Sync ---

/// Effective BPM of the deck `deck` would follow.
fn target_bpm(decks: &[DeckController; 2], deck: DeckId) -> Option<f32> {
    decks[deck.other().index()].current_bpm()
}

/// Rate that makes `deck` play at the other deck's effective tempo.
fn sync_rate(decks: &[DeckController; 2], deck: DeckId) -> Result<f32, DeckError> {
    let own_bpm = decks[deck.index()]
        .original_bpm()
        .filter(|bpm| *bpm > f32::EPSILON)
        .ok_or(DeckError::TempoUnknown { deck })?;
    let target = target_bpm(decks, deck).ok_or(DeckError::SyncTargetUnavailable { deck })?;
    Ok(target / own_bpm)
}

/// Engages or releases sync on `deck`. Engaging releases the other deck.
pub(crate) fn toggle_sync(decks: &mut [DeckController; 2], deck: DeckId) -> Result<(), DeckError> {
    if decks[deck.index()].is_sync_engaged() {
        decks[deck.index()].set_sync_engaged(false);
        log::info!("Sync: Deck {} released", deck);
        return Ok(());
    }

    let rate = sync_rate(decks, deck)?;
    let other = deck.other();
    if decks[other.index()].is_sync_engaged() {
        decks[other.index()].set_sync_engaged(false);
        log::info!("Sync: Deck {} released in favour of Deck {}", other, deck);
    }
    let follower = &mut decks[deck.index()];
    follower.set_sync_engaged(true);
    follower.apply_rate(rate);
    log::info!(
        "Sync: Deck {} following Deck {} at {:.2} BPM (rate {:.4})",
        deck,
        other,
        follower.current_bpm().unwrap_or_default(),
        follower.playback_rate()
    );
    Ok(())
}

/// Recomputes the engaged deck's rate after either deck's tempo changed.
pub(crate) fn propagate_sync(decks: &mut [DeckController; 2]) {
    for deck in DeckId::ALL {
        if !decks[deck.index()].is_sync_engaged() {
            continue;
        }
        match sync_rate(decks, deck) {
            Ok(rate) => {
                if (rate - decks[deck.index()].playback_rate()).abs() > f32::EPSILON {
                    log::debug!("Sync: Deck {} rate recomputed to {:.4}", deck, rate);
                    decks[deck.index()].apply_rate(rate);
                }
            }
            Err(e) => log::debug!("Sync: Deck {} keeps its rate: {}", deck, e),
        }
    }
}
