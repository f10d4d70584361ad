pub mod audio;

use std::sync::Arc;
use std::time::Duration;

use audio::errors::EngineError;
use audio::fetch::SourceFetcher;
use audio::playback::events::{LogEventSink, LogNowPlayingSink};
use audio::types::{DeckId, Track, TransportState};

pub use audio::config::EngineConfig;
pub use audio::playback::commands::{EngineCommand, EngineHandle, EngineSnapshot};
pub use audio::types::TrackRecord;

const SESSION_POLL_MS: u64 = 250;

/// Installs the `env_logger` backend; `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

/// Loads up to two tracks (deck A, then deck B), syncs B to A once both
/// tempos are known and plays until every loaded deck has stopped.
pub fn run(config: EngineConfig, tracks: Vec<TrackRecord>) -> Result<(), EngineError> {
    let (handle, engine_thread) = EngineHandle::spawn(
        config,
        Arc::new(LogEventSink),
        Arc::new(LogNowPlayingSink),
        Arc::new(SourceFetcher::new()),
    )?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(EngineError::Runtime)?;

    let session = rt.block_on(drive_session(&handle, tracks));
    if let Err(e) = &session {
        log::error!("Session ended with error: {}", e);
    }
    let shutdown = rt.block_on(handle.shutdown());
    engine_thread.join().map_err(|_| EngineError::ThreadPanic)?;
    session.and(shutdown)
}

async fn drive_session(handle: &EngineHandle, tracks: Vec<TrackRecord>) -> Result<(), EngineError> {
    if tracks.len() > DeckId::ALL.len() {
        log::warn!("Only the first {} tracks are loaded", DeckId::ALL.len());
    }
    let mut loaded = Vec::new();
    for (deck, record) in DeckId::ALL.into_iter().zip(tracks) {
        handle.load(deck, Arc::new(Track::from(record))).await?;
        loaded.push(deck);
    }
    if loaded.is_empty() {
        log::info!("No tracks given, nothing to play");
        return Ok(());
    }

    let mut synced = false;
    let mut poll = tokio::time::interval(Duration::from_millis(SESSION_POLL_MS));
    loop {
        poll.tick().await;
        let snapshot = handle.snapshot().await?;

        if !synced && loaded.len() == 2 {
            let a = snapshot.deck(DeckId::A);
            let b = snapshot.deck(DeckId::B);
            let ready = |state: TransportState| matches!(state, TransportState::Ready | TransportState::Playing | TransportState::Paused);
            if ready(a.state) && ready(b.state) && a.original_bpm.is_some() && b.original_bpm.is_some() {
                handle.toggle_sync(DeckId::B).await?;
                synced = true;
            }
        }

        let finished = loaded.iter().all(|deck| {
            matches!(
                snapshot.deck(*deck).state,
                TransportState::Empty | TransportState::Failed
            )
        });
        if finished {
            log::info!("All decks finished");
            return Ok(());
        }
    }
}
