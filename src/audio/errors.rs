use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;

use crate::audio::types::DeckId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Reasons the tempo estimator could not produce a BPM (`EstimationFailed`).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BpmError {
    #[error("Cannot calculate BPM from empty samples")]
    EmptySamplesForBpm,
    #[error("Invalid sample rate for BPM analysis: {0}")]
    InvalidSampleRate(f32),
    #[error("Kick filter setup failed: {0}")]
    FilterSetup(String),
    #[error("No qualifying peaks found in {duration_secs:.2}s of audio")]
    NoPeaks { duration_secs: f64 },
    #[error("Only {peak_count} peak(s) found, no intervals to measure")]
    NoIntervals { peak_count: usize },
    #[error("BPM analysis task failed: {0}")]
    TaskFailed(String),
    #[error("BPM analysis cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum AudioEffectsError {
    #[error("Failed to calculate {filter_type} coefficients")]
    CoefficientCalculationError { filter_type: String },
}

#[derive(Error, Debug)]
pub enum AudioDecodingError {
    #[error("Symphonia probe/format error for '{source_name}': {source}")]
    FormatError {
        source_name: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("No suitable audio track in '{source_name}'")]
    NoSuitableTrack { source_name: String },
    #[error("Sample rate missing in '{source_name}'")]
    MissingSampleRate { source_name: String },
    #[error("Channel info missing in '{source_name}'")]
    MissingChannelInfo { source_name: String },
    #[error("Failed to create decoder for '{source_name}': {source}")]
    DecoderCreationError {
        source_name: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("Symphonia fatal decode error in '{source_name}': {source}")]
    FatalDecodeError {
        source_name: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("Symphonia I/O error reading packet for '{source_name}': {source}")]
    PacketReadIoError {
        source_name: String,
        #[source]
        source: SymphoniaError,
    },
    #[error("No samples decoded from '{source_name}'")]
    NoSamplesDecoded { source_name: String },
    #[error("Resampling '{source_name}' from {from} Hz to {to} Hz failed: {reason}")]
    ResampleError {
        source_name: String,
        from: u32,
        to: u32,
        reason: String,
    },
    #[error("Decoding '{source_name}' was cancelled")]
    Cancelled { source_name: String },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP request for '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP request for '{url}' returned status {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("Unsupported audio locator '{0}'")]
    UnsupportedLocator(String),
    #[error("Fetch worker failed: {0}")]
    Worker(String),
}

/// Outcome taxonomy for a deck load (`LoadFailed` plus cancellation).
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Fetching audio failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Decoding audio failed: {0}")]
    Decode(#[from] AudioDecodingError),
    #[error("Load task failed: {0}")]
    Task(String),
    /// Superseded by a newer load; not a failure.
    #[error("Load cancelled")]
    Cancelled,
}

impl LoadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled)
    }
}

/// `GraphBuildFailed`: fatal for the deck instance.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphBuildError {
    #[error("Invalid graph sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("Failed to construct {node} node: {reason}")]
    NodeConstruction { node: &'static str, reason: String },
    #[error("No audio output device available")]
    NoOutputDevice,
    #[error("No usable output configuration: {0}")]
    NoOutputConfig(String),
    #[error("Failed to build output stream: {0}")]
    StreamBuild(String),
    #[error("Failed to start output stream: {0}")]
    StreamPlay(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeckError {
    #[error("Deck {deck}: no track loaded")]
    NoTrackLoaded { deck: DeckId },
    #[error("Deck {deck}: tempo unknown, beat features disabled")]
    TempoUnknown { deck: DeckId },
    #[error("Deck {deck}: hotcue pad {pad} outside 1..={max}")]
    InvalidPad { deck: DeckId, pad: u8, max: u8 },
    #[error("Deck {deck}: audio graph unavailable after build failure: {reason}")]
    GraphFailed { deck: DeckId, reason: String },
    #[error("Deck {deck}: sync target has no tempo")]
    SyncTargetUnavailable { deck: DeckId },
    #[error("Deck {deck}: loop end {end:.3}s is not after loop start {start:.3}s")]
    LoopEndBeforeStart { deck: DeckId, start: f64, end: f64 },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine command channel closed: {0}")]
    CommandSendError(String),
    #[error("Engine did not answer the request: {0}")]
    ReplyDropped(#[from] tokio::sync::oneshot::error::RecvError),
    #[error("Failed to build engine runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("Engine thread panicked")]
    ThreadPanic,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Deck(#[from] DeckError),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for EngineError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        EngineError::CommandSendError(err.to_string())
    }
}

// Stringified forms for UI-facing results.
impl From<LoadError> for String {
    fn from(err: LoadError) -> String {
        err.to_string()
    }
}
impl From<BpmError> for String {
    fn from(err: BpmError) -> String {
        err.to_string()
    }
}
impl From<DeckError> for String {
    fn from(err: DeckError) -> String {
        err.to_string()
    }
}
impl From<EngineError> for String {
    fn from(err: EngineError) -> String {
        err.to_string()
    }
}
