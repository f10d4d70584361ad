use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::audio::config::{EQ_GAIN_MAX_DB, EQ_GAIN_MIN_DB};

// --- Deck Identity ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeckId {
    A,
    B,
}

impl DeckId {
    pub const ALL: [DeckId; 2] = [DeckId::A, DeckId::B];

    pub fn other(self) -> DeckId {
        match self {
            DeckId::A => DeckId::B,
            DeckId::B => DeckId::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            DeckId::A => 0,
            DeckId::B => 1,
        }
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeckId::A => write!(f, "A"),
            DeckId::B => write!(f, "B"),
        }
    }
}

// --- Hotcues ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hotcue {
    pub pad_id: u8,
    pub time_offset_seconds: f64,
}

/// Hotcues of one track, unique by pad id and kept sorted by pad id.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(from = "Vec<Hotcue>", into = "Vec<Hotcue>")]
pub struct HotcueList {
    cues: Vec<Hotcue>,
}

impl HotcueList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pad_id: u8) -> Option<&Hotcue> {
        self.cues
            .binary_search_by_key(&pad_id, |c| c.pad_id)
            .ok()
            .map(|idx| &self.cues[idx])
    }

    /// Inserts or replaces the cue on `pad_id`.
    pub fn set(&mut self, pad_id: u8, time_offset_seconds: f64) {
        let cue = Hotcue {
            pad_id,
            time_offset_seconds,
        };
        match self.cues.binary_search_by_key(&pad_id, |c| c.pad_id) {
            Ok(idx) => self.cues[idx] = cue,
            Err(idx) => self.cues.insert(idx, cue),
        }
    }

    pub fn remove(&mut self, pad_id: u8) -> Option<Hotcue> {
        self.cues
            .binary_search_by_key(&pad_id, |c| c.pad_id)
            .ok()
            .map(|idx| self.cues.remove(idx))
    }

    pub fn as_slice(&self) -> &[Hotcue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }
}

impl From<Vec<Hotcue>> for HotcueList {
    // First entry wins when the provider hands us duplicate pads.
    fn from(mut cues: Vec<Hotcue>) -> Self {
        cues.sort_by_key(|c| c.pad_id);
        cues.dedup_by_key(|c| c.pad_id);
        HotcueList { cues }
    }
}

impl From<HotcueList> for Vec<Hotcue> {
    fn from(list: HotcueList) -> Self {
        list.cues
    }
}

// --- Tracks ---

/// Plain track data as exchanged with the track provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecord {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub url: String,
    #[serde(default)]
    pub bpm: Option<f32>,
    #[serde(default)]
    pub hotcues: Vec<Hotcue>,
}

/// A track shared between the provider and the decks. Identity is immutable;
/// the hotcue list is written back in place.
#[derive(Debug)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub url: String,
    pub known_bpm: Option<f32>,
    hotcues: Mutex<HotcueList>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artist: impl Into<String>, url: impl Into<String>) -> Self {
        Track {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            url: url.into(),
            known_bpm: None,
            hotcues: Mutex::new(HotcueList::new()),
        }
    }

    pub fn hotcues(&self) -> HotcueList {
        self.hotcues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_hotcues<T>(&self, f: impl FnOnce(&mut HotcueList) -> T) -> T {
        let mut guard = self.hotcues.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
        }
    }

    pub fn to_record(&self) -> TrackRecord {
        TrackRecord {
            id: self.id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            url: self.url.clone(),
            bpm: self.known_bpm,
            hotcues: self.hotcues().into(),
        }
    }
}

impl From<TrackRecord> for Track {
    fn from(record: TrackRecord) -> Self {
        Track {
            id: record.id,
            title: record.title,
            artist: record.artist,
            url: record.url,
            known_bpm: record.bpm,
            hotcues: Mutex::new(HotcueList::from(record.hotcues)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub id: String,
    pub title: String,
    pub artist: String,
}

// --- EQ Parameters ---

/// Holds the gain values (in dB) for the 3-band EQ.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EqParams {
    pub low_gain_db: f32,
    pub mid_gain_db: f32,
    pub high_gain_db: f32,
}

impl EqParams {
    pub(crate) fn approx_eq(&self, other: &Self) -> bool {
        const EPSILON: f32 = 1e-5;
        (self.low_gain_db - other.low_gain_db).abs() < EPSILON
            && (self.mid_gain_db - other.mid_gain_db).abs() < EPSILON
            && (self.high_gain_db - other.high_gain_db).abs() < EPSILON
    }

    /// Clamps each band into the EQ range; a non-finite band reads as flat.
    pub fn clamped(self) -> Self {
        let band = |gain_db: f32| {
            if gain_db.is_finite() { gain_db.clamp(EQ_GAIN_MIN_DB, EQ_GAIN_MAX_DB) } else { 0.0 }
        };
        EqParams {
            low_gain_db: band(self.low_gain_db),
            mid_gain_db: band(self.mid_gain_db),
            high_gain_db: band(self.high_gain_db),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

/// Per-channel mixer controls.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelControls {
    pub eq: EqParams,
    pub filter: f32,
    pub volume: f32,
}

impl Default for ChannelControls {
    fn default() -> Self {
        ChannelControls {
            eq: EqParams::default(),
            filter: 0.0,
            volume: 1.0,
        }
    }
}

// --- Deck State ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransportState {
    Empty,
    Loading,
    Ready,
    Playing,
    Paused,
    /// Graph construction failed; the deck instance is unusable.
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoopRegion {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub active: bool,
}

/// Read-only view of a deck for the UI layer.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeckSnapshot {
    pub deck: DeckId,
    pub state: TransportState,
    pub track: Option<TrackSummary>,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub playback_rate: f32,
    pub master_tempo: bool,
    pub original_bpm: Option<f32>,
    pub current_bpm: Option<f32>,
    pub sync_engaged: bool,
    pub quantize: bool,
    pub loop_region: LoopRegion,
    pub cue_point: f64,
    pub hotcues: Vec<Hotcue>,
    pub jog_angle_deg: f64,
    pub beat_pulse: bool,
}
