pub mod analysis;
pub mod config;
pub mod decoding;
pub mod effects;
pub mod errors;
pub mod fetch;
pub mod graph;
pub(crate) mod output;
pub mod playback;
pub mod types;
