pub mod beat_grid;
pub mod bpm_analyzer;
pub mod level_meter;
