use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use twin_deck_lib::{EngineConfig, TrackRecord};

/// Dual-deck DJ engine: plays deck A, syncs deck B to it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Track list file (JSON array of track records)
    #[arg(long = "tracks")]
    tracks_file: Option<PathBuf>,

    /// Audio files or http(s) URLs, loaded after the track list
    locators: Vec<String>,
}

fn record_for_locator(index: usize, locator: &str) -> TrackRecord {
    let title = Path::new(locator.rsplit('/').next().unwrap_or(locator))
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| locator.to_string());
    TrackRecord {
        id: format!("track-{}", index + 1),
        title,
        artist: "Unknown Artist".to_string(),
        url: locator.to_string(),
        ..TrackRecord::default()
    }
}

fn load_tracks(args: &Args) -> Result<Vec<TrackRecord>, String> {
    let mut tracks = match &args.tracks_file {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
            serde_json::from_str::<Vec<TrackRecord>>(&contents)
                .map_err(|e| format!("Invalid track list '{}': {}", path.display(), e))?
        }
        None => Vec::new(),
    };
    let offset = tracks.len();
    tracks.extend(
        args.locators
            .iter()
            .enumerate()
            .map(|(i, locator)| record_for_locator(offset + i, locator)),
    );
    Ok(tracks)
}

fn main() -> ExitCode {
    twin_deck_lib::init_logging();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };

    let tracks = match load_tracks(&args) {
        Ok(tracks) => tracks,
        Err(message) => {
            log::error!("{}", message);
            return ExitCode::FAILURE;
        }
    };

    match twin_deck_lib::run(config, tracks) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Engine failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_collect_locators() {
        let args = Args::try_parse_from(["twin-deck", "--config", "engine.json", "a.mp3", "https://example.com/b.flac"])
            .expect("args should parse");
        assert_eq!(args.config, Some(PathBuf::from("engine.json")));
        assert_eq!(args.locators.len(), 2);
    }

    #[test]
    fn test_missing_flag_value_is_error() {
        assert!(Args::try_parse_from(["twin-deck", "--tracks"]).is_err());
    }

    #[test]
    fn test_tracks_flag_sets_track_list() {
        let args = Args::try_parse_from(["twin-deck", "--tracks", "set.json"]).expect("args should parse");
        assert_eq!(args.tracks_file, Some(PathBuf::from("set.json")));
        assert!(args.locators.is_empty());
    }

    #[test]
    fn test_record_title_from_url() {
        let record = record_for_locator(1, "https://example.com/mixes/night%20drive.mp3");
        assert_eq!(record.title, "night%20drive");
        assert_eq!(record.id, "track-2");
    }
}
