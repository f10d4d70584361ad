use std::sync::Arc;

use crate::audio::decoding;
use crate::audio::errors::{AudioDecodingError, LoadError};
use crate::audio::fetch::AudioFetcher;

use super::state::CancelFlag;

/// Decoded mono track audio at the engine rate.
#[derive(Debug, Clone)]
pub struct LoadedAudio {
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
}

impl LoadedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Fetch, decode and resample. Decoding runs on the blocking pool and stops
/// at the next packet or chunk once `cancel` is raised.
pub async fn load_audio(
    fetcher: Arc<dyn AudioFetcher>,
    locator: String,
    target_rate: u32,
    cancel: CancelFlag,
) -> Result<LoadedAudio, LoadError> {
    let bytes = fetcher.fetch(&locator).await?;
    log::debug!("Loader: Fetched {} bytes for '{}'", bytes.len(), locator);
    if cancel.is_cancelled() {
        return Err(LoadError::Cancelled);
    }

    let decode_locator = locator.clone();
    let decoded = tokio::task::spawn_blocking(move || {
        let decoded = decoding::decode_bytes_to_mono_samples(bytes, &decode_locator, &cancel)?;
        decoding::resample_to(decoded, target_rate, &decode_locator, &cancel)
    })
    .await
    .map_err(|e| {
        if e.is_cancelled() {
            LoadError::Cancelled
        } else {
            LoadError::Task(e.to_string())
        }
    })?
    .map_err(|e| match e {
        AudioDecodingError::Cancelled { .. } => LoadError::Cancelled,
        e => LoadError::Decode(e),
    })?;

    log::info!(
        "Loader: Decoded '{}': {:.2}s at {} Hz",
        locator,
        decoded.duration_secs(),
        decoded.sample_rate
    );
    Ok(LoadedAudio {
        samples: Arc::new(decoded.samples),
        sample_rate: decoded.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoding::tests::wav_bytes;
    use crate::audio::errors::FetchError;
    use crate::audio::fetch::FetchFuture;

    struct StaticFetcher(Vec<u8>);

    impl AudioFetcher for StaticFetcher {
        fn fetch(&self, _locator: &str) -> FetchFuture {
            let bytes = self.0.clone();
            Box::pin(async move { Ok(bytes) })
        }
    }

    struct FailingFetcher;

    impl AudioFetcher for FailingFetcher {
        fn fetch(&self, locator: &str) -> FetchFuture {
            let locator = locator.to_string();
            Box::pin(async move { Err(FetchError::UnsupportedLocator(locator)) })
        }
    }

    #[tokio::test]
    async fn test_load_decodes_and_resamples() {
        let bytes = wav_bytes(&vec![0.1; 11_025], 11_025, 1);
        let loaded = load_audio(Arc::new(StaticFetcher(bytes)), "mem://a.wav".to_string(), 22_050, CancelFlag::new())
            .await
            .expect("load should succeed");
        assert_eq!(loaded.sample_rate, 22_050);
        assert!((loaded.duration_secs() - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_load_failure() {
        let result = load_audio(Arc::new(FailingFetcher), "bogus://x".to_string(), 22_050, CancelFlag::new()).await;
        assert!(matches!(result, Err(LoadError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_undecodable_bytes_are_load_failure() {
        let result = load_audio(Arc::new(StaticFetcher(vec![0; 16])), "mem://x.mp3".to_string(), 22_050, CancelFlag::new()).await;
        assert!(matches!(result, Err(LoadError::Decode(_))));
    }

    #[tokio::test]
    async fn test_cancelled_load_skips_decode() {
        let bytes = wav_bytes(&vec![0.1; 11_025], 11_025, 1);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = load_audio(Arc::new(StaticFetcher(bytes)), "mem://a.wav".to_string(), 22_050, cancel).await;
        assert!(matches!(result, Err(LoadError::Cancelled)));
    }
}
