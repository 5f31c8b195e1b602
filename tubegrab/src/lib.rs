pub mod acquirer;
pub mod batch;
pub mod browser;
pub mod cascade;
pub mod classifier;
pub mod cookies;
pub mod error;
pub mod fallback;
pub mod metadata;
pub mod parser;
pub mod planner;
pub mod progress;
pub mod quality;
pub mod search;
pub mod storage;
pub mod supervisor;
pub mod tools;
pub mod types;

pub use acquirer::Acquirer;
pub use batch::{parse_song_list, BatchRunner, BatchTicket};
pub use classifier::{classify, ErrorKind};
pub use error::{TubeError, TubeResult};
pub use progress::{JobStatus, ProgressState, ProgressTracker};
pub use storage::{SupabaseStorage, Uploader};
pub use types::{
    AcquisitionResult, BrowserOptions, MediaRequest, QualityReport, TubeOptions, VideoMetadata,
};

use browser::ChromiumConverter;
use metadata::MetadataClient;
use search::SearchClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tools::{Extractor, Ffmpeg, Transcoder, YtDlp};
use tracing::{debug, info};

/// Main entry point: one engine shared by single acquisitions and batches
pub struct TubeGrab {
    options: TubeOptions,
    acquirer: Arc<Acquirer>,
    metadata: Arc<MetadataClient>,
    tracker: ProgressTracker,
}

impl TubeGrab {
    /// Build an engine around the real yt-dlp and ffmpeg. Fails fast when
    /// either tool is missing.
    pub fn new(options: TubeOptions) -> TubeResult<Self> {
        tools::ensure_tools(&options)?;
        let extractor = Arc::new(YtDlp::new(&options));
        let transcoder = Arc::new(Ffmpeg::new(&options));
        Self::with_tools(options, extractor, transcoder)
    }

    /// Build an engine around the given tool implementations
    pub fn with_tools(
        options: TubeOptions,
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
    ) -> TubeResult<Self> {
        let tracker = ProgressTracker::new();
        let metadata = Arc::new(MetadataClient::new(&options)?);

        let mut acquirer = Acquirer::new(options.clone(), extractor, transcoder)?
            .with_default_cookies(cookies::from_env());
        if metadata.has_api_key() {
            acquirer = acquirer.with_metadata(metadata.clone());
        }
        let converter = ChromiumConverter::new(options.browser.clone(), Some(tracker.clone()));
        if converter.is_configured() {
            debug!("Browser conversion tactic enabled");
            acquirer = acquirer.with_converter(Arc::new(converter));
        }

        Ok(Self {
            options,
            acquirer: Arc::new(acquirer),
            metadata,
            tracker,
        })
    }

    pub fn options(&self) -> &TubeOptions {
        &self.options
    }

    /// Acquire `url` at `quality` (`"1080p"`, `"2K"`, `"best"`, `"mp3"`...).
    ///
    /// Only a malformed link is an `Err`; acquisition failures are reported
    /// in the result.
    pub async fn acquire(&self, url: &str, quality: &str) -> TubeResult<AcquisitionResult> {
        let request = MediaRequest::from_url(url, quality)?;
        Ok(self.acquire_request(&request).await)
    }

    pub async fn acquire_request(&self, request: &MediaRequest) -> AcquisitionResult {
        self.acquirer.acquire(request).await
    }

    /// Re-run a failed acquisition while its failure kind is retryable
    pub async fn acquire_with_retry(
        &self,
        request: &MediaRequest,
        max_retries: u32,
    ) -> AcquisitionResult {
        let mut retries = 0;
        loop {
            let result = self.acquire_request(request).await;
            let Some(kind) = result.error_kind else {
                return result;
            };
            if retries >= max_retries || !kind.is_retryable() {
                return result;
            }

            retries += 1;
            let delay = kind.retry_delay(self.options.retry_delay);
            debug!(
                "Retrying in {:?} (attempt {} of {})",
                delay, retries, max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Available quality tiers for `url`
    pub async fn quality(&self, url: &str) -> TubeResult<QualityReport> {
        let parsed = parser::parse_url(url)?;
        Ok(self.acquirer.resolve_quality(&parsed.video_id).await)
    }

    /// Data API metadata for `url`. Needs an API key.
    pub async fn metadata(&self, url: &str) -> TubeResult<VideoMetadata> {
        let parsed = parser::parse_url(url)?;
        self.metadata.video(&parsed.video_id).await
    }

    /// Save the video's thumbnail into `dir`, named after the video ID
    pub async fn thumbnail(&self, url: &str, dir: &Path) -> TubeResult<Option<PathBuf>> {
        let parsed = parser::parse_url(url)?;
        self.metadata
            .download_thumbnail(&parsed.video_id, dir, &parsed.video_id)
            .await
    }

    /// A batch runner sharing this engine's tracker
    pub fn batch(&self) -> TubeResult<BatchRunner> {
        let search = SearchClient::new(&self.options)?;
        info!("Preparing batch runner");
        Ok(BatchRunner::new(
            self.acquirer.clone(),
            Arc::new(search),
            self.tracker.clone(),
        ))
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn progress(&self) -> ProgressState {
        self.tracker.snapshot()
    }
}

// Convenience functions for one-off operations

/// Acquire `url` with default options
pub async fn download(url: &str, quality: &str) -> TubeResult<AcquisitionResult> {
    let engine = TubeGrab::new(TubeOptions::from_env())?;
    engine.acquire(url, quality).await
}

/// Quality tiers for `url` with default options
pub async fn list_qualities(url: &str) -> TubeResult<QualityReport> {
    let engine = TubeGrab::new(TubeOptions::from_env())?;
    engine.quality(url).await
}

/// Metadata for `url`, reading the API key from the environment
pub async fn get_metadata(url: &str) -> TubeResult<VideoMetadata> {
    let options = TubeOptions::from_env();
    MetadataClient::new(&options)?
        .video(&parser::parse_url(url)?.video_id)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::stub::{StubExtractor, StubTranscoder};
    use std::time::Duration;

    fn engine(options: TubeOptions, extractor: StubExtractor) -> TubeGrab {
        TubeGrab::with_tools(options, Arc::new(extractor), Arc::new(StubTranscoder)).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_url_is_an_error() {
        let engine = engine(TubeOptions::default(), StubExtractor::new(""));
        let err = engine
            .acquire("https://www.google.com/", "best")
            .await
            .unwrap_err();
        assert!(matches!(err, TubeError::InvalidUrl { .. }));

        let err = engine.quality("https://youtu.be/short").await.unwrap_err();
        assert!(matches!(err, TubeError::InvalidVideoId { .. }));
    }

    #[tokio::test]
    async fn test_metadata_without_key_is_configuration_error() {
        let engine = engine(TubeOptions::default(), StubExtractor::new(""));
        let err = engine
            .metadata("https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert!(matches!(err, TubeError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_quality_report_through_engine() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/watch")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"ytInitialPlayerResponse = {"streamingData":{"adaptiveFormats":[{"height":2160},{"height":1080}]}};"#)
            .create_async()
            .await;

        let options = TubeOptions::new().watch_base_url(format!("{}/watch?v=", server.url()));
        let report = engine(options, StubExtractor::new(""))
            .quality("https://www.youtube.com/shorts/dQw4w9WgXcQ")
            .await
            .unwrap();
        assert_eq!(report.max_height, 2160);
        assert_eq!(report.max_label, "4K");
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_failure() {
        let output = tempfile::tempdir().unwrap();
        let options = TubeOptions::new()
            .retry_delay(Duration::ZERO)
            .output_dir(output.path());
        let extractor = StubExtractor::new("").fail("bestaudio", "ERROR: Video unavailable");
        let engine = engine(options, extractor);

        let request = MediaRequest::from_url("dQw4w9WgXcQ", "mp3").unwrap();
        let result = engine.acquire_with_retry(&request, 3).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Unavailable));
        assert_eq!(result.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_shares_engine_tracker() {
        let engine = engine(TubeOptions::default(), StubExtractor::new(""));
        let runner = engine.batch().unwrap();
        assert_eq!(runner.steps_per_item(), 2);

        let _guard = engine.tracker().claim_worker().unwrap();
        assert!(matches!(
            runner.start("1. Song"),
            Err(TubeError::BatchInProgress)
        ));
        assert_eq!(engine.progress().status, JobStatus::Idle);
    }
}
