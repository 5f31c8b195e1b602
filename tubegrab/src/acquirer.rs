//! One acquisition end to end: quality discovery, planning, extraction
//! with fallbacks, then merge or transcode into the output directory.

use crate::browser::BrowserConverter;
use crate::classifier::ErrorKind;
use crate::cookies::ScopedCookieFile;
use crate::error::{TubeError, TubeResult};
use crate::fallback::{AudioFallback, FallbackInput};
use crate::metadata::MetadataClient;
use crate::planner;
use crate::quality::QualityResolver;
use crate::tools::{Extractor, ToolContext, Transcoder};
use crate::types::{
    AcquisitionResult, Attempt, AttemptOutcome, ExtractionPlan, MediaRequest, QualityReport,
    StreamRole, StreamStep, TubeOptions, MP3,
};
use reqwest::Client;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    ResolvingQuality,
    Planning,
    Extracting,
    Merging,
    DirectFetch,
    Done,
    Error,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::ResolvingQuality => "resolving quality",
            Stage::Planning => "planning",
            Stage::Extracting => "extracting",
            Stage::Merging => "merging",
            Stage::DirectFetch => "direct fetch",
            Stage::Done => "done",
            Stage::Error => "error",
        };
        f.write_str(name)
    }
}

/// Keep alphanumerics, spaces, `_` and `-`, collapse whitespace.
/// Falls back to `placeholder` when nothing survives.
pub fn sanitize_title(title: &str, placeholder: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        placeholder.to_string()
    } else {
        collapsed
    }
}

/// Bookkeeping for a single run
struct Run {
    video_id: String,
    stage: Stage,
    attempts: Vec<Attempt>,
    quality: Option<QualityReport>,
}

impl Run {
    fn new(video_id: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            stage: Stage::Start,
            attempts: Vec::new(),
            quality: None,
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(video_id = %self.video_id, from = %self.stage, to = %stage, "Stage transition");
        self.stage = stage;
    }

    fn record<T>(
        &mut self,
        role: StreamRole,
        selector: &str,
        proxy: Option<&str>,
        result: &TubeResult<T>,
    ) {
        let outcome = match result {
            Ok(_) => AttemptOutcome::Success,
            Err(e) => AttemptOutcome::Failed(e.kind()),
        };
        self.attempts.push(Attempt {
            role,
            selector: selector.to_string(),
            proxy: proxy.map(str::to_string),
            outcome,
        });
    }

    fn mark_last_failed(&mut self, kind: ErrorKind) {
        if let Some(last) = self.attempts.last_mut() {
            last.outcome = AttemptOutcome::Failed(kind);
        }
    }
}

/// Drives one [`MediaRequest`] through the pipeline
pub struct Acquirer {
    options: TubeOptions,
    client: Client,
    extractor: Arc<dyn Extractor>,
    transcoder: Arc<dyn Transcoder>,
    resolver: QualityResolver,
    fallback: AudioFallback,
    default_cookies: Option<Vec<u8>>,
}

impl Acquirer {
    pub fn new(
        options: TubeOptions,
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
    ) -> TubeResult<Self> {
        let client = options.http_client()?;
        let resolver = QualityResolver::new(&options, client.clone(), extractor.clone(), None);
        let fallback = AudioFallback::new(client.clone(), options.effective_user_agent(), None);
        Ok(Self {
            options,
            client,
            extractor,
            transcoder,
            resolver,
            fallback,
            default_cookies: None,
        })
    }

    /// Let the quality heuristic consult the Data API
    pub fn with_metadata(mut self, metadata: Arc<MetadataClient>) -> Self {
        self.resolver = QualityResolver::new(
            &self.options,
            self.client.clone(),
            self.extractor.clone(),
            Some(metadata),
        );
        self
    }

    /// Add the browser tactic to the audio fallback
    pub fn with_converter(mut self, converter: Arc<dyn BrowserConverter>) -> Self {
        self.fallback = AudioFallback::new(
            self.client.clone(),
            self.options.effective_user_agent(),
            Some(converter),
        );
        self
    }

    /// Cookies used when a request brings none of its own
    pub fn with_default_cookies(mut self, cookies: Option<Vec<u8>>) -> Self {
        self.default_cookies = cookies;
        self
    }

    pub fn options(&self) -> &TubeOptions {
        &self.options
    }

    pub async fn acquire(&self, request: &MediaRequest) -> AcquisitionResult {
        info!(
            video_id = request.video_id(),
            quality = request.quality(),
            "Starting acquisition"
        );
        let mut run = Run::new(request.video_id());

        match self.execute(request, &mut run).await {
            Ok(path) => {
                run.enter(Stage::Done);
                info!(output = %path.display(), attempts = run.attempts.len(), "Acquisition complete");
                AcquisitionResult::succeeded(path, run.attempts, run.quality)
            }
            Err(e) => {
                run.enter(Stage::Error);
                warn!(video_id = request.video_id(), kind = ?e.kind(), "Acquisition failed: {}", e);
                AcquisitionResult::failed(&e, run.attempts, run.quality)
            }
        }
    }

    async fn execute(&self, request: &MediaRequest, run: &mut Run) -> TubeResult<PathBuf> {
        // dropped on every exit path, taking partial files and cookies with it
        let scratch = self.scratch_dir()?;

        let raw_cookies = request
            .cookies()
            .map(<[u8]>::to_vec)
            .or_else(|| self.default_cookies.clone());
        let cookie_file = match raw_cookies {
            Some(raw) => ScopedCookieFile::create(&raw, Some(scratch.path()))?,
            None => None,
        };

        let ctx = self.tool_context(
            request.user_agent(),
            cookie_file.as_ref().map(ScopedCookieFile::path),
        );
        let url = format!("{}{}", self.options.watch_base_url, request.video_id());

        tokio::fs::create_dir_all(&self.options.output_dir).await?;

        if request.is_audio() {
            run.enter(Stage::Planning);
            let plan = planner::plan(MP3, None);
            self.acquire_audio(request, &url, &plan, scratch.path(), &ctx, run)
                .await
        } else {
            run.enter(Stage::ResolvingQuality);
            let report = self.resolver.resolve(request.video_id(), &ctx).await;
            run.quality = Some(report.clone());

            run.enter(Stage::Planning);
            let plan = planner::plan(request.quality(), Some(&report));
            debug!(label = %plan.label, target = ?plan.target_height, "Planned extraction");
            self.acquire_video(request, &url, &plan, scratch.path(), &ctx, run)
                .await
        }
    }

    /// Quality tiers on their own, without acquiring anything
    pub async fn resolve_quality(&self, video_id: &str) -> QualityReport {
        self.resolver
            .resolve(video_id, &self.tool_context(None, None))
            .await
    }

    fn tool_context(&self, user_agent: Option<&str>, cookies_file: Option<&Path>) -> ToolContext {
        ToolContext {
            cookies_file: cookies_file.map(Path::to_path_buf),
            cookies_from_browser: self.options.cookies_from_browser.clone(),
            proxy: self.options.proxy.clone(),
            user_agent: user_agent
                .or(self.options.user_agent.as_deref())
                .map(str::to_string),
        }
    }

    fn scratch_dir(&self) -> TubeResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tubegrab-");
        let dir = match &self.options.scratch_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn acquire_video(
        &self,
        request: &MediaRequest,
        url: &str,
        plan: &ExtractionPlan,
        scratch: &Path,
        ctx: &ToolContext,
        run: &mut Run,
    ) -> TubeResult<PathBuf> {
        run.enter(Stage::Extracting);
        let mut files = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            files.push(self.download_step(step, url, scratch, ctx, run).await?);
        }
        let [video, audio] = files.as_slice() else {
            return Err(TubeError::Parse {
                message: format!("expected two streams, planned {}", files.len()),
            });
        };

        run.enter(Stage::Merging);
        let title = self.output_title(request, url, ctx, "video").await;
        // named after what was asked for, not the tier it was capped to
        let label = sanitize_title(request.quality(), "best");
        let output = self.options.output_dir.join(format!(
            "{}_{}.{}",
            title,
            label,
            plan.container.extension()
        ));
        self.transcoder.merge(video, audio, &output).await?;
        Ok(output)
    }

    /// Try each selector of one step in order until a file lands in scratch
    async fn download_step(
        &self,
        step: &StreamStep,
        url: &str,
        scratch: &Path,
        ctx: &ToolContext,
        run: &mut Run,
    ) -> TubeResult<PathBuf> {
        let stem = step.role.file_stem();
        let template = scratch.join(format!("{}.%(ext)s", stem));
        let template = template.as_path();

        let mut last_err: Option<TubeError> = None;
        for selector in &step.selectors {
            if let Some(err) = &last_err {
                self.pause(err).await;
            }
            let selector = selector.as_str();
            let downloaded = self
                .attempt(run, step.role, selector, ctx, |ctx| async move {
                    self.extractor.download(url, selector, template, &ctx).await
                })
                .await;

            match downloaded {
                Ok(((), _)) => match find_output(scratch, stem).await? {
                    Some(path) => return Ok(path),
                    None => {
                        let err = TubeError::MissingOutput {
                            tool: "yt-dlp".to_string(),
                            expected: template.display().to_string(),
                        };
                        run.mark_last_failed(err.kind());
                        last_err = Some(err);
                    }
                },
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| TubeError::Configuration {
            message: format!("no selectors planned for {} stream", stem),
        }))
    }

    async fn acquire_audio(
        &self,
        request: &MediaRequest,
        url: &str,
        plan: &ExtractionPlan,
        scratch: &Path,
        ctx: &ToolContext,
        run: &mut Run,
    ) -> TubeResult<PathBuf> {
        let download = scratch.join("audio.download");
        let selectors: Vec<(StreamRole, String)> = plan
            .steps
            .iter()
            .flat_map(|step| step.selectors.iter().map(|s| (step.role, s.clone())))
            .collect();

        run.enter(Stage::Extracting);
        let mut fetched = false;
        let mut last_err: Option<TubeError> = None;
        for (role, selector) in &selectors {
            if let Some(err) = &last_err {
                self.pause(err).await;
            }
            let selector = selector.as_str();
            let resolved = self
                .attempt(run, *role, selector, ctx, |ctx| async move {
                    self.extractor.resolve_url(url, selector, &ctx).await
                })
                .await;

            match resolved {
                Ok((media_url, proxy)) => {
                    run.enter(Stage::DirectFetch);
                    // media URLs are bound to the address that resolved them
                    let fetch = match self.client_via(proxy.as_deref()) {
                        Ok(client) => self.fallback.fetch(&client, &media_url, &download).await,
                        Err(e) => Err(e),
                    };
                    match fetch {
                        Ok(_) => {
                            fetched = true;
                            break;
                        }
                        Err(e) => {
                            warn!("Fetching resolved stream for {} failed: {}", selector, e);
                            run.mark_last_failed(e.kind());
                            last_err = Some(e);
                            run.enter(Stage::Extracting);
                        }
                    }
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }

        if !fetched {
            info!("Audio ladder exhausted, trying fallback tactics");
            let input = FallbackInput {
                source_url: url.to_string(),
                dest: download.clone(),
            };
            match self.fallback.acquire(&input).await {
                Some((tactic, _)) => info!("Audio recovered by {}", tactic),
                None => {
                    return Err(last_err.unwrap_or_else(|| TubeError::Acquisition {
                        kind: ErrorKind::Unknown,
                        message: "no audio source succeeded".to_string(),
                    }))
                }
            }
        }

        run.enter(Stage::Merging);
        let title = self.output_title(request, url, ctx, "audio").await;
        let output = self
            .options
            .output_dir
            .join(format!("{}.{}", title, plan.container.extension()));
        self.transcoder.to_mp3(&download, &output).await?;
        Ok(output)
    }

    /// Run `op` directly, then once through each alternate proxy while the
    /// failure looks like a block. On success also returns the proxy the
    /// winning attempt went through.
    async fn attempt<T, F, Fut>(
        &self,
        run: &mut Run,
        role: StreamRole,
        selector: &str,
        ctx: &ToolContext,
        op: F,
    ) -> TubeResult<(T, Option<String>)>
    where
        F: Fn(ToolContext) -> Fut,
        Fut: Future<Output = TubeResult<T>>,
    {
        let mut result = op(ctx.clone()).await;
        run.record(role, selector, ctx.proxy.as_deref(), &result);
        let mut proxy_used = ctx.proxy.clone();

        for proxy in &self.options.proxies {
            match &result {
                Err(e) if matches!(e.kind(), ErrorKind::Blocked | ErrorKind::RateLimited) => {}
                _ => break,
            }
            info!("Retrying {} through proxy {}", selector, proxy);
            result = op(ctx.with_proxy(Some(proxy))).await;
            run.record(role, selector, Some(proxy), &result);
            proxy_used = Some(proxy.clone());
        }
        result.map(|value| (value, proxy_used))
    }

    /// HTTP client whose traffic leaves through `proxy`
    fn client_via(&self, proxy: Option<&str>) -> TubeResult<Client> {
        if proxy == self.options.proxy.as_deref() {
            return Ok(self.client.clone());
        }
        let mut options = self.options.clone();
        options.proxy = proxy.map(str::to_string);
        options.http_client()
    }

    async fn pause(&self, err: &TubeError) {
        let delay = err.kind().retry_delay(self.options.retry_delay);
        if !delay.is_zero() {
            debug!("Waiting {:?} before next selector", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn output_title(
        &self,
        request: &MediaRequest,
        url: &str,
        ctx: &ToolContext,
        placeholder: &str,
    ) -> String {
        if let Some(title) = request.title() {
            return sanitize_title(title, placeholder);
        }
        match self.extractor.title(url, ctx).await {
            Ok(title) => sanitize_title(&title, placeholder),
            Err(e) => {
                debug!("Title lookup failed, using placeholder: {}", e);
                placeholder.to_string()
            }
        }
    }
}

fn is_partial(name: &str) -> bool {
    name.contains(".part") || name.ends_with(".ytdl") || name.ends_with(".temp")
}

/// The finished file for `stem`, ignoring partial downloads
async fn find_output(scratch: &Path, stem: &str) -> TubeResult<Option<PathBuf>> {
    let prefix = format!("{}.", stem);
    let mut entries = tokio::fs::read_dir(scratch).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && !is_partial(&name) {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::stub::StubConverter;
    use crate::tools::stub::{StubExtractor, StubTranscoder};
    use std::time::Duration;

    const URL: &str = "https://youtu.be/dQw4w9WgXcQ";
    const FORBIDDEN: &str = "ERROR: unable to download video data: HTTP Error 403: Forbidden";

    struct Fixture {
        _dirs: (tempfile::TempDir, tempfile::TempDir),
        output_dir: PathBuf,
        scratch_dir: PathBuf,
        options: TubeOptions,
    }

    fn fixture(server: &mockito::ServerGuard) -> Fixture {
        let output = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let options = TubeOptions::new()
            .timeout(5)
            .retry_delay(Duration::ZERO)
            .output_dir(output.path())
            .scratch_dir(scratch.path())
            .watch_base_url(format!("{}/watch?v=", server.url()));
        Fixture {
            output_dir: output.path().to_path_buf(),
            scratch_dir: scratch.path().to_path_buf(),
            _dirs: (output, scratch),
            options,
        }
    }

    fn acquirer(options: TubeOptions, extractor: Arc<StubExtractor>) -> Acquirer {
        Acquirer::new(options, extractor, Arc::new(StubTranscoder)).unwrap()
    }

    fn is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("My Song! (Official Video)", "audio"), "My Song Official Video");
        assert_eq!(sanitize_title("  a\t b_c-d  ", "audio"), "a b_c-d");
        assert_eq!(sanitize_title("???", "video"), "video");
        assert_eq!(sanitize_title("Café ☕ Live", "video"), "Café Live");
    }

    #[tokio::test]
    async fn test_mp3_walks_ladder_until_a_selector_works() {
        let mut server = mockito::Server::new_async().await;
        let media = server
            .mock("GET", "/media.m4a")
            .with_status(200)
            .with_body(vec![7u8; 4096])
            .create_async()
            .await;

        let fx = fixture(&server);
        let extractor = Arc::new(
            StubExtractor::new(&format!("{}/media.m4a", server.url()))
                .fail("bestaudio", FORBIDDEN)
                .fail("best[height<=480]", FORBIDDEN)
                .title("My Song! (Live)"),
        );
        let request = MediaRequest::from_url(URL, "mp3").unwrap();
        let result = acquirer(fx.options.clone(), extractor.clone())
            .acquire(&request)
            .await;

        media.assert_async().await;
        assert!(result.success, "{:?}", result.message);
        assert_eq!(result.attempts.len(), 3);
        assert_eq!(result.attempts[2].selector, "worstaudio");
        assert_eq!(result.attempts[2].outcome, AttemptOutcome::Success);
        assert!(result.quality.is_none());

        let output = result.output_path.unwrap();
        assert_eq!(output, fx.output_dir.join("My Song Live.mp3"));
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 4096);
        assert!(is_empty(&fx.scratch_dir));
    }

    #[tokio::test]
    async fn test_video_downloads_both_streams_and_merges() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/watch")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"ytInitialPlayerResponse = {"streamingData":{"adaptiveFormats":[{"height":1080},{"height":720}]}};"#)
            .create_async()
            .await;

        let fx = fixture(&server);
        let extractor = Arc::new(StubExtractor::new("").title("Big Buck Bunny"));
        let request = MediaRequest::from_url(URL, "4K").unwrap();
        let result = acquirer(fx.options.clone(), extractor.clone())
            .acquire(&request)
            .await;

        assert!(result.success, "{:?}", result.message);
        assert_eq!(
            extractor.selectors_tried(),
            vec!["bestvideo[height<=1080]", "bestaudio"]
        );
        let quality = result.quality.unwrap();
        assert_eq!(quality.max_height, 1080);

        let output = result.output_path.unwrap();
        // capped to the 1080p tier, named after the requested label
        assert_eq!(output, fx.output_dir.join("Big Buck Bunny_4K.mp4"));
        assert_eq!(std::fs::read(&output).unwrap(), b"stub mediastub media");
        assert!(is_empty(&fx.scratch_dir));
    }

    #[tokio::test]
    async fn test_selector_fallback_within_step() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let fx = fixture(&server);
        let extractor = Arc::new(
            StubExtractor::new("")
                .fail("bestvideo[height<=720]", "ERROR: Requested format is not available")
                .fail("bestaudio", FORBIDDEN),
        );
        let request = MediaRequest::from_url(URL, "720p").unwrap();
        let result = acquirer(fx.options.clone(), extractor.clone())
            .acquire(&request)
            .await;

        assert!(result.success, "{:?}", result.message);
        assert_eq!(
            extractor.selectors_tried(),
            vec!["bestvideo[height<=720]", "bestvideo", "bestaudio", "bestaudio*"]
        );
        // no title available
        assert_eq!(result.output_path.unwrap(), fx.output_dir.join("video_720p.mp4"));
    }

    #[tokio::test]
    async fn test_unavailable_video_stops_early_and_cleans_scratch() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let fx = fixture(&server);
        let extractor = Arc::new(
            StubExtractor::new("").fail("bestvideo[height<=1080]", "ERROR: Private video. Sign in if you've been granted access"),
        );
        let request = MediaRequest::from_url(URL, "1080p")
            .unwrap()
            .with_cookies(".youtube.com\tTRUE\t/\tTRUE\t0\tSID\tabc");
        let result = acquirer(fx.options.clone(), extractor.clone())
            .acquire(&request)
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Unavailable));
        assert_eq!(result.attempts.len(), 1);
        assert!(result.diagnostics.contains("Private video"));
        assert!(is_empty(&fx.scratch_dir));
        assert!(is_empty(&fx.output_dir));
    }

    #[tokio::test]
    async fn test_blocked_attempt_retries_through_each_proxy() {
        // the mock server doubles as the alternate proxy
        let mut server = mockito::Server::new_async().await;
        let media = server
            .mock("GET", "/media.m4a")
            .match_header("host", "media.example.test")
            .with_status(200)
            .with_body(vec![1u8; 2048])
            .create_async()
            .await;

        let fx = fixture(&server);
        let proxy = server.url();
        let options = fx.options.clone().proxies(vec![proxy.clone()]);
        let extractor = Arc::new(
            StubExtractor::new("http://media.example.test/media.m4a")
                .fail("bestaudio", "ERROR: Sign in to confirm you're not a bot"),
        );
        let request = MediaRequest::from_url(URL, "mp3")
            .unwrap()
            .with_title("Proxy Song");
        let result = acquirer(options, extractor.clone()).acquire(&request).await;

        assert!(result.success, "{:?}", result.message);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failed(ErrorKind::Blocked));
        assert_eq!(result.attempts[1].proxy.as_deref(), Some(proxy.as_str()));
        // the stream was fetched through the proxy that resolved it
        media.assert_async().await;
        assert_eq!(result.output_path.unwrap(), fx.output_dir.join("Proxy Song.mp3"));
    }

    #[tokio::test]
    async fn test_find_output_skips_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["video.mp4.part-Frag3", "video.mp4.part", "video.temp", "audio.m4a"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert!(find_output(dir.path(), "video").await.unwrap().is_none());
        assert_eq!(
            find_output(dir.path(), "audio").await.unwrap(),
            Some(dir.path().join("audio.m4a"))
        );

        std::fs::write(dir.path().join("video.mp4"), b"x").unwrap();
        assert_eq!(
            find_output(dir.path(), "video").await.unwrap(),
            Some(dir.path().join("video.mp4"))
        );
    }

    #[tokio::test]
    async fn test_exhausted_ladder_uses_browser_tactic() {
        let mut server = mockito::Server::new_async().await;
        let _converted = server
            .mock("GET", "/converted.mp3")
            .with_status(200)
            .with_body(vec![3u8; 1500])
            .create_async()
            .await;

        let fx = fixture(&server);
        let mut extractor = StubExtractor::new("");
        for selector in planner::AUDIO_LADDER {
            extractor = extractor.fail(selector, FORBIDDEN);
        }
        let converter = StubConverter::returning(&format!("{}/converted.mp3", server.url()));
        let acquirer = acquirer(fx.options.clone(), Arc::new(extractor))
            .with_converter(Arc::new(converter));

        let request = MediaRequest::from_url(URL, "MP3").unwrap();
        let result = acquirer.acquire(&request).await;

        assert!(result.success, "{:?}", result.message);
        assert_eq!(result.attempts.len(), planner::AUDIO_LADDER.len());
        assert_eq!(
            std::fs::metadata(result.output_path.unwrap()).unwrap().len(),
            1500
        );
    }

    #[tokio::test]
    async fn test_all_audio_sources_failing_reports_last_error() {
        let server = mockito::Server::new_async().await;
        let fx = fixture(&server);
        let mut extractor = StubExtractor::new("");
        for selector in planner::AUDIO_LADDER {
            extractor = extractor.fail(selector, FORBIDDEN);
        }
        let acquirer = acquirer(fx.options.clone(), Arc::new(extractor))
            .with_converter(Arc::new(StubConverter::failing()));

        let request = MediaRequest::from_url(URL, "mp3").unwrap();
        let result = acquirer.acquire(&request).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Unknown));
        assert!(result.message.unwrap().contains("403"));
        assert!(is_empty(&fx.scratch_dir));
    }
}
