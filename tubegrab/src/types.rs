use crate::classifier::ErrorKind;
use crate::error::{TubeError, TubeResult};
use crate::parser::IdentifierParser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// Requested quality used when a label is missing or unusable
pub const BEST: &str = "best";
pub const MP3: &str = "mp3";

/// One acquisition request. Built from a link through the identifier parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRequest {
    video_id: String,
    quality: String,
    is_shorts: bool,
    cookies: Option<Vec<u8>>,
    user_agent: Option<String>,
    title: Option<String>,
}

impl MediaRequest {
    pub fn from_url(url: &str, quality: &str) -> TubeResult<Self> {
        let parsed = IdentifierParser::new().parse(url)?;
        let quality = quality.trim();
        Ok(Self {
            video_id: parsed.video_id,
            quality: if quality.is_empty() {
                BEST.to_string()
            } else {
                quality.to_string()
            },
            is_shorts: parsed.is_shorts,
            cookies: None,
            user_agent: None,
            title: None,
        })
    }

    /// Attach raw Netscape cookie bytes
    pub fn with_cookies(mut self, cookies: impl Into<Vec<u8>>) -> Self {
        self.cookies = Some(cookies.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Name the output file after `title` instead of looking it up
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn quality(&self) -> &str {
        &self.quality
    }

    pub fn is_shorts(&self) -> bool {
        self.is_shorts
    }

    pub fn is_audio(&self) -> bool {
        self.quality.eq_ignore_ascii_case(MP3)
    }

    pub fn cookies(&self) -> Option<&[u8]> {
        self.cookies.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

/// Which detection strategy produced a [`QualityReport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    WebpageScrape,
    MetadataQuery,
    ToolProbe,
    Heuristic,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provenance::WebpageScrape => "webpage scrape",
            Provenance::MetadataQuery => "metadata query",
            Provenance::ToolProbe => "tool probe",
            Provenance::Heuristic => "heuristic",
        };
        f.write_str(name)
    }
}

/// Available resolution tiers for one video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    pub max_height: u32,
    /// Strictly descending, no duplicates
    pub heights: Vec<u32>,
    pub max_label: String,
    pub labels: Vec<String>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Mp3,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mp3 => "mp3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamRole {
    VideoOnly,
    AudioOnly,
    Combined,
}

impl StreamRole {
    /// Scratch file stem the extraction tool writes for this role
    pub fn file_stem(&self) -> &'static str {
        match self {
            StreamRole::VideoOnly => "video",
            StreamRole::AudioOnly | StreamRole::Combined => "audio",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchMode {
    DownloadToPath,
    ResolveUrl,
}

/// One stream to fetch, with its fallback selectors in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStep {
    pub role: StreamRole,
    pub mode: FetchMode,
    /// Never empty; the last entry is the most permissive for the role
    pub selectors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionPlan {
    /// Label used in the output file name (`1080p`, `best`, `mp3`)
    pub label: String,
    pub container: Container,
    /// `None` means unbounded
    pub target_height: Option<u32>,
    pub steps: Vec<StreamStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failed(ErrorKind),
}

/// One extraction attempt against one selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub role: StreamRole,
    pub selector: String,
    pub proxy: Option<String>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionResult {
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub error_kind: Option<ErrorKind>,
    /// User-facing message for failures
    pub message: Option<String>,
    pub diagnostics: String,
    pub attempts: Vec<Attempt>,
    pub quality: Option<QualityReport>,
}

impl AcquisitionResult {
    pub fn succeeded(
        output_path: PathBuf,
        attempts: Vec<Attempt>,
        quality: Option<QualityReport>,
    ) -> Self {
        Self {
            success: true,
            output_path: Some(output_path),
            error_kind: None,
            message: None,
            diagnostics: String::new(),
            attempts,
            quality,
        }
    }

    pub fn failed(
        err: &TubeError,
        attempts: Vec<Attempt>,
        quality: Option<QualityReport>,
    ) -> Self {
        let kind = err.kind();
        let diagnostics = err.diagnostics();
        Self {
            success: false,
            output_path: None,
            error_kind: Some(kind),
            message: Some(kind.describe(&diagnostics)),
            diagnostics,
            attempts,
            quality,
        }
    }
}

/// Video metadata from the Data API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub video_id: String,
    pub title: String,
    pub channel_title: String,
    pub channel_id: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub channel_thumbnail_url: Option<String>,
    /// `hd` or `sd`
    pub definition: Option<String>,
    pub duration: Option<String>,
    pub view_count: Option<String>,
    pub like_count: Option<String>,
    pub subscriber_count: Option<String>,
}

/// Headless browser settings for the conversion-page tactic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserOptions {
    pub chrome_path: Option<PathBuf>,
    /// Conversion page; the tactic is skipped when unset
    pub converter_url: Option<String>,
    pub input_selector: String,
    pub submit_selector: String,
    pub completion_selector: String,
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub screenshot_dir: PathBuf,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            converter_url: None,
            input_selector: "input[type='text'], input[type='url'], input[name='url']".to_string(),
            submit_selector: "button[type='submit'], input[type='submit']".to_string(),
            completion_selector: "a[download], a[href$='.mp3'], button.download".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport: (1920, 1080),
            poll_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(90),
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TubeOptions {
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Budget for a single yt-dlp download or URL resolution
    pub extract_timeout: Duration,
    /// Budget for title lookups and format probes
    pub probe_timeout: Duration,
    /// Budget for an ffmpeg merge or transcode
    pub convert_timeout: Duration,
    pub retry_delay: Duration,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    /// Alternate proxies tried once each when a step is blocked
    pub proxies: Vec<String>,
    pub cookies_from_browser: Option<String>,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub output_dir: PathBuf,
    pub scratch_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub watch_base_url: String,
    pub search_base_url: String,
    pub api_base_url: String,
    pub thumbnail_base_url: String,
    pub browser: BrowserOptions,
}

impl Default for TubeOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            extract_timeout: Duration::from_secs(90),
            probe_timeout: Duration::from_secs(30),
            convert_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_secs(2),
            user_agent: None,
            proxy: None,
            proxies: Vec::new(),
            cookies_from_browser: None,
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            output_dir: PathBuf::from("downloads"),
            scratch_dir: None,
            api_key: None,
            watch_base_url: "https://www.youtube.com/watch?v=".to_string(),
            search_base_url: "https://www.youtube.com/results?search_query=".to_string(),
            api_base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            thumbnail_base_url: "https://i.ytimg.com/vi".to_string(),
            browser: BrowserOptions::default(),
        }
    }
}

impl TubeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `TUBEGRAB_PROXY`, `YOUTUBE_API_KEY`, `CHROME_BIN`
    /// and `TUBEGRAB_CONVERTER_URL`
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(proxy) = get("TUBEGRAB_PROXY") {
            self.proxy = Some(proxy);
        }
        if let Some(key) = get("YOUTUBE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(chrome) = get("CHROME_BIN") {
            self.browser.chrome_path = Some(PathBuf::from(chrome));
        }
        if let Some(converter) = get("TUBEGRAB_CONVERTER_URL") {
            self.browser.converter_url = Some(converter);
        }
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn convert_timeout(mut self, timeout: Duration) -> Self {
        self.convert_timeout = timeout;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn proxies(mut self, proxies: Vec<String>) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn cookies_from_browser(mut self, browser: impl Into<String>) -> Self {
        self.cookies_from_browser = Some(browser.into());
        self
    }

    pub fn ytdlp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ytdlp_path = path.into();
        self
    }

    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn watch_base_url(mut self, url: impl Into<String>) -> Self {
        self.watch_base_url = url.into();
        self
    }

    pub fn search_base_url(mut self, url: impl Into<String>) -> Self {
        self.search_base_url = url.into();
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn thumbnail_base_url(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_base_url = url.into();
        self
    }

    pub fn browser(mut self, browser: BrowserOptions) -> Self {
        self.browser = browser;
        self
    }

    /// User agent for HTTP requests and tool invocations
    pub fn effective_user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    /// Shared HTTP client with browser-like headers
    pub fn http_client(&self) -> TubeResult<reqwest::Client> {
        use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(self.effective_user_agent()).map_err(|_| {
                TubeError::Configuration {
                    message: "Invalid user agent".to_string(),
                }
            })?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(self.timeout_seconds))
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(proxy_url) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| TubeError::Configuration {
                message: format!("Invalid proxy URL: {}", e),
            })?;
            builder = builder.proxy(proxy);
        }

        builder.build().map_err(|e| TubeError::Configuration {
            message: format!("Failed to create HTTP client: {}", e),
        })
    }
}
