use crate::error::{TubeError, TubeResult};
use crate::supervisor;
use crate::types::TubeOptions;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const YTDLP: &str = "yt-dlp";
const FFMPEG: &str = "ffmpeg";

/// Client hints that get past most bot checks without a logged-in session
const EXTRACTOR_HINTS: &str = "youtube:player_client=android,web,ios;player_skip=webpage";

/// Per-attempt arguments shared by every yt-dlp mode
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub cookies_file: Option<PathBuf>,
    pub cookies_from_browser: Option<String>,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
}

impl ToolContext {
    pub fn with_proxy(&self, proxy: Option<&str>) -> Self {
        Self {
            proxy: proxy.map(str::to_string),
            ..self.clone()
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--socket-timeout".to_string(),
            "10".to_string(),
            "--retries".to_string(),
            "2".to_string(),
            "--force-ipv4".to_string(),
            "--extractor-args".to_string(),
            EXTRACTOR_HINTS.to_string(),
        ];
        if let Some(ua) = &self.user_agent {
            args.push("--user-agent".to_string());
            args.push(ua.clone());
        }
        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        } else if let Some(browser) = &self.cookies_from_browser {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.clone());
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args
    }
}

/// The media extraction tool
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Download the stream matched by `selector` to `output_template`
    /// (a yt-dlp `-o` template)
    async fn download(
        &self,
        url: &str,
        selector: &str,
        output_template: &Path,
        ctx: &ToolContext,
    ) -> TubeResult<()>;

    /// Resolve the direct media URL without downloading
    async fn resolve_url(&self, url: &str, selector: &str, ctx: &ToolContext)
        -> TubeResult<String>;

    async fn title(&self, url: &str, ctx: &ToolContext) -> TubeResult<String>;

    /// Heights of every video-bearing format
    async fn probe_heights(&self, url: &str, ctx: &ToolContext) -> TubeResult<Vec<u32>>;
}

/// The media conversion tool
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Mux a video-only and an audio-only file, re-encoding audio to 192k
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> TubeResult<()>;

    /// Audio-only re-encode to 192k mp3
    async fn to_mp3(&self, input: &Path, output: &Path) -> TubeResult<()>;
}

pub struct YtDlp {
    path: PathBuf,
    extract_timeout: Duration,
    probe_timeout: Duration,
}

impl YtDlp {
    pub fn new(options: &TubeOptions) -> Self {
        Self {
            path: options.ytdlp_path.clone(),
            extract_timeout: options.extract_timeout,
            probe_timeout: options.probe_timeout,
        }
    }

    async fn invoke(&self, args: Vec<String>, timeout: Duration) -> TubeResult<String> {
        debug!(args = ?args, "Invoking yt-dlp");
        let output = supervisor::run(&self.path, &args, timeout).await?;
        Ok(output.check(YTDLP)?.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeResponse {
    #[serde(default)]
    formats: Vec<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    vcodec: Option<String>,
    height: Option<u32>,
}

fn heights_from_probe(json: &str) -> TubeResult<Vec<u32>> {
    let response: ProbeResponse = serde_json::from_str(json)?;
    Ok(response
        .formats
        .into_iter()
        .filter(|f| f.vcodec.as_deref().is_some_and(|codec| codec != "none"))
        .filter_map(|f| f.height.filter(|h| *h > 0))
        .collect())
}

#[async_trait]
impl Extractor for YtDlp {
    async fn download(
        &self,
        url: &str,
        selector: &str,
        output_template: &Path,
        ctx: &ToolContext,
    ) -> TubeResult<()> {
        let mut args = vec![
            "-f".to_string(),
            selector.to_string(),
            "-o".to_string(),
            output_template.to_string_lossy().into_owned(),
        ];
        args.extend(ctx.args());
        args.push(url.to_string());
        self.invoke(args, self.extract_timeout).await.map(|_| ())
    }

    async fn resolve_url(
        &self,
        url: &str,
        selector: &str,
        ctx: &ToolContext,
    ) -> TubeResult<String> {
        let mut args = vec!["-f".to_string(), selector.to_string(), "--get-url".to_string()];
        args.extend(ctx.args());
        args.push(url.to_string());

        let stdout = self.invoke(args, self.extract_timeout).await?;
        stdout
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("http"))
            .map(str::to_string)
            .ok_or_else(|| TubeError::MissingOutput {
                tool: YTDLP.to_string(),
                expected: "media URL".to_string(),
            })
    }

    async fn title(&self, url: &str, ctx: &ToolContext) -> TubeResult<String> {
        let mut args = vec!["--get-title".to_string(), "--skip-download".to_string()];
        args.extend(ctx.args());
        args.push(url.to_string());

        let stdout = self.invoke(args, self.probe_timeout).await?;
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| TubeError::MissingOutput {
                tool: YTDLP.to_string(),
                expected: "title".to_string(),
            })
    }

    async fn probe_heights(&self, url: &str, ctx: &ToolContext) -> TubeResult<Vec<u32>> {
        let mut args = vec!["-J".to_string(), "--skip-download".to_string()];
        args.extend(ctx.args());
        args.push(url.to_string());

        let stdout = self.invoke(args, self.probe_timeout).await?;
        heights_from_probe(&stdout)
    }
}

pub struct Ffmpeg {
    path: PathBuf,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(options: &TubeOptions) -> Self {
        Self {
            path: options.ffmpeg_path.clone(),
            timeout: options.convert_timeout,
        }
    }

    async fn invoke(&self, args: Vec<String>, output: &Path) -> TubeResult<()> {
        debug!(args = ?args, "Invoking ffmpeg");
        supervisor::run(&self.path, &args, self.timeout)
            .await?
            .check(FFMPEG)?;

        if !output.exists() {
            return Err(TubeError::MissingOutput {
                tool: FFMPEG.to_string(),
                expected: output.to_string_lossy().into_owned(),
            });
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> TubeResult<()> {
        let args = vec![
            "-i".to_string(),
            path_arg(video),
            "-i".to_string(),
            path_arg(audio),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-y".to_string(),
            path_arg(output),
        ];
        self.invoke(args, output).await
    }

    async fn to_mp3(&self, input: &Path, output: &Path) -> TubeResult<()> {
        let args = vec![
            "-i".to_string(),
            path_arg(input),
            "-vn".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-y".to_string(),
            path_arg(output),
        ];
        self.invoke(args, output).await
    }
}

/// Fail fast when yt-dlp or ffmpeg cannot be found
pub fn ensure_tools(options: &TubeOptions) -> TubeResult<()> {
    for path in [&options.ytdlp_path, &options.ffmpeg_path] {
        let found = which::which(path).map_err(|_| TubeError::ToolMissing {
            tool: path.to_string_lossy().into_owned(),
        })?;
        info!("Found {} at {}", path.display(), found.display());
    }
    Ok(())
}

/// Browser family guessed from a client user agent, in the spelling
/// yt-dlp's `--cookies-from-browser` expects
pub fn browser_family(user_agent: &str) -> Option<&'static str> {
    let ua = user_agent.to_lowercase();
    // order matters: Edge and Opera also claim Chrome, Chrome also claims Safari
    if ua.contains("edg/") || ua.contains("edge/") {
        Some("edge")
    } else if ua.contains("opr/") || ua.contains("opera") {
        Some("opera")
    } else if ua.contains("firefox/") {
        Some("firefox")
    } else if ua.contains("chrome/") || ua.contains("chromium/") {
        Some("chrome")
    } else if ua.contains("safari/") {
        Some("safari")
    } else {
        None
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_args() {
        let ctx = ToolContext {
            cookies_file: Some(PathBuf::from("/tmp/c.txt")),
            cookies_from_browser: Some("chrome".to_string()),
            proxy: None,
            user_agent: Some("UA".to_string()),
        };
        let args = ctx.args();
        assert!(args.contains(&EXTRACTOR_HINTS.to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--cookies" && w[1] == "/tmp/c.txt"));
        // an explicit cookie file wins over the browser store
        assert!(!args.contains(&"--cookies-from-browser".to_string()));
        assert!(!args.contains(&"--proxy".to_string()));

        let proxied = ctx.with_proxy(Some("socks5://127.0.0.1:1080"));
        assert!(proxied
            .args()
            .windows(2)
            .any(|w| w[0] == "--proxy" && w[1] == "socks5://127.0.0.1:1080"));
    }

    #[test]
    fn test_heights_from_probe_skips_audio_and_zero() {
        let json = r#"{"formats":[
            {"vcodec":"none","height":null},
            {"vcodec":"avc1.640028","height":1080},
            {"vcodec":"vp9","height":720},
            {"vcodec":"vp9","height":0},
            {"height":480}
        ]}"#;
        assert_eq!(heights_from_probe(json).unwrap(), vec![1080, 720]);
        assert!(heights_from_probe("not json").is_err());
    }

    #[test]
    fn test_browser_family() {
        let cases = [
            ("Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 Edg/120.0", Some("edge")),
            ("Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 OPR/105.0", Some("opera")),
            ("Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0", Some("firefox")),
            ("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36", Some("chrome")),
            ("Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15", Some("safari")),
            ("curl/8.4.0", None),
        ];
        for (ua, expected) in cases {
            assert_eq!(browser_family(ua), expected, "{}", ua);
        }
    }

    #[test]
    fn test_ensure_tools_reports_missing_binary() {
        let options = TubeOptions::new().ytdlp_path("tubegrab-missing-ytdlp-7c1e");
        let err = ensure_tools(&options).unwrap_err();
        assert!(matches!(err, TubeError::ToolMissing { tool } if tool.contains("missing-ytdlp")));
    }
}
