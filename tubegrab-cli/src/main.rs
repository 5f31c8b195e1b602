use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tubegrab::metadata::MetadataClient;
use tubegrab::tools::browser_family;
use tubegrab::{
    AcquisitionResult, ErrorKind, JobStatus, MediaRequest, SupabaseStorage, TubeError, TubeGrab,
    TubeOptions,
};

#[derive(Parser)]
#[command(name = "tubegrab")]
#[command(version, about = "Download YouTube videos as mp4 or audio as mp3")]
#[command(long_about = None)]
struct Cli {
    /// YouTube video URL or video ID
    #[arg(value_name = "URL")]
    url: Option<String>,

    /// Quality label: 1080p, 720p, 2K, 4K, best or mp3
    #[arg(short, long, default_value = "best")]
    quality: String,

    /// Directory finished files are written to
    #[arg(short, long, default_value = "downloads")]
    output_dir: PathBuf,

    /// Netscape cookies.txt to pass to yt-dlp
    #[arg(long, value_name = "FILE")]
    cookies: Option<PathBuf>,

    /// Let yt-dlp read cookies from a local browser ("auto" picks the
    /// browser matching --user-agent)
    #[arg(long, value_name = "BROWSER")]
    cookies_from_browser: Option<String>,

    /// Custom User-Agent string
    #[arg(long)]
    user_agent: Option<String>,

    /// Proxy URL (http://proxy:port)
    #[arg(long)]
    proxy: Option<String>,

    /// Alternate proxy tried when YouTube blocks a request (repeatable)
    #[arg(long = "alt-proxy", value_name = "URL")]
    alt_proxies: Vec<String>,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Base delay between retries in seconds
    #[arg(long, default_value = "2")]
    retry_delay: u64,

    /// Extra full attempts when a download fails for a retryable reason
    #[arg(long, default_value = "1")]
    max_retries: u32,

    /// Path to the yt-dlp binary
    #[arg(long, default_value = "yt-dlp")]
    ytdlp: PathBuf,

    /// Path to the ffmpeg binary
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// YouTube Data API key (defaults to YOUTUBE_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Conversion page used as the last audio fallback
    #[arg(long)]
    converter_url: Option<String>,

    /// Show video metadata
    #[arg(long)]
    info: bool,

    /// List the available quality tiers
    #[arg(long)]
    formats: bool,

    /// Save the video thumbnail into this directory
    #[arg(long, value_name = "DIR")]
    thumbnail: Option<PathBuf>,

    /// Numbered song list to search and download as mp3
    #[arg(long, value_name = "FILE")]
    batch: Option<PathBuf>,

    /// With --batch, only search for the songs
    #[arg(long)]
    search_only: bool,

    /// With --batch, upload each mp3 to Supabase storage
    #[arg(long)]
    upload: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let options = build_options(&cli);

    if let Some(path) = &cli.batch {
        let list = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read song list {}", path.display()))?;
        return run_batch(&cli, options, &list).await;
    }

    let Some(url) = cli.url.as_deref() else {
        bail!("Provide a video URL or --batch FILE");
    };
    info!("Starting tubegrab for URL: {}", url);

    // validate the link before looking for tools
    let mut request = match MediaRequest::from_url(url, &cli.quality) {
        Ok(request) => request,
        Err(e) => {
            handle_error(&e);
            std::process::exit(1);
        }
    };
    if let Some(path) = &cli.cookies {
        let raw = fs::read(path)
            .await
            .with_context(|| format!("Failed to read cookies {}", path.display()))?;
        request = request.with_cookies(raw);
    }

    if cli.info {
        return show_metadata(&options, &request).await;
    }

    let engine = match TubeGrab::new(options) {
        Ok(engine) => engine,
        Err(e) => {
            handle_error(&e);
            std::process::exit(1);
        }
    };

    if cli.formats {
        return list_formats(&engine, &request, cli.json).await;
    }
    if let Some(dir) = &cli.thumbnail {
        save_thumbnail(&engine, &request, dir).await;
    }

    download(&engine, &request, &cli).await
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "tubegrab_cli=debug,tubegrab=debug".into())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "tubegrab_cli=info,tubegrab=info".into())
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(verbose),
        )
        .with(env_filter)
        .init();
}

/// "auto" resolves to the browser family of the user agent
fn cookie_browser(requested: &str, user_agent: Option<&str>) -> Option<String> {
    if requested.eq_ignore_ascii_case("auto") {
        let family = user_agent.and_then(browser_family);
        debug!("Browser for cookies resolved to {:?}", family);
        family.map(str::to_string)
    } else {
        Some(requested.to_string())
    }
}

/// Build TubeOptions from CLI arguments
fn build_options(cli: &Cli) -> TubeOptions {
    let mut options = TubeOptions::from_env()
        .timeout(cli.timeout)
        .retry_delay(Duration::from_secs(cli.retry_delay))
        .output_dir(&cli.output_dir)
        .ytdlp_path(&cli.ytdlp)
        .ffmpeg_path(&cli.ffmpeg)
        .proxies(cli.alt_proxies.clone());

    if let Some(user_agent) = &cli.user_agent {
        options = options.user_agent(user_agent);
    }

    if let Some(proxy) = &cli.proxy {
        options = options.proxy(proxy);
    }

    if let Some(api_key) = &cli.api_key {
        options = options.api_key(api_key);
    }

    if let Some(browser) = &cli.cookies_from_browser {
        if let Some(browser) = cookie_browser(browser, cli.user_agent.as_deref()) {
            options = options.cookies_from_browser(browser);
        }
    }

    if let Some(converter_url) = &cli.converter_url {
        let mut browser = options.browser.clone();
        browser.converter_url = Some(converter_url.clone());
        options = options.browser(browser);
    }

    options
}

/// Acquire one video or audio track
async fn download(engine: &TubeGrab, request: &MediaRequest, cli: &Cli) -> anyhow::Result<()> {
    println!(
        "Downloading {} ({}) for video: {}",
        if request.is_audio() { "audio" } else { "video" },
        request.quality(),
        request.video_id()
    );

    let result = engine.acquire_with_retry(request, cli.max_retries).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    if !result.success {
        report_failure(&result);
        std::process::exit(1);
    }

    if let Some(path) = &result.output_path {
        println!("✅ Successfully saved to: {}", path.display());
    }
    if let Some(quality) = &result.quality {
        info!(
            "Best available quality was {} ({})",
            quality.max_label, quality.provenance
        );
    }
    debug!("Finished after {} attempts", result.attempts.len());
    Ok(())
}

/// Show Data API metadata
async fn show_metadata(options: &TubeOptions, request: &MediaRequest) -> anyhow::Result<()> {
    println!("Getting metadata for video: {}", request.video_id());

    let client = MetadataClient::new(options)?;
    if !client.has_api_key() {
        eprintln!("❌ Video metadata needs a YouTube Data API key");
        eprintln!("   Set YOUTUBE_API_KEY or pass --api-key.");
        std::process::exit(1);
    }

    match client.video(request.video_id()).await {
        Ok(metadata) => {
            println!("\nVideo Information:");
            println!("Title: {}", metadata.title);
            println!("Channel: {}", metadata.channel_title);
            println!("Video ID: {}", metadata.video_id);
            if let Some(duration) = &metadata.duration {
                println!("Duration: {}", duration);
            }
            if let Some(definition) = &metadata.definition {
                println!("Definition: {}", definition.to_uppercase());
            }
            if let Some(views) = &metadata.view_count {
                println!("Views: {}", views);
            }
            if let Some(likes) = &metadata.like_count {
                println!("Likes: {}", likes);
            }
            if let Some(subscribers) = &metadata.subscriber_count {
                println!("Subscribers: {}", subscribers);
            }
            println!("URL: {}", request.watch_url());
        }
        Err(e) => {
            handle_error(&e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// List detected quality tiers
async fn list_formats(engine: &TubeGrab, request: &MediaRequest, json: bool) -> anyhow::Result<()> {
    let report = engine.quality(&request.watch_url()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Available qualities for {} (detected by {}):",
        request.video_id(),
        report.provenance
    );
    println!("{}", "─".repeat(40));
    for (height, label) in report.heights.iter().zip(report.labels.iter()) {
        println!("{:<8} {}", height, label);
    }
    println!("Best: {}", report.max_label);
    Ok(())
}

async fn save_thumbnail(engine: &TubeGrab, request: &MediaRequest, dir: &std::path::Path) {
    match engine.thumbnail(&request.watch_url(), dir).await {
        Ok(Some(path)) => println!("Saved thumbnail to: {}", path.display()),
        Ok(None) => eprintln!("Warning: No usable thumbnail for {}", request.video_id()),
        Err(e) => eprintln!("Warning: Could not save thumbnail: {}", e),
    }
}

/// Run a batch and stream its log until it finishes
async fn run_batch(cli: &Cli, options: TubeOptions, list: &str) -> anyhow::Result<()> {
    let engine = match TubeGrab::new(options) {
        Ok(engine) => engine,
        Err(e) => {
            handle_error(&e);
            std::process::exit(1);
        }
    };

    let mut runner = engine.batch()?.search_only(cli.search_only);
    if cli.upload {
        let Some(storage) = SupabaseStorage::from_env()? else {
            bail!("--upload needs SUPABASE_URL and SUPABASE_KEY");
        };
        runner = runner.with_uploader(Arc::new(storage));
    }
    if let Some(dir) = &cli.thumbnail {
        let metadata = MetadataClient::new(engine.options())?;
        runner = runner.with_thumbnails(Arc::new(metadata), dir);
    }

    let ticket = match runner.start(list) {
        Ok(ticket) => ticket,
        Err(e) => {
            handle_error(&e);
            std::process::exit(1);
        }
    };
    println!(
        "Processing {} songs ({} steps)",
        ticket.songs, ticket.total_steps
    );

    let mut printed = 0;
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let finished = ticket.wait();
    tokio::pin!(finished);
    loop {
        tokio::select! {
            _ = &mut finished => {
                print_new_logs(&engine, &mut printed);
                break;
            }
            _ = ticker.tick() => print_new_logs(&engine, &mut printed),
        }
    }

    let state = engine.progress();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&state.results)?);
    }
    if state.status == JobStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

fn print_new_logs(engine: &TubeGrab, printed: &mut usize) {
    let state = engine.progress();
    for line in state.logs.iter().skip(*printed) {
        println!("[{}/{}] {}", state.progress, state.total, line);
    }
    *printed = state.logs.len();
}

/// Print a failed acquisition with a hint for what to try next
fn report_failure(result: &AcquisitionResult) {
    let message = result.message.as_deref().unwrap_or("Download failed");
    eprintln!("❌ {}", message);
    if let Some(kind) = result.error_kind {
        if let Some(hint) = hint(kind) {
            eprintln!("   {}", hint);
        }
    }
}

fn hint(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Blocked => {
            Some("Pass --cookies with a fresh cookies.txt export or use --cookies-from-browser.")
        }
        ErrorKind::RateLimited => Some("Wait a few minutes or add an --alt-proxy."),
        ErrorKind::ToolMissing => Some("Install yt-dlp and ffmpeg and make sure they are on PATH."),
        ErrorKind::Timeout => Some("Try a lower --quality or a faster connection."),
        ErrorKind::RegionBlocked => Some("A --proxy in another region may help."),
        _ => None,
    }
}

/// Handle engine errors with user-friendly messages
fn handle_error(error: &TubeError) {
    match error {
        TubeError::InvalidUrl { url } => {
            eprintln!("❌ Invalid YouTube URL: {}", url);
            eprintln!("   Please provide a valid YouTube video URL.");
        }
        TubeError::InvalidVideoId { video_id } => {
            eprintln!("❌ Invalid video ID: {}", video_id);
            eprintln!("   Video IDs are 11 characters of letters, digits, - and _.");
        }
        TubeError::ToolMissing { tool } => {
            eprintln!("❌ Required tool not found: {}", tool);
            eprintln!("   Install it or point --ytdlp / --ffmpeg at the binary.");
        }
        TubeError::BatchInProgress => {
            eprintln!("❌ A batch is already running");
        }
        TubeError::RateLimited { retry_after } => {
            eprintln!("❌ Rate limited by YouTube");
            eprintln!("   Please wait {} seconds and try again.", retry_after);
        }
        TubeError::Network { source } => {
            eprintln!("❌ Network error: {}", source);
            eprintln!("   Check your internet connection and try again.");
        }
        _ => {
            let kind = error.kind();
            eprintln!("❌ {}", kind.describe(&error.diagnostics()));
            if let Some(hint) = hint(kind) {
                eprintln!("   {}", hint);
            }
        }
    }
}
