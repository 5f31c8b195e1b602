//! Last-resort audio tactic: drive a third-party conversion page in
//! headless Chromium and pull the download link out of it.

use crate::error::{TubeError, TubeResult};
use crate::fallback::extract_media_link;
use crate::progress::ProgressTracker;
use crate::types::BrowserOptions;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
"#;

/// Pause after clicking the completion button so a navigation can start
const CLICK_SETTLE: Duration = Duration::from_millis(1500);

#[async_trait]
pub trait BrowserConverter: Send + Sync {
    /// Submit `source_url` to the conversion page and return a direct
    /// media link
    async fn convert(&self, source_url: &str) -> TubeResult<String>;
}

fn browser_err(stage: &str, err: impl std::fmt::Display) -> TubeError {
    TubeError::Browser {
        stage: stage.to_string(),
        message: err.to_string(),
    }
}

/// Pick the download link: a navigation straight to a media file wins,
/// then an absolute `href`, then a scan of the page source
pub fn resolve_link(
    navigated_to: Option<&str>,
    href: Option<&str>,
    page_source: &str,
) -> Option<String> {
    if let Some(url) = navigated_to.and_then(extract_media_link) {
        return Some(url);
    }
    if let Some(href) = href.filter(|h| h.starts_with("http")) {
        return Some(href.to_string());
    }
    extract_media_link(page_source)
}

pub struct ChromiumConverter {
    options: BrowserOptions,
    tracker: Option<ProgressTracker>,
}

struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
}

impl ChromiumConverter {
    pub fn new(options: BrowserOptions, tracker: Option<ProgressTracker>) -> Self {
        Self { options, tracker }
    }

    pub fn is_configured(&self) -> bool {
        self.options.converter_url.is_some()
    }

    fn launch_args(&self) -> Vec<String> {
        let (width, height) = self.options.viewport;
        vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--disable-extensions".to_string(),
            "--lang=en-US".to_string(),
            format!("--user-agent={}", self.options.user_agent),
            format!("--window-size={},{}", width, height),
        ]
    }

    fn config(&self) -> TubeResult<BrowserConfig> {
        let (width, height) = self.options.viewport;
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .viewport(Viewport {
                width,
                height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: width >= height,
                has_touch: false,
            })
            .args(self.launch_args());
        if let Some(path) = &self.options.chrome_path {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(|e| browser_err("configure", e))
    }

    async fn open(&self, url: &str) -> TubeResult<Session> {
        let (browser, mut handler) = Browser::launch(self.config()?)
            .await
            .map_err(|e| browser_err("launch", e))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await
            .map_err(|e| browser_err("new page", e))?;
        let stealth = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(STEALTH_SCRIPT)
            .build()
            .map_err(|e| browser_err("configure", e))?;
        page.evaluate_on_new_document(stealth)
            .await
            .map_err(|e| browser_err("configure", e))?;

        let session = Session {
            browser,
            handler,
            page,
        };

        let navigate = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| browser_err("page load", e))?;
        let loaded = async {
            session.page.goto(navigate).await?;
            session.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        }
        .await;
        if let Err(e) = loaded {
            self.screenshot(&session.page, "page_load").await;
            self.close(session).await;
            return Err(browser_err("page load", e));
        }
        Ok(session)
    }

    async fn close(&self, mut session: Session) {
        if let Err(e) = session.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        session.handler.abort();
    }

    async fn screenshot(&self, page: &Page, reason: &str) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path: PathBuf = self
            .options
            .screenshot_dir
            .join(format!("screenshot_{}_{}.png", reason, timestamp));

        if let Err(e) = tokio::fs::create_dir_all(&self.options.screenshot_dir).await {
            warn!("Cannot create screenshot dir: {}", e);
            return;
        }
        match page
            .save_screenshot(ScreenshotParams::builder().build(), &path)
            .await
        {
            Ok(_) => {
                info!(reason, path = %path.display(), "Captured screenshot");
                if let Some(tracker) = &self.tracker {
                    tracker.add_screenshot(path, reason);
                }
            }
            Err(e) => warn!("Failed to capture screenshot: {}", e),
        }
    }

    async fn wait_for_completion(&self, page: &Page) -> Option<Element> {
        let started = Instant::now();
        while started.elapsed() < self.options.max_wait {
            if let Ok(element) = page.find_element(self.options.completion_selector.as_str()).await {
                return Some(element);
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
        None
    }

    async fn drive(&self, page: &Page, source_url: &str) -> TubeResult<String> {
        let input = page
            .find_element(self.options.input_selector.as_str())
            .await
            .map_err(|e| browser_err("input", e))?;
        input.click().await.map_err(|e| browser_err("input", e))?;
        input
            .type_str(source_url)
            .await
            .map_err(|e| browser_err("input", e))?;

        page.find_element(self.options.submit_selector.as_str())
            .await
            .map_err(|e| browser_err("submit", e))?
            .click()
            .await
            .map_err(|e| browser_err("submit", e))?;
        debug!("Submitted {} to conversion page", source_url);

        let Some(button) = self.wait_for_completion(page).await else {
            self.screenshot(page, "completion_timeout").await;
            return Err(browser_err(
                "completion",
                format!("no completion button after {:?}", self.options.max_wait),
            ));
        };

        let href = button.attribute("href").await.ok().flatten();
        let before = page.url().await.ok().flatten();
        if let Err(e) = button.click().await {
            debug!("Completion click failed: {}", e);
        }
        tokio::time::sleep(CLICK_SETTLE).await;

        let after = page.url().await.ok().flatten();
        let navigated = after.filter(|url| Some(url) != before.as_ref());
        let source = page.content().await.unwrap_or_default();

        match resolve_link(navigated.as_deref(), href.as_deref(), &source) {
            Some(link) => Ok(link),
            None => {
                self.screenshot(page, "no_link").await;
                Err(browser_err("link", "no downloadable link on the page"))
            }
        }
    }
}

#[async_trait]
impl BrowserConverter for ChromiumConverter {
    async fn convert(&self, source_url: &str) -> TubeResult<String> {
        let converter_url = self
            .options
            .converter_url
            .as_deref()
            .ok_or_else(|| TubeError::Configuration {
                message: "No conversion page configured".to_string(),
            })?;

        info!("Opening conversion page for {}", source_url);
        let session = self.open(converter_url).await?;
        let result = self.drive(&session.page, source_url).await;
        self.close(session).await;

        if let Ok(link) = &result {
            info!("Conversion page produced {}", link);
        }
        result
    }
}
