use crate::error::{TubeError, TubeResult};
use crate::types::TubeOptions;
use regex::Regex;
use reqwest::header::{ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::form_urlencoded;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_RETRIES: u32 = 2;

/// First video ID embedded in a results page
pub fn first_video_id(html: &str) -> Option<String> {
    let re = Regex::new(r#""videoId":"([a-zA-Z0-9_-]{11})""#).ok()?;
    re.captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Finds a video for a free-text query by scraping the results page
pub struct SearchClient {
    client: Client,
    search_base_url: String,
    watch_base_url: String,
    user_agent: String,
    retries: u32,
    /// Pause after a bad status or a page without results
    miss_delay: Duration,
    /// Pause after a transport error or timeout
    error_delay: Duration,
}

impl SearchClient {
    pub fn new(options: &TubeOptions) -> TubeResult<Self> {
        let client = Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| TubeError::Configuration {
                message: format!("Failed to create search client: {}", e),
            })?;
        Ok(Self {
            client,
            search_base_url: options.search_base_url.clone(),
            watch_base_url: options.watch_base_url.clone(),
            user_agent: options.effective_user_agent().to_string(),
            retries: DEFAULT_RETRIES,
            miss_delay: Duration::from_secs(3),
            error_delay: Duration::from_secs(2),
        })
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_delays(mut self, miss: Duration, error: Duration) -> Self {
        self.miss_delay = miss;
        self.error_delay = error;
        self
    }

    pub fn search_url(&self, query: &str) -> String {
        let terms = query.split_whitespace().collect::<Vec<_>>().join(" ");
        let encoded: String = form_urlencoded::byte_serialize(terms.as_bytes()).collect();
        format!("{}{}", self.search_base_url, encoded)
    }

    /// Watch URL of the first result, or `None` once every retry is spent
    pub async fn first_video_url(&self, query: &str) -> Option<String> {
        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            if attempt > 1 {
                debug!(attempt, attempts, "Retrying search for {}", query);
            }
            let delay = match self.search_once(query).await {
                Ok(Some(video_id)) => {
                    let url = format!("{}{}", self.watch_base_url, video_id);
                    info!("Found {} for {:?}", url, query);
                    return Some(url);
                }
                Ok(None) => {
                    warn!("No video IDs in results for {:?}", query);
                    self.miss_delay
                }
                Err(TubeError::HttpStatus { status, .. }) => {
                    warn!("Search returned HTTP {}", status);
                    self.miss_delay
                }
                Err(e) => {
                    warn!("Search error: {}", e);
                    self.error_delay
                }
            };
            if attempt < attempts && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        None
    }

    async fn search_once(&self, query: &str) -> TubeResult<Option<String>> {
        let url = self.search_url(query);
        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(TubeError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        let html = response.text().await?;
        Ok(first_video_id(&html))
    }
}
