use crate::error::{TubeError, TubeResult};
use crate::types::{TubeOptions, VideoMetadata};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Thumbnails smaller than this are YouTube's grey placeholder
const MIN_THUMBNAIL_BYTES: usize = 1000;

const THUMBNAIL_VARIANTS: &[&str] = &["maxresdefault.jpg", "hqdefault.jpg"];

/// YouTube Data API v3 client plus thumbnail fetching
pub struct MetadataClient {
    client: Client,
    api_key: Option<String>,
    api_base_url: String,
    thumbnail_base_url: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    snippet: Snippet,
    content_details: Option<ContentDetails>,
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    snippet: Option<Snippet>,
    statistics: Option<Statistics>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_title: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    maxres: Option<ThumbnailRef>,
    high: Option<ThumbnailRef>,
    medium: Option<ThumbnailRef>,
    default: Option<ThumbnailRef>,
}

impl Thumbnails {
    fn best(&self) -> Option<String> {
        [&self.maxres, &self.high, &self.medium, &self.default]
            .into_iter()
            .flatten()
            .next()
            .map(|t| t.url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ThumbnailRef {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: Option<String>,
    definition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    subscriber_count: Option<String>,
}

fn compact_field(raw: Option<&String>) -> Option<String> {
    raw.and_then(|s| s.parse::<u64>().ok()).map(format_compact)
}

impl MetadataClient {
    pub fn new(options: &TubeOptions) -> TubeResult<Self> {
        Ok(Self {
            client: options.http_client()?,
            api_key: options.api_key.clone(),
            api_base_url: options.api_base_url.trim_end_matches('/').to_string(),
            thumbnail_base_url: options.thumbnail_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Video and channel details from the Data API
    pub async fn video(&self, video_id: &str) -> TubeResult<VideoMetadata> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| TubeError::Configuration {
                message: "YOUTUBE_API_KEY is not set".to_string(),
            })?;

        info!("Querying metadata for video: {}", video_id);
        let url = format!("{}/videos", self.api_base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("part", "snippet,contentDetails,statistics"),
                ("id", video_id),
                ("key", key),
            ])
            .send()
            .await
            .map_err(keyless)?;
        if !response.status().is_success() {
            return Err(TubeError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }

        let list: ListResponse<VideoItem> = response.json().await.map_err(keyless)?;
        let item = list.items.into_iter().next().ok_or_else(|| TubeError::Acquisition {
            kind: crate::classifier::ErrorKind::Unavailable,
            message: format!("Video {} not found", video_id),
        })?;

        let details = item.content_details;
        let stats = item.statistics;
        let mut metadata = VideoMetadata {
            video_id: video_id.to_string(),
            title: item.snippet.title,
            thumbnail_url: item.snippet.thumbnails.best(),
            channel_title: item.snippet.channel_title,
            channel_id: item.snippet.channel_id,
            description: item.snippet.description,
            channel_thumbnail_url: None,
            definition: details.as_ref().and_then(|d| d.definition.clone()),
            duration: details
                .as_ref()
                .and_then(|d| d.duration.as_deref())
                .and_then(parse_iso8601_duration),
            view_count: compact_field(stats.as_ref().and_then(|s| s.view_count.as_ref())),
            like_count: compact_field(stats.as_ref().and_then(|s| s.like_count.as_ref())),
            subscriber_count: None,
        };

        if !metadata.channel_id.is_empty() {
            match self.channel(&metadata.channel_id, key).await {
                Ok(channel) => {
                    metadata.subscriber_count = compact_field(
                        channel
                            .statistics
                            .as_ref()
                            .and_then(|s| s.subscriber_count.as_ref()),
                    );
                    metadata.channel_thumbnail_url =
                        channel.snippet.and_then(|s| s.thumbnails.best());
                }
                Err(e) => warn!("Channel lookup failed for {}: {}", metadata.channel_id, e),
            }
        }

        Ok(metadata)
    }

    async fn channel(&self, channel_id: &str, key: &str) -> TubeResult<ChannelItem> {
        let url = format!("{}/channels", self.api_base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("part", "snippet,statistics"), ("id", channel_id), ("key", key)])
            .send()
            .await
            .map_err(keyless)?;
        if !response.status().is_success() {
            return Err(TubeError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }

        let list: ListResponse<ChannelItem> = response.json().await.map_err(keyless)?;
        list.items.into_iter().next().ok_or_else(|| TubeError::Parse {
            message: format!("Channel {} not found", channel_id),
        })
    }

    /// Save the best available thumbnail as `{dir}/{name}.jpg`.
    ///
    /// Returns `None` when neither variant is usable.
    pub async fn download_thumbnail(
        &self,
        video_id: &str,
        dir: &Path,
        name: &str,
    ) -> TubeResult<Option<PathBuf>> {
        for variant in THUMBNAIL_VARIANTS {
            let url = format!("{}/{}/{}", self.thumbnail_base_url, video_id, variant);
            let bytes = match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => response.bytes().await?,
                Ok(response) => {
                    debug!("Thumbnail {} returned {}", variant, response.status());
                    continue;
                }
                Err(e) => {
                    debug!("Thumbnail {} failed: {}", variant, e);
                    continue;
                }
            };

            if bytes.len() <= MIN_THUMBNAIL_BYTES {
                debug!("Thumbnail {} too small ({} bytes)", variant, bytes.len());
                continue;
            }

            tokio::fs::create_dir_all(dir).await?;
            let path = dir.join(format!("{}.jpg", name));
            tokio::fs::write(&path, &bytes).await?;
            info!("Thumbnail saved: {}", path.display());
            return Ok(Some(path));
        }
        Ok(None)
    }
}

/// `1234567` → `1.2M`
pub fn format_compact(n: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1_000_000_000, "B"), (1_000_000, "M"), (1_000, "K")];

    for (scale, suffix) in UNITS {
        if n >= scale {
            let value = n as f64 / scale as f64;
            let text = format!("{:.1}", value);
            let text = text.strip_suffix(".0").unwrap_or(&text);
            return format!("{}{}", text, suffix);
        }
    }
    n.to_string()
}

/// `PT1H2M3S` → `1:02:03`, `PT4M5S` → `4:05`. Days fold into hours.
pub fn parse_iso8601_duration(raw: &str) -> Option<String> {
    let re = Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").ok()?;
    let caps = re.captures(raw.trim())?;
    let part = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    let hours = part(1) * 24 + part(2);
    let minutes = part(3);
    let seconds = part(4);

    Some(if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    })
}

/// Drop the request URL, which carries the API key, from the error
fn keyless(err: reqwest::Error) -> TubeError {
    TubeError::from(err.without_url())
}
