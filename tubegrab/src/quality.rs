//! Detects which resolution tiers a video actually offers.
//!
//! Three strategies run in order and the first one with an answer wins:
//! a scrape of the public watch page, a yt-dlp format probe, then a guess
//! from the title or the Data API's `hd`/`sd` flag. Resolution never fails;
//! without any signal the report falls back to 720p.

use crate::cascade::{first_success, Strategy};
use crate::metadata::MetadataClient;
use crate::tools::{Extractor, ToolContext};
use crate::types::{Provenance, QualityReport, TubeOptions};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Tiers used when a strategy knows the maximum but not the ladder
pub const STANDARD_TIERS: [u32; 6] = [2160, 1440, 1080, 720, 480, 360];

pub const FALLBACK_HEIGHT: u32 = 720;

const PLAYER_RESPONSE_MARKERS: &[&str] = &["var ytInitialPlayerResponse = ", "ytInitialPlayerResponse = "];

/// What a strategy found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub max_height: u32,
    /// May be empty, in which case a ladder is synthesized
    pub heights: Vec<u32>,
    pub provenance: Provenance,
}

/// Input shared by all strategies
pub struct ResolveInput {
    pub video_id: String,
    pub ctx: ToolContext,
}

pub fn height_to_label(height: u32) -> String {
    match height {
        h if h >= 4320 => "8K".to_string(),
        h if h >= 2160 => "4K".to_string(),
        h if h >= 1440 => "2K".to_string(),
        h if h >= 1080 => "1080p (Full HD)".to_string(),
        h if h >= 720 => "720p (HD)".to_string(),
        h if h >= 480 => "480p".to_string(),
        h if h > 0 => format!("{}p", h),
        _ => "360p (Default)".to_string(),
    }
}

/// Build the final report, enforcing descending distinct heights
pub fn build_report(detection: Detection) -> QualityReport {
    let mut heights: Vec<u32> = detection.heights.into_iter().filter(|h| *h > 0).collect();
    heights.sort_unstable_by(|a, b| b.cmp(a));
    heights.dedup();

    let max_height = heights.first().copied().unwrap_or(0).max(detection.max_height);
    if heights.is_empty() && max_height > 0 {
        heights.push(max_height);
        heights.extend(STANDARD_TIERS.iter().copied().filter(|t| *t < max_height));
    } else if heights.first() != Some(&max_height) && max_height > 0 {
        heights.insert(0, max_height);
    }

    let mut labels: Vec<String> = Vec::with_capacity(heights.len());
    for label in heights.iter().map(|h| height_to_label(*h)) {
        if !labels.contains(&label) {
            labels.push(label);
        }
    }

    QualityReport {
        max_height,
        max_label: height_to_label(max_height),
        heights,
        labels,
        provenance: detection.provenance,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    streaming_data: Option<StreamingData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    formats: Vec<StreamFormat>,
    #[serde(default)]
    adaptive_formats: Vec<StreamFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamFormat {
    height: Option<u32>,
    quality_label: Option<String>,
}

impl StreamFormat {
    fn height(&self) -> Option<u32> {
        self.height.filter(|h| *h > 0).or_else(|| {
            self.quality_label
                .as_deref()
                .and_then(|label| label.split('p').next())
                .and_then(|digits| digits.parse().ok())
        })
    }
}

/// Heights from the embedded player response, if present and parseable
fn heights_from_player_response(html: &str) -> Option<Vec<u32>> {
    for marker in PLAYER_RESPONSE_MARKERS {
        let Some(start) = html.find(marker) else {
            continue;
        };
        let rest = &html[start + marker.len()..];
        let parsed = serde_json::Deserializer::from_str(rest)
            .into_iter::<PlayerResponse>()
            .next();
        match parsed {
            Some(Ok(response)) => {
                let data = response.streaming_data?;
                let heights: Vec<u32> = data
                    .formats
                    .iter()
                    .chain(data.adaptive_formats.iter())
                    .filter_map(StreamFormat::height)
                    .collect();
                return (!heights.is_empty()).then_some(heights);
            }
            Some(Err(e)) => debug!("Malformed player response: {}", e),
            None => {}
        }
    }
    None
}

/// Heights implied by literal quality labels anywhere in the page
fn heights_from_labels(html: &str) -> Vec<u32> {
    let Ok(re) = Regex::new(r"\b(?:(\d{3,4})p(?:48|50|60)?|([48])K)\b") else {
        return Vec::new();
    };
    re.captures_iter(html)
        .filter_map(|caps| {
            if let Some(p) = caps.get(1) {
                p.as_str().parse::<u32>().ok()
            } else {
                caps.get(2).map(|k| if k.as_str() == "8" { 4320 } else { 2160 })
            }
        })
        .filter(|h| (144..=4320).contains(h))
        .collect()
}

pub struct WebpageScrape {
    client: Client,
    watch_base_url: String,
}

#[async_trait]
impl Strategy<ResolveInput, Detection> for WebpageScrape {
    fn name(&self) -> &'static str {
        "webpage scrape"
    }

    async fn attempt(&self, input: &ResolveInput) -> Option<Detection> {
        let url = format!("{}{}", self.watch_base_url, input.video_id);
        let response = match self.client.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("Watch page returned {}", r.status());
                return None;
            }
            Err(e) => {
                debug!("Watch page request failed: {}", e);
                return None;
            }
        };
        let html = response.text().await.ok()?;

        let heights = heights_from_player_response(&html).unwrap_or_else(|| heights_from_labels(&html));
        let max_height = heights.iter().copied().max()?;
        Some(Detection {
            max_height,
            heights,
            provenance: Provenance::WebpageScrape,
        })
    }
}

pub struct ToolProbe {
    extractor: Arc<dyn Extractor>,
    watch_base_url: String,
}

#[async_trait]
impl Strategy<ResolveInput, Detection> for ToolProbe {
    fn name(&self) -> &'static str {
        "tool probe"
    }

    async fn attempt(&self, input: &ResolveInput) -> Option<Detection> {
        let url = format!("{}{}", self.watch_base_url, input.video_id);
        match self.extractor.probe_heights(&url, &input.ctx).await {
            Ok(heights) => {
                let max_height = heights.iter().copied().max()?;
                Some(Detection {
                    max_height,
                    heights,
                    provenance: Provenance::ToolProbe,
                })
            }
            Err(e) => {
                debug!("Format probe failed: {}", e);
                None
            }
        }
    }
}

/// Last resort: keywords in the title, then the Data API definition flag
pub struct Heuristic {
    extractor: Arc<dyn Extractor>,
    metadata: Option<Arc<MetadataClient>>,
    watch_base_url: String,
}

/// Height suggested by the title, if any
pub fn height_from_title(title: &str) -> Option<u32> {
    const KEYWORDS: &[(&str, u32)] = &[
        (r"\b8k\b", 4320),
        (r"\b(4k|2160p)\b", 2160),
        (r"\b(2k|1440p)\b", 1440),
        (r"\b(1080p|full hd)\b", 1080),
        (r"\b720p\b", 720),
    ];
    let title = title.to_lowercase();
    KEYWORDS.iter().find_map(|(pattern, height)| {
        Regex::new(pattern)
            .ok()
            .filter(|re| re.is_match(&title))
            .map(|_| *height)
    })
}

/// Height implied by the Data API `definition` flag
pub fn height_from_definition(definition: &str) -> Option<u32> {
    match definition.to_lowercase().as_str() {
        "hd" => Some(1080),
        "sd" => Some(480),
        _ => None,
    }
}

impl Heuristic {
    fn guess(title: Option<&str>, definition: Option<&str>) -> Detection {
        if let Some(height) = title.and_then(height_from_title) {
            return Detection {
                max_height: height,
                heights: Vec::new(),
                provenance: Provenance::Heuristic,
            };
        }
        if let Some(height) = definition.and_then(height_from_definition) {
            return Detection {
                max_height: height,
                heights: Vec::new(),
                provenance: Provenance::MetadataQuery,
            };
        }
        Detection {
            max_height: FALLBACK_HEIGHT,
            heights: Vec::new(),
            provenance: Provenance::Heuristic,
        }
    }
}

#[async_trait]
impl Strategy<ResolveInput, Detection> for Heuristic {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn attempt(&self, input: &ResolveInput) -> Option<Detection> {
        let mut title = None;
        let mut definition = None;

        if let Some(metadata) = &self.metadata {
            match metadata.video(&input.video_id).await {
                Ok(meta) => {
                    title = Some(meta.title);
                    definition = meta.definition;
                }
                Err(e) => debug!("Metadata query failed: {}", e),
            }
        }
        if title.is_none() {
            let url = format!("{}{}", self.watch_base_url, input.video_id);
            title = self.extractor.title(&url, &input.ctx).await.ok();
        }

        Some(Self::guess(title.as_deref(), definition.as_deref()))
    }
}

/// Ordered strategy list over [`ResolveInput`]
pub struct QualityResolver {
    strategies: Vec<Box<dyn Strategy<ResolveInput, Detection>>>,
}

impl QualityResolver {
    pub fn new(
        options: &TubeOptions,
        client: Client,
        extractor: Arc<dyn Extractor>,
        metadata: Option<Arc<MetadataClient>>,
    ) -> Self {
        let watch_base_url = options.watch_base_url.clone();
        Self {
            strategies: vec![
                Box::new(WebpageScrape {
                    client,
                    watch_base_url: watch_base_url.clone(),
                }),
                Box::new(ToolProbe {
                    extractor: extractor.clone(),
                    watch_base_url: watch_base_url.clone(),
                }),
                Box::new(Heuristic {
                    extractor,
                    metadata,
                    watch_base_url,
                }),
            ],
        }
    }

    pub async fn resolve(&self, video_id: &str, ctx: &ToolContext) -> QualityReport {
        let input = ResolveInput {
            video_id: video_id.to_string(),
            ctx: ctx.clone(),
        };
        let detection = match first_success(&self.strategies, &input).await {
            Some((_, detection)) => detection,
            None => Heuristic::guess(None, None),
        };
        let report = build_report(detection);
        info!(
            video_id,
            max = %report.max_label,
            provenance = %report.provenance,
            "Resolved quality tiers"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::stub::StubExtractor;
    use proptest::prelude::*;

    #[test]
    fn test_height_to_label() {
        let cases = [
            (4320, "8K"),
            (2160, "4K"),
            (1440, "2K"),
            (1080, "1080p (Full HD)"),
            (720, "720p (HD)"),
            (480, "480p"),
            (360, "360p"),
            (144, "144p"),
            (0, "360p (Default)"),
        ];
        for (height, label) in cases {
            assert_eq!(height_to_label(height), label);
        }
    }

    #[test]
    fn test_synthesized_ladder_is_capped() {
        let report = build_report(Detection {
            max_height: 1080,
            heights: Vec::new(),
            provenance: Provenance::Heuristic,
        });
        assert_eq!(report.heights, vec![1080, 720, 480, 360]);
        assert_eq!(report.max_label, "1080p (Full HD)");
        assert_eq!(report.labels[0], "1080p (Full HD)");
    }

    #[test]
    fn test_player_response_heights() {
        let html = r#"<script>var ytInitialPlayerResponse = {"streamingData":{
            "formats":[{"height":360,"qualityLabel":"360p"}],
            "adaptiveFormats":[{"height":1080,"qualityLabel":"1080p60"},{"qualityLabel":"720p"},{"mimeType":"audio/mp4"}]
        }};var meta = {};</script>"#;
        let mut heights = heights_from_player_response(html).unwrap();
        heights.sort_unstable();
        assert_eq!(heights, vec![360, 720, 1080]);
    }

    #[test]
    fn test_label_fallback_when_blob_malformed() {
        let html = r#"ytInitialPlayerResponse = {"streamingData": broken ... 1080p60 720p and 4K"#;
        assert!(heights_from_player_response(html).is_none());
        let mut heights = heights_from_labels(html);
        heights.sort_unstable();
        assert_eq!(heights, vec![720, 1080, 2160]);
    }

    #[test]
    fn test_title_and_definition_heuristics() {
        assert_eq!(height_from_title("Planet Earth 4K HDR"), Some(2160));
        assert_eq!(height_from_title("Concert [1440p]"), Some(1440));
        assert_eq!(height_from_title("Live set Full HD"), Some(1080));
        assert_eq!(height_from_title("just a song"), None);

        let detection = Heuristic::guess(Some("just a song"), Some("sd"));
        assert_eq!(detection.max_height, 480);
        assert_eq!(detection.provenance, Provenance::MetadataQuery);

        let detection = Heuristic::guess(None, None);
        assert_eq!(detection.max_height, FALLBACK_HEIGHT);
        assert_eq!(detection.provenance, Provenance::Heuristic);
    }

    fn resolver_for(server: &mockito::ServerGuard, extractor: StubExtractor) -> QualityResolver {
        let options = TubeOptions::new()
            .timeout(5)
            .watch_base_url(format!("{}/watch?v=", server.url()));
        let client = options.http_client().unwrap();
        QualityResolver::new(&options, client, Arc::new(extractor), None)
    }

    #[tokio::test]
    async fn test_resolve_from_watch_page() {
        let mut server = mockito::Server::new_async().await;
        let page = server
            .mock("GET", "/watch")
            .match_query(mockito::Matcher::UrlEncoded("v".into(), "dQw4w9WgXcQ".into()))
            .with_status(200)
            .with_body(r#"var ytInitialPlayerResponse = {"streamingData":{"adaptiveFormats":[{"height":1440},{"height":1080},{"height":1080}]}};"#)
            .create_async()
            .await;

        let report = resolver_for(&server, StubExtractor::new(""))
            .resolve("dQw4w9WgXcQ", &ToolContext::default())
            .await;

        page.assert_async().await;
        assert_eq!(report.heights, vec![1440, 1080]);
        assert_eq!(report.max_height, 1440);
        assert_eq!(report.provenance, Provenance::WebpageScrape);
    }

    #[tokio::test]
    async fn test_resolve_falls_through_to_probe_then_heuristic() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let mut probing = StubExtractor::new("");
        probing.heights = vec![720, 2160, 1080];
        let report = resolver_for(&server, probing)
            .resolve("dQw4w9WgXcQ", &ToolContext::default())
            .await;
        assert_eq!(report.heights, vec![2160, 1080, 720]);
        assert_eq!(report.provenance, Provenance::ToolProbe);

        let titled = StubExtractor::new("").title("Documentary in 8K");
        let report = resolver_for(&server, titled)
            .resolve("dQw4w9WgXcQ", &ToolContext::default())
            .await;
        assert_eq!(report.max_height, 4320);
        assert_eq!(report.heights, vec![4320, 2160, 1440, 1080, 720, 480, 360]);
        assert_eq!(report.provenance, Provenance::Heuristic);

        let silent = StubExtractor::new("");
        let report = resolver_for(&server, silent)
            .resolve("dQw4w9WgXcQ", &ToolContext::default())
            .await;
        assert_eq!(report.max_height, 720);
        assert_eq!(report.provenance, Provenance::Heuristic);
    }

    proptest! {
        #[test]
        fn prop_report_heights_strictly_descending(
            heights in proptest::collection::vec(0u32..5000, 0..20),
            max in 0u32..5000,
        ) {
            let report = build_report(Detection {
                max_height: max,
                heights,
                provenance: Provenance::ToolProbe,
            });
            prop_assert!(report.heights.windows(2).all(|w| w[0] > w[1]));
            if let Some(first) = report.heights.first() {
                prop_assert_eq!(*first, report.max_height);
            }
        }
    }
}
