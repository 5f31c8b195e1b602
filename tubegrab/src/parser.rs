use crate::error::{TubeError, TubeResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

const WATCH_BASE: &str = "https://www.youtube.com/watch?v=";

/// Result of parsing a user-supplied link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUrl {
    pub video_id: String,
    pub is_shorts: bool,
}

impl ParsedUrl {
    /// Canonical watch URL for the parsed identifier
    pub fn watch_url(&self) -> String {
        format!("{}{}", WATCH_BASE, self.video_id)
    }
}

/// Extracts 11-character video identifiers from the link shapes people paste
pub struct IdentifierParser {
    id_regex: Regex,
    hosts: &'static [&'static str],
}

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];

/// Path prefixes that carry the identifier as the next segment
const ID_SEGMENT_PREFIXES: &[&str] = &["embed", "shorts", "live", "v"];

impl Default for IdentifierParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierParser {
    pub fn new() -> Self {
        Self {
            id_regex: Regex::new(r"^[a-zA-Z0-9_-]{11}$").expect("video id regex"),
            hosts: YOUTUBE_HOSTS,
        }
    }

    /// Parse a link or a bare identifier.
    ///
    /// Links without a scheme (`youtu.be/...`) are accepted.
    pub fn parse(&self, input: &str) -> TubeResult<ParsedUrl> {
        let input = input.trim();
        if self.is_valid_video_id(input) {
            return Ok(ParsedUrl {
                video_id: input.to_string(),
                is_shorts: false,
            });
        }

        let url = Url::parse(input)
            .or_else(|_| Url::parse(&format!("https://{}", input)))
            .map_err(|_| TubeError::InvalidUrl {
                url: input.to_string(),
            })?;

        let host = match url.host_str() {
            Some(host) if self.hosts.contains(&host) => host,
            _ => {
                return Err(TubeError::InvalidUrl {
                    url: input.to_string(),
                })
            }
        };

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let (candidate, is_shorts) = if host == "youtu.be" {
            (segments.first().map(|s| s.to_string()), false)
        } else if segments.first() == Some(&"watch") {
            let v = url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned());
            (v, false)
        } else {
            match segments.as_slice() {
                [prefix, id, ..] if ID_SEGMENT_PREFIXES.contains(prefix) => {
                    (Some(id.to_string()), *prefix == "shorts")
                }
                _ => (None, false),
            }
        };

        let video_id = candidate.ok_or_else(|| TubeError::InvalidUrl {
            url: input.to_string(),
        })?;

        if !self.is_valid_video_id(&video_id) {
            return Err(TubeError::InvalidVideoId { video_id });
        }

        Ok(ParsedUrl {
            video_id,
            is_shorts,
        })
    }

    pub fn is_valid_video_id(&self, video_id: &str) -> bool {
        self.id_regex.is_match(video_id)
    }

    /// Rewrite any accepted link to the canonical watch URL
    pub fn normalize(&self, input: &str) -> TubeResult<String> {
        self.parse(input).map(|parsed| parsed.watch_url())
    }
}

/// Parse a link with a throwaway parser
pub fn parse_url(input: &str) -> TubeResult<ParsedUrl> {
    IdentifierParser::new().parse(input)
}

pub fn is_valid_video_id(video_id: &str) -> bool {
    IdentifierParser::new().is_valid_video_id(video_id)
}
