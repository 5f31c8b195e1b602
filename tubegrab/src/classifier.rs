use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// User-facing failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Bot detection triggered, fresh cookies usually help
    Blocked,
    /// Removed, private or deleted
    Unavailable,
    Copyright,
    RegionBlocked,
    /// Too many requests, back off and retry later
    RateLimited,
    /// An external process exceeded its budget
    Timeout,
    /// A required external binary is absent from the host
    ToolMissing,
    Unknown,
}

const BLOCKED_PATTERNS: &[&str] = &[
    "sign in to confirm",
    "not a bot",
    "bot detection",
    "automated queries",
    "unusual traffic",
];

const REGION_PATTERNS: &[&str] = &[
    "available in your country",
    "geo restricted",
    "geo-restricted",
    "region",
];

const RATE_LIMIT_PATTERNS: &[&str] = &["429", "too many requests"];

const UNAVAILABLE_PATTERNS: &[&str] = &["unavailable", "private", "removed", "deleted"];

impl ErrorKind {
    /// All categories, in classification priority order
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::ToolMissing,
        ErrorKind::Timeout,
        ErrorKind::RateLimited,
        ErrorKind::Blocked,
        ErrorKind::RegionBlocked,
        ErrorKind::Copyright,
        ErrorKind::Unavailable,
        ErrorKind::Unknown,
    ];

    /// Short message suitable for end users
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Blocked => {
                "YouTube flagged this request as automated. Provide fresh cookies and try again."
            }
            ErrorKind::Unavailable => {
                "This video is unavailable. It may be private, deleted, or removed."
            }
            ErrorKind::Copyright => "This video was blocked on copyright grounds.",
            ErrorKind::RegionBlocked => "This video is not available in the server's region.",
            ErrorKind::RateLimited => {
                "YouTube is rate-limiting requests from this server. Please try again later."
            }
            ErrorKind::Timeout => "The download took too long and was stopped.",
            ErrorKind::ToolMissing => {
                "A required tool (yt-dlp or ffmpeg) is not installed on the server."
            }
            ErrorKind::Unknown => "An unexpected error occurred during download.",
        }
    }

    /// Message shown to the user, falling back to the raw text only when
    /// there is no safer summary
    pub fn describe(&self, raw: &str) -> String {
        match self {
            ErrorKind::Unknown if !raw.trim().is_empty() => {
                format!("{} {}", self.user_message(), last_meaningful_line(raw))
            }
            _ => self.user_message().to_string(),
        }
    }

    /// Whether another attempt (next selector, next proxy) can help
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Blocked | ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Unknown
        )
    }

    /// Inter-attempt delay for this kind of failure
    pub fn retry_delay(&self, base: Duration) -> Duration {
        match self {
            ErrorKind::RateLimited => base * 4,
            ErrorKind::Blocked => base * 2,
            ErrorKind::Timeout => base / 2,
            _ => base,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Blocked => "BLOCKED",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Copyright => "COPYRIGHT",
            ErrorKind::RegionBlocked => "REGION_BLOCKED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ToolMissing => "TOOL_MISSING",
            ErrorKind::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Map raw failure output to an [`ErrorKind`].
///
/// Matching runs over the lower-cased text. Region phrases are checked
/// before the generic "unavailable" family: yt-dlp reports geo blocks as
/// "Video unavailable. ... available in your country".
pub fn classify(raw_text: &str, exit_code: Option<i32>) -> ErrorKind {
    let text = raw_text.to_lowercase();

    if exit_code == Some(127) || text.contains("command not found") {
        return ErrorKind::ToolMissing;
    }
    if text.contains("timed out after") || text.contains("hard timeout") {
        return ErrorKind::Timeout;
    }
    if RATE_LIMIT_PATTERNS.iter().any(|p| text.contains(p)) {
        return ErrorKind::RateLimited;
    }
    if BLOCKED_PATTERNS.iter().any(|p| text.contains(p)) {
        return ErrorKind::Blocked;
    }
    if REGION_PATTERNS.iter().any(|p| text.contains(p)) {
        return ErrorKind::RegionBlocked;
    }
    if text.contains("copyright") {
        return ErrorKind::Copyright;
    }
    if UNAVAILABLE_PATTERNS.iter().any(|p| text.contains(p)) {
        return ErrorKind::Unavailable;
    }

    ErrorKind::Unknown
}

fn last_meaningful_line(raw: &str) -> &str {
    raw.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}
