use crate::classifier::{classify, ErrorKind};
use thiserror::Error;

pub type TubeResult<T> = Result<T, TubeError>;

#[derive(Debug, Error)]
pub enum TubeError {
    #[error("Invalid YouTube URL: {url}")]
    InvalidUrl { url: String },

    #[error("Invalid video ID: {video_id}")]
    InvalidVideoId { video_id: String },

    #[error("Required tool not found: {tool}")]
    ToolMissing { tool: String },

    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("{tool} failed with exit code {code:?}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("{tool} finished but produced no {expected} file")]
    MissingOutput { tool: String, expected: String },

    #[error("Acquisition failed ({kind}): {message}")]
    Acquisition { kind: ErrorKind, message: String },

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Downloaded zero bytes from {url}")]
    EmptyDownload { url: String },

    #[error("Browser automation failed at {stage}: {message}")]
    Browser { stage: String, message: String },

    #[error("A batch job is already running")]
    BatchInProgress,

    #[error("No usable cookies in the supplied material")]
    NoUsableCookies,

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Network error: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("File system error: {source}")]
    FileSystem {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl TubeError {
    /// Collapse this error into the closed user-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            TubeError::ToolMissing { .. } => ErrorKind::ToolMissing,
            TubeError::Timeout { .. } => ErrorKind::Timeout,
            TubeError::RateLimited { .. } => ErrorKind::RateLimited,
            TubeError::Acquisition { kind, .. } => *kind,
            TubeError::ToolFailed {
                diagnostics, code, ..
            } => classify(diagnostics, *code),
            TubeError::HttpStatus { status, .. } => match *status {
                429 => ErrorKind::RateLimited,
                403 => ErrorKind::Blocked,
                404 | 410 => ErrorKind::Unavailable,
                _ => ErrorKind::Unknown,
            },
            TubeError::Network { source } if source.is_timeout() => ErrorKind::Timeout,
            TubeError::Network { source } => match source.status().map(|s| s.as_u16()) {
                Some(429) => ErrorKind::RateLimited,
                Some(403) => ErrorKind::Blocked,
                _ => classify(&without_url(source), None),
            },
            TubeError::Browser { message, .. } => classify(message, None),
            TubeError::FileSystem { source } => classify(&source.to_string(), None),
            // signed media URLs carry digits that look like status codes
            TubeError::EmptyDownload { .. }
            | TubeError::InvalidUrl { .. }
            | TubeError::InvalidVideoId { .. }
            | TubeError::MissingOutput { .. }
            | TubeError::BatchInProgress
            | TubeError::NoUsableCookies
            | TubeError::Configuration { .. }
            | TubeError::Parse { .. }
            | TubeError::Json { .. } => ErrorKind::Unknown,
        }
    }

    /// Raw diagnostic text kept for logs
    pub fn diagnostics(&self) -> String {
        match self {
            TubeError::ToolFailed { diagnostics, .. } => diagnostics.clone(),
            TubeError::Acquisition { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            TubeError::InvalidUrl { .. }
            | TubeError::InvalidVideoId { .. }
            | TubeError::ToolMissing { .. }
            | TubeError::BatchInProgress
            | TubeError::NoUsableCookies
            | TubeError::Configuration { .. } => false,
            TubeError::EmptyDownload { .. } | TubeError::MissingOutput { .. } => true,
            other => other.kind().is_retryable(),
        }
    }

    /// Get the suggested retry delay in seconds
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            TubeError::RateLimited { retry_after } => Some(*retry_after),
            _ if self.is_retryable() => Some(
                self.kind()
                    .retry_delay(std::time::Duration::from_secs(2))
                    .as_secs()
                    .max(1),
            ),
            _ => None,
        }
    }
}

/// Error text with the request URL left out
fn without_url(err: &reqwest::Error) -> String {
    let text = err.to_string();
    match err.url() {
        Some(url) => text.replace(url.as_str(), ""),
        None => text,
    }
}
