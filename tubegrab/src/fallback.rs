use crate::browser::BrowserConverter;
use crate::cascade::{first_success, Strategy};
use crate::error::{TubeError, TubeResult};
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Stream `url` into `dest`. An empty body counts as failure and leaves no
/// file behind.
pub async fn direct_fetch(
    client: &Client,
    url: &str,
    user_agent: &str,
    dest: &Path,
) -> TubeResult<u64> {
    let response = client.get(url).header(USER_AGENT, user_agent).send().await?;
    if !response.status().is_success() {
        return Err(TubeError::HttpStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(e.into());
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if written == 0 {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(TubeError::EmptyDownload {
            url: url.to_string(),
        });
    }

    info!(bytes = written, dest = %dest.display(), "Direct fetch complete");
    Ok(written)
}

/// First direct media-file URL in a page's source
pub fn extract_media_link(html: &str) -> Option<String> {
    let re = Regex::new(
        r#"https?://[^\s"'<>]+?\.(?:mp3|m4a|webm|opus|ogg|mp4)(?:\?[^\s"'<>]*)?(?:["'\s<>]|$)"#,
    )
    .ok()?;
    re.find(html).map(|m| {
        m.as_str()
            .trim_end_matches(|c: char| matches!(c, '"' | '\'' | '<' | '>') || c.is_whitespace())
            .replace("&amp;", "&")
    })
}

/// What the fallback tactics work from
pub struct FallbackInput {
    pub source_url: String,
    pub dest: PathBuf,
}

/// Drive a third-party conversion page, then fetch the link it produces
pub struct BrowserConversion {
    converter: Arc<dyn BrowserConverter>,
    client: Client,
    user_agent: String,
}

#[async_trait]
impl Strategy<FallbackInput, PathBuf> for BrowserConversion {
    fn name(&self) -> &'static str {
        "browser conversion"
    }

    async fn attempt(&self, input: &FallbackInput) -> Option<PathBuf> {
        let link = match self.converter.convert(&input.source_url).await {
            Ok(link) => link,
            Err(e) => {
                warn!("Browser conversion failed: {}", e);
                return None;
            }
        };
        match direct_fetch(&self.client, &link, &self.user_agent, &input.dest).await {
            Ok(_) => Some(input.dest.clone()),
            Err(e) => {
                warn!("Fetching converted audio failed: {}", e);
                None
            }
        }
    }
}

/// Secondary audio backend. The direct stream fetch is used per resolved
/// selector; the escalation tactics run behind the first-success
/// combinator once the selector ladder is exhausted.
pub struct AudioFallback {
    user_agent: String,
    tactics: Vec<Box<dyn Strategy<FallbackInput, PathBuf>>>,
}

impl AudioFallback {
    pub fn new(
        client: Client,
        user_agent: &str,
        converter: Option<Arc<dyn BrowserConverter>>,
    ) -> Self {
        let mut tactics: Vec<Box<dyn Strategy<FallbackInput, PathBuf>>> = Vec::new();
        if let Some(converter) = converter {
            tactics.push(Box::new(BrowserConversion {
                converter,
                client,
                user_agent: user_agent.to_string(),
            }));
        }
        Self {
            user_agent: user_agent.to_string(),
            tactics,
        }
    }

    /// Stream one resolved media URL through `client`
    pub async fn fetch(&self, client: &Client, url: &str, dest: &Path) -> TubeResult<u64> {
        direct_fetch(client, url, &self.user_agent, dest).await
    }

    /// Run the escalation tactics in order until one produces a file
    pub async fn acquire(&self, input: &FallbackInput) -> Option<(&'static str, PathBuf)> {
        if self.tactics.is_empty() {
            warn!("No fallback tactics configured");
            return None;
        }
        first_success(&self.tactics, input).await
    }

    pub fn tactic_names(&self) -> Vec<&'static str> {
        self.tactics.iter().map(|t| t.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::stub::StubConverter;

    #[test]
    fn test_extract_media_link() {
        let html = r#"<a class="btn" href="https://cdn.example.net/dl/song.mp3?token=a1&amp;exp=9">Download</a>"#;
        assert_eq!(
            extract_media_link(html).as_deref(),
            Some("https://cdn.example.net/dl/song.mp3?token=a1&exp=9")
        );
        assert_eq!(
            extract_media_link("see https://x.io/a/b.m4a").as_deref(),
            Some("https://x.io/a/b.m4a")
        );
        assert!(extract_media_link("<a href='/about.html'>about</a>").is_none());
    }

    #[tokio::test]
    async fn test_direct_fetch_writes_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/media")
            .match_header("user-agent", "TestAgent/1.0")
            .with_status(200)
            .with_body(vec![1u8; 3000])
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio.download");
        let written = direct_fetch(
            &Client::new(),
            &format!("{}/media", server.url()),
            "TestAgent/1.0",
            &dest,
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(written, 3000);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 3000);
    }

    #[tokio::test]
    async fn test_zero_length_is_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/empty")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio.download");
        let err = direct_fetch(&Client::new(), &format!("{}/empty", server.url()), "UA", &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, TubeError::EmptyDownload { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/gone")
            .with_status(403)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = direct_fetch(
            &Client::new(),
            &format!("{}/gone", server.url()),
            "UA",
            &dir.path().join("x"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TubeError::HttpStatus { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_cascade_falls_through_to_browser() {
        let mut server = mockito::Server::new_async().await;
        let _converted = server
            .mock("GET", "/converted.mp3")
            .with_status(200)
            .with_body(vec![9u8; 2048])
            .create_async()
            .await;

        let converter = StubConverter::returning(&format!("{}/converted.mp3", server.url()));
        let fallback = AudioFallback::new(Client::new(), "UA", Some(Arc::new(converter)));
        assert_eq!(fallback.tactic_names(), vec!["browser conversion"]);

        let dir = tempfile::tempdir().unwrap();
        let input = FallbackInput {
            source_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            dest: dir.path().join("audio.download"),
        };

        let (tactic, path) = fallback.acquire(&input).await.unwrap();
        assert_eq!(tactic, "browser conversion");
        assert_eq!(std::fs::metadata(path).unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn test_cascade_without_converter_gives_up() {
        let fallback = AudioFallback::new(Client::new(), "UA", None);
        assert!(fallback.tactic_names().is_empty());
        let dir = tempfile::tempdir().unwrap();
        let input = FallbackInput {
            source_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            dest: dir.path().join("audio.download"),
        };
        assert!(fallback.acquire(&input).await.is_none());
    }
}
