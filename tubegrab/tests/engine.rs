use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tubegrab::tools::{Extractor, ToolContext, Transcoder};
use tubegrab::types::{AttemptOutcome, MediaRequest};
use tubegrab::{
    classify, parse_song_list, ErrorKind, TubeError, TubeGrab, TubeOptions, TubeResult,
};

/// Serves one media URL; `bestaudio` is refused the way YouTube refuses it
struct RefusingExtractor {
    media_url: String,
}

#[async_trait]
impl Extractor for RefusingExtractor {
    async fn download(
        &self,
        _url: &str,
        _selector: &str,
        _output_template: &Path,
        _ctx: &ToolContext,
    ) -> TubeResult<()> {
        Err(TubeError::ToolFailed {
            tool: "yt-dlp".to_string(),
            code: Some(1),
            diagnostics: "ERROR: Requested format is not available".to_string(),
        })
    }

    async fn resolve_url(
        &self,
        _url: &str,
        selector: &str,
        _ctx: &ToolContext,
    ) -> TubeResult<String> {
        if selector == "bestaudio" {
            return Err(TubeError::ToolFailed {
                tool: "yt-dlp".to_string(),
                code: Some(1),
                diagnostics: "ERROR: unable to download video data: HTTP Error 403: Forbidden"
                    .to_string(),
            });
        }
        Ok(self.media_url.clone())
    }

    async fn title(&self, _url: &str, _ctx: &ToolContext) -> TubeResult<String> {
        Ok("Ignored Title".to_string())
    }

    async fn probe_heights(&self, _url: &str, _ctx: &ToolContext) -> TubeResult<Vec<u32>> {
        Ok(vec![])
    }
}

struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn merge(&self, video: &Path, _audio: &Path, output: &Path) -> TubeResult<()> {
        tokio::fs::copy(video, output).await?;
        Ok(())
    }

    async fn to_mp3(&self, input: &Path, output: &Path) -> TubeResult<()> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_mp3_recovers_on_second_selector() {
    let mut server = mockito::Server::new_async().await;
    let media = server
        .mock("GET", "/media")
        .with_status(200)
        .with_body(vec![7u8; 4096])
        .create_async()
        .await;

    let output = tempfile::tempdir().unwrap();
    let options = TubeOptions::new()
        .retry_delay(Duration::ZERO)
        .output_dir(output.path());
    let extractor = RefusingExtractor {
        media_url: format!("{}/media", server.url()),
    };
    let engine =
        TubeGrab::with_tools(options, Arc::new(extractor), Arc::new(CopyTranscoder)).unwrap();

    let request = MediaRequest::from_url("https://youtu.be/dQw4w9WgXcQ", "mp3")
        .unwrap()
        .with_title("Never Gonna: Give You Up!");
    let result = engine.acquire_request(&request).await;

    assert!(result.success, "{:?}", result.message);
    let path = result.output_path.unwrap();
    assert_eq!(path, output.path().join("Never Gonna Give You Up.mp3"));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(
        result.attempts[0].outcome,
        AttemptOutcome::Failed(ErrorKind::Unknown)
    );
    assert_eq!(result.attempts[1].selector, "best[height<=480]");
    media.assert_async().await;
}

#[test]
fn test_public_helpers() {
    assert_eq!(
        classify("ERROR: Sign in to confirm you're not a bot", Some(1)),
        ErrorKind::Blocked
    );
    assert_eq!(
        parse_song_list("1. Hey Jude 2. Let It Be"),
        vec!["Hey Jude", "Let It Be"]
    );
    assert!(MediaRequest::from_url("https://vimeo.com/123", "best").is_err());
}
