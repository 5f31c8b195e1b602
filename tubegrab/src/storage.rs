use crate::error::{TubeError, TubeResult};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_BUCKET: &str = "audios";

/// Pushes finished files somewhere public
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload `local_path` as `target_name`; the public URL on success
    async fn upload(&self, local_path: &Path, target_name: &str) -> Option<String>;
}

fn content_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("mp4") => "video/mp4",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Supabase storage over its REST API
pub struct SupabaseStorage {
    client: Client,
    base_url: Url,
    key: String,
    bucket: String,
    folder: Option<String>,
}

impl SupabaseStorage {
    pub fn new(base_url: &str, key: &str, bucket: &str) -> TubeResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| TubeError::Configuration {
            message: format!("Invalid storage URL {}: {}", base_url, e),
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| TubeError::Configuration {
                message: format!("Failed to create storage client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url,
            key: key.to_string(),
            bucket: bucket.to_string(),
            folder: None,
        })
    }

    /// Credentials from `SUPABASE_URL` / `SUPABASE_KEY`; `None` when unset
    pub fn from_env() -> TubeResult<Option<Self>> {
        let (Ok(url), Ok(key)) = (std::env::var("SUPABASE_URL"), std::env::var("SUPABASE_KEY"))
        else {
            return Ok(None);
        };
        if url.trim().is_empty() || key.trim().is_empty() {
            return Ok(None);
        }
        let bucket =
            std::env::var("SUPABASE_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string());
        Self::new(url.trim(), key.trim(), &bucket).map(Some)
    }

    /// Store objects under `folder/` inside the bucket
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    fn object_url(&self, public: bool, target_name: &str) -> TubeResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| TubeError::Configuration {
                message: format!("Storage URL cannot be a base: {}", self.base_url),
            })?;
            segments.pop_if_empty().extend(["storage", "v1", "object"]);
            if public {
                segments.push("public");
            }
            segments.push(&self.bucket);
            if let Some(folder) = &self.folder {
                segments.push(folder);
            }
            segments.push(target_name);
        }
        Ok(url)
    }

    pub fn public_url(&self, target_name: &str) -> TubeResult<String> {
        self.object_url(true, target_name).map(String::from)
    }

    async fn put(&self, local_path: &Path, target_name: &str) -> TubeResult<String> {
        let body = tokio::fs::read(local_path).await?;
        let url = self.object_url(false, target_name)?;

        let response = self
            .client
            .post(url.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.key))
            .header("apikey", &self.key)
            .header("x-upsert", "true")
            .header(CONTENT_TYPE, content_type(target_name))
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TubeError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        self.public_url(target_name)
    }
}

#[async_trait]
impl Uploader for SupabaseStorage {
    async fn upload(&self, local_path: &Path, target_name: &str) -> Option<String> {
        match self.put(local_path, target_name).await {
            Ok(url) => {
                info!("Uploaded {} to {}", target_name, url);
                Some(url)
            }
            Err(e) => {
                warn!("Upload of {} failed: {}", target_name, e);
                None
            }
        }
    }
}

#[cfg(test)]
pub mod stub {
    use super::*;
    use parking_lot::Mutex;

    /// Records uploads and hands back a fake public URL
    #[derive(Default)]
    pub struct StubUploader {
        pub uploaded: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Uploader for StubUploader {
        async fn upload(&self, local_path: &Path, target_name: &str) -> Option<String> {
            if !local_path.exists() {
                return None;
            }
            self.uploaded.lock().push(target_name.to_string());
            Some(format!("https://storage.example.com/{}", target_name))
        }
    }
}
