//! Background batch: a numbered song list is searched, each hit is
//! acquired as mp3 and optionally uploaded, with progress published
//! through the shared tracker.

use crate::acquirer::{sanitize_title, Acquirer};
use crate::error::{TubeError, TubeResult};
use crate::metadata::MetadataClient;
use crate::parser;
use crate::progress::{ItemStatus, JobStatus, ProgressTracker, ResultEntry, WorkerGuard};
use crate::search::SearchClient;
use crate::storage::Uploader;
use crate::types::{AcquisitionResult, MediaRequest, MP3};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Split a numbered list (`1. Song A 2. Song B`, on one line or many)
/// into song names. Input without any numbering is read one song per
/// line.
pub fn parse_song_list(input: &str) -> Vec<String> {
    let input = input.trim();
    if input.is_empty() {
        return Vec::new();
    }
    let Ok(marker) = Regex::new(r"\d+\.") else {
        return Vec::new();
    };

    // "2.0" inside a title is not a marker
    let markers: Vec<(usize, usize)> = marker
        .find_iter(input)
        .filter(|m| {
            !input[m.end()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
        })
        .map(|m| (m.start(), m.end()))
        .collect();

    let collapse = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");

    if markers.is_empty() {
        return input
            .lines()
            .map(collapse)
            .filter(|s| !s.is_empty())
            .collect();
    }

    markers
        .iter()
        .enumerate()
        .map(|(i, &(_, end))| {
            let stop = markers.get(i + 1).map_or(input.len(), |next| next.0);
            collapse(&input[end..stop])
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Handle to a running batch
#[derive(Debug)]
pub struct BatchTicket {
    pub songs: usize,
    pub total_steps: usize,
    handle: JoinHandle<()>,
}

impl BatchTicket {
    /// Wait for the worker to finish
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            error!("Batch worker ended abnormally: {}", e);
        }
    }
}

/// Starts batch jobs. Only one may run at a time per tracker.
#[derive(Clone)]
pub struct BatchRunner {
    acquirer: Arc<Acquirer>,
    search: Arc<SearchClient>,
    tracker: ProgressTracker,
    uploader: Option<Arc<dyn Uploader>>,
    thumbnails: Option<(Arc<MetadataClient>, PathBuf)>,
    search_only: bool,
    search_pause: Duration,
}

impl BatchRunner {
    pub fn new(acquirer: Arc<Acquirer>, search: Arc<SearchClient>, tracker: ProgressTracker) -> Self {
        Self {
            acquirer,
            search,
            tracker,
            uploader: None,
            thumbnails: None,
            search_only: false,
            search_pause: Duration::from_secs(1),
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Save each found video's thumbnail into `dir`
    pub fn with_thumbnails(mut self, metadata: Arc<MetadataClient>, dir: impl Into<PathBuf>) -> Self {
        self.thumbnails = Some((metadata, dir.into()));
        self
    }

    /// Only look the songs up, do not download
    pub fn search_only(mut self, search_only: bool) -> Self {
        self.search_only = search_only;
        self
    }

    /// Pause between consecutive searches
    pub fn search_pause(mut self, pause: Duration) -> Self {
        self.search_pause = pause;
        self
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn steps_per_item(&self) -> usize {
        if self.search_only {
            1
        } else if self.uploader.is_some() {
            3
        } else {
            2
        }
    }

    /// Parse `input` and start the worker. Returns as soon as the worker
    /// is running.
    pub fn start(&self, input: &str) -> TubeResult<BatchTicket> {
        let guard = self.tracker.claim_worker()?;

        let songs = parse_song_list(input);
        if songs.is_empty() {
            self.tracker.reset();
            self.tracker.update(|s| s.status = JobStatus::Error);
            self.tracker.log("❌ No valid songs found!");
            return Err(TubeError::Parse {
                message: "No valid songs found".to_string(),
            });
        }

        let total_steps = songs.len() * self.steps_per_item();
        self.tracker.reset();
        self.tracker.update(|s| {
            s.status = JobStatus::Processing;
            s.total = total_steps;
            s.phase = "Initializing".to_string();
        });
        self.tracker.log(format!(
            "📝 Found {} songs to process • Total steps: {}",
            songs.len(),
            total_steps
        ));

        let count = songs.len();
        let worker = self.clone();
        let handle = tokio::spawn(worker.supervise(songs, guard));
        Ok(BatchTicket {
            songs: count,
            total_steps,
            handle,
        })
    }

    /// Run the batch in its own task so a panic still lands in the tracker
    async fn supervise(self, songs: Vec<String>, _guard: WorkerGuard) {
        let tracker = self.tracker.clone();
        let outcome = tokio::spawn(self.run(songs)).await;
        if let Err(e) = outcome {
            error!("Batch worker failed: {}", e);
            tracker.update(|s| s.status = JobStatus::Error);
            tracker.log(format!("💥 Error: {}", e));
        }
    }

    async fn run(self, songs: Vec<String>) {
        let found = self.search_all(&songs).await;

        let mut downloaded = 0usize;
        let mut uploaded = 0usize;
        if !self.search_only {
            for (index, song, url) in &found {
                let (ok, pushed) = self.process(*index, song, url).await;
                downloaded += usize::from(ok);
                uploaded += usize::from(pushed);
            }
        }

        let summary = if self.search_only {
            format!("🎉 Process complete! {}/{} songs found", found.len(), songs.len())
        } else {
            let upload_status = if self.uploader.is_some() {
                format!(", {} uploaded", uploaded)
            } else {
                String::new()
            };
            format!(
                "🎉 Process complete! {}/{} songs downloaded{}",
                downloaded,
                songs.len(),
                upload_status
            )
        };
        self.tracker.log(summary);
        self.tracker.update(|s| {
            s.status = JobStatus::Completed;
            s.current_item.clear();
        });
    }

    /// Search every song in order. Returns (result index, song, url) per hit.
    async fn search_all(&self, songs: &[String]) -> Vec<(usize, String, String)> {
        let skipped = self.steps_per_item() - 1;
        let mut found = Vec::new();

        for (i, song) in songs.iter().enumerate() {
            self.tracker.update(|s| {
                s.current_item = song.clone();
                s.phase = "Searching for video".to_string();
            });
            self.tracker
                .log(format!("📍 Processing {}/{}: {}", i + 1, songs.len(), song));

            let url = self.search.first_video_url(song).await;
            self.tracker.update(|s| {
                s.progress += 1;
                s.logs.push("🔎 Search step completed".to_string());
                if url.is_some() {
                    s.phase = "Successfully found video URL".to_string();
                } else {
                    // the later steps for this song will never run
                    s.progress += skipped;
                }
                s.results.push(ResultEntry {
                    label: song.clone(),
                    url: url.clone(),
                    status: if url.is_some() {
                        ItemStatus::Found
                    } else {
                        ItemStatus::Failed
                    },
                    output_path: None,
                    uploaded_url: None,
                });
            });

            if let Some(url) = url {
                found.push((i, song.clone(), url));
            }
            if i + 1 < songs.len() && !self.search_pause.is_zero() {
                tokio::time::sleep(self.search_pause).await;
            }
        }
        found
    }

    /// Acquire one song and upload it. Returns (downloaded, uploaded).
    async fn process(&self, index: usize, song: &str, url: &str) -> (bool, bool) {
        self.tracker.update(|s| {
            s.current_item = song.to_string();
            s.phase = "Downloading audio".to_string();
        });
        self.tracker.log(format!("🎵 Downloading audio: {}", song));

        let result = match MediaRequest::from_url(url, MP3) {
            Ok(request) => self.acquirer.acquire(&request.with_title(song)).await,
            Err(e) => AcquisitionResult::failed(&e, Vec::new(), None),
        };

        let output = result.output_path.clone().filter(|_| result.success);
        self.tracker.update(|s| {
            s.progress += 1;
            if output.is_some() {
                s.phase = "Successfully downloaded audio".to_string();
            }
            if let Some(entry) = s.results.get_mut(index) {
                entry.status = if output.is_some() {
                    ItemStatus::Downloaded
                } else {
                    ItemStatus::Failed
                };
                entry.output_path = output.clone();
            }
        });
        match &output {
            Some(path) => self.tracker.log(format!("✅ Saved {}", path.display())),
            None => self.tracker.log(format!(
                "❌ {}: {}",
                song,
                result.message.as_deref().unwrap_or("download failed")
            )),
        }

        if let Some((metadata, dir)) = &self.thumbnails {
            self.save_thumbnail(metadata, dir, song, url).await;
        }

        let Some(uploader) = &self.uploader else {
            return (output.is_some(), false);
        };
        let public_url = match &output {
            Some(path) => {
                self.tracker.log(format!("📤 Uploading {}...", song));
                let target = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{}.mp3", sanitize_title(song, "audio")));
                uploader.upload(path, &target).await
            }
            None => None,
        };

        self.tracker.update(|s| {
            s.progress += 1;
            if let Some(public_url) = &public_url {
                s.phase = "Successfully uploaded audio".to_string();
                s.logs.push(format!("🔗 Uploaded: {}", public_url));
                if let Some(entry) = s.results.get_mut(index) {
                    entry.status = ItemStatus::Uploaded;
                    entry.uploaded_url = Some(public_url.clone());
                }
            }
        });
        (output.is_some(), public_url.is_some())
    }

    async fn save_thumbnail(&self, metadata: &MetadataClient, dir: &Path, song: &str, url: &str) {
        let Ok(parsed) = parser::parse_url(url) else {
            return;
        };
        let name = sanitize_title(song, "thumbnail");
        match metadata.download_thumbnail(&parsed.video_id, dir, &name).await {
            Ok(Some(path)) => info!("Saved thumbnail {}", path.display()),
            Ok(None) => debug!("No usable thumbnail for {}", parsed.video_id),
            Err(e) => debug!("Thumbnail download failed: {}", e),
        }
    }
}
