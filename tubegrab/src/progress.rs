use crate::error::{TubeError, TubeResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Found,
    Failed,
    Downloaded,
    Uploaded,
}

/// Outcome of one batch item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub label: String,
    pub url: Option<String>,
    pub status: ItemStatus,
    pub output_path: Option<PathBuf>,
    pub uploaded_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    pub path: PathBuf,
    pub reason: String,
    pub timestamp: u64,
}

/// Shared record of the running batch job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub status: JobStatus,
    pub current_item: String,
    pub phase: String,
    pub progress: usize,
    pub total: usize,
    pub logs: Vec<String>,
    pub results: Vec<ResultEntry>,
    pub screenshots: Vec<Screenshot>,
}

/// Thread-safe handle to the single [`ProgressState`].
///
/// Clones share the same state. All mutation happens under one mutex and
/// snapshots are deep copies.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    state: Arc<Mutex<ProgressState>>,
    worker: Arc<AtomicBool>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        *self.state.lock() = ProgressState::default();
    }

    pub fn update<R>(&self, mutator: impl FnOnce(&mut ProgressState) -> R) -> R {
        mutator(&mut self.state.lock())
    }

    pub fn snapshot(&self) -> ProgressState {
        self.state.lock().clone()
    }

    /// Append a log line, mirrored to tracing
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "tubegrab::progress", "{}", message);
        self.state.lock().logs.push(message);
    }

    pub fn set_phase(&self, phase: impl Into<String>) {
        self.state.lock().phase = phase.into();
    }

    /// Count one finished step
    pub fn advance(&self) {
        self.state.lock().progress += 1;
    }

    pub fn add_screenshot(&self, path: PathBuf, reason: &str) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut state = self.state.lock();
        state.logs.push(format!("📸 Screenshot captured: {}", reason));
        state.screenshots.push(Screenshot {
            path,
            reason: reason.to_string(),
            timestamp,
        });
    }

    /// Claim the single batch worker slot
    pub fn claim_worker(&self) -> TubeResult<WorkerGuard> {
        self.worker
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TubeError::BatchInProgress)?;
        Ok(WorkerGuard {
            slot: self.worker.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.worker.load(Ordering::Acquire)
    }
}

/// Releases the worker slot when dropped
#[derive(Debug)]
pub struct WorkerGuard {
    slot: Arc<AtomicBool>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.slot.store(false, Ordering::Release);
    }
}
