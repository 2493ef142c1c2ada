//! Analysis request scheduler
//!
//! A bounded FIFO queue of directory analysis requests drained by a fixed
//! pool of worker tasks. Each directory path has at most one queued request:
//! a duplicate submission only raises the queued request's priority. Once a
//! worker picks a request up, the path counts as running and a new
//! submission for it is accepted as fresh work, which then waits for the
//! running analysis of that path to finish before it starts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::analyzer::{AnalysisResult, MediaAnalyzer};
use crate::core::error::{CatalogError, Result};
use crate::db::models::CatalogDirectory;

/// Receives the outcome of one analysis
pub type AnalysisCallback = Box<dyn FnOnce(Result<AnalysisResult>) + Send + 'static>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Upper bound on one whole `analyze` call
    pub analysis_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1000,
            analysis_timeout: Duration::from_secs(300),
        }
    }
}

/// A directory waiting for analysis
pub struct AnalysisRequest {
    pub request_id: String,
    pub directory_path: String,
    pub share_id: String,
    pub priority: i32,
    pub submitted_at: DateTime<Utc>,
    callback: Option<AnalysisCallback>,
    ticket: u64,
}

impl AnalysisRequest {
    pub fn new(
        directory_path: impl Into<String>,
        share_id: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            directory_path: directory_path.into(),
            share_id: share_id.into(),
            priority,
            submitted_at: Utc::now(),
            callback: None,
            ticket: 0,
        }
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<AnalysisResult>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    fn intake(&self) -> Intake<'_> {
        Intake {
            request_id: &self.request_id,
            directory_path: &self.directory_path,
            share_id: &self.share_id,
            priority: self.priority,
            submitted_at: self.submitted_at,
            has_callback: self.callback.is_some(),
        }
    }

    fn complete(&mut self, outcome: Result<AnalysisResult>) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}

impl fmt::Debug for AnalysisRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRequest")
            .field("request_id", &self.request_id)
            .field("directory_path", &self.directory_path)
            .field("share_id", &self.share_id)
            .field("priority", &self.priority)
            .field("submitted_at", &self.submitted_at)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Where a directory path currently is in the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PathState {
    Queued {
        priority: i32,
        submitted_at: DateTime<Utc>,
    },
    Running {
        priority: i32,
        started_at: DateTime<Utc>,
    },
}

/// Tally of a whole-catalog submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkSubmission {
    pub directories: usize,
    pub queued: usize,
    pub coalesced: usize,
    pub failed: usize,
}

/// Priority for the `index`-th directory of a bulk submission: 10 for the
/// first hundred, one less per hundred after that, never below 1
pub fn bulk_priority(index: usize) -> i32 {
    let step = i32::try_from(index / 100).unwrap_or(i32::MAX);
    10i32.saturating_sub(step).max(1)
}

/// Outcome of a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Queued { request_id: String },
    /// Merged into the request already queued for the path
    Coalesced { priority: i32 },
}

#[derive(Debug, Clone)]
struct PathEntry {
    state: PathState,
    share_id: String,
    ticket: u64,
}

/// The plain fields of a request needed for admission. The request itself
/// holds a callback that is `Send` but not `Sync`, so it is never borrowed
/// across an await.
struct Intake<'a> {
    request_id: &'a str,
    directory_path: &'a str,
    share_id: &'a str,
    priority: i32,
    submitted_at: DateTime<Utc>,
    has_callback: bool,
}

enum Admission {
    Coalesced(i32),
    Admitted(u64),
}

pub struct AnalysisScheduler {
    analyzer: Arc<MediaAnalyzer>,
    config: SchedulerConfig,
    paths: Mutex<HashMap<String, PathEntry>>,
    /// Serializes analyses of the same path
    path_guards: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    sender: mpsc::Sender<AnalysisRequest>,
    receiver: Arc<Mutex<mpsc::Receiver<AnalysisRequest>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    next_ticket: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalysisScheduler {
    pub fn new(analyzer: Arc<MediaAnalyzer>, config: SchedulerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            analyzer,
            config,
            paths: Mutex::new(HashMap::new()),
            path_guards: std::sync::Mutex::new(HashMap::new()),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            next_ticket: AtomicU64::new(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(CatalogError::SchedulerStopped);
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CatalogError::AlreadyRunning);
        }

        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.config.workers.max(1) {
            let scheduler = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                scheduler.worker_loop(worker_id).await;
            }));
        }

        info!(
            workers = workers.len(),
            queue_capacity = self.config.queue_capacity,
            analysis_timeout_secs = self.config.analysis_timeout.as_secs(),
            "Analysis scheduler started"
        );
        Ok(())
    }

    /// Stop dequeuing, wait for running analyses, then drop what is still queued
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Analysis worker terminated abnormally");
            }
        }

        let mut dropped = 0usize;
        {
            let mut receiver = self.receiver.lock().await;
            while let Ok(mut request) = receiver.try_recv() {
                dropped += 1;
                request.complete(Err(CatalogError::SchedulerStopped));
            }
        }
        self.paths
            .lock()
            .await
            .retain(|_, entry| !matches!(entry.state, PathState::Queued { .. }));

        info!(dropped_requests = dropped, "Analysis scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    /// Queue a directory without a callback, waiting while the queue is full
    pub async fn submit(
        &self,
        directory_path: &str,
        share_id: &str,
        priority: i32,
    ) -> Result<Submission> {
        self.submit_request(
            AnalysisRequest::new(directory_path, share_id, priority),
            &CancellationToken::new(),
        )
        .await
    }

    /// Queue a request, waiting while the queue is full until `cancel` fires
    pub async fn submit_request(
        &self,
        mut request: AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<Submission> {
        let ticket = match self.admit(request.intake()).await? {
            Admission::Coalesced(priority) => return Ok(Submission::Coalesced { priority }),
            Admission::Admitted(ticket) => ticket,
        };
        request.ticket = ticket;
        let path = request.directory_path.clone();
        let request_id = request.request_id.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.forget(&path, ticket).await;
                debug!(directory = %path, "Submission cancelled while waiting for queue space");
                Err(CatalogError::Cancelled(format!("submission for {}", path)))
            }
            _ = self.shutdown.cancelled() => {
                self.forget(&path, ticket).await;
                Err(CatalogError::SchedulerStopped)
            }
            sent = self.sender.send(request) => match sent {
                Ok(()) => Ok(Submission::Queued { request_id }),
                Err(_) => {
                    self.forget(&path, ticket).await;
                    Err(CatalogError::SchedulerStopped)
                }
            }
        }
    }

    /// Queue a request only if there is room right now
    pub async fn try_submit(&self, mut request: AnalysisRequest) -> Result<Submission> {
        let ticket = match self.admit(request.intake()).await? {
            Admission::Coalesced(priority) => return Ok(Submission::Coalesced { priority }),
            Admission::Admitted(ticket) => ticket,
        };
        request.ticket = ticket;
        let path = request.directory_path.clone();
        let request_id = request.request_id.clone();

        match self.sender.try_send(request) {
            Ok(()) => Ok(Submission::Queued { request_id }),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.forget(&path, ticket).await;
                warn!(directory = %path, "Analysis queue full, request rejected");
                Err(CatalogError::QueueFull(format!("no room for {}", path)))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.forget(&path, ticket).await;
                Err(CatalogError::SchedulerStopped)
            }
        }
    }

    /// Queue every directory the catalog knows about, earliest first with
    /// decaying priority. `on_complete` may attach a callback per directory.
    /// A directory that cannot be queued is logged and skipped; cancellation
    /// or a stopped scheduler ends the pass with an error.
    pub async fn submit_all<F>(
        &self,
        cancel: &CancellationToken,
        mut on_complete: F,
    ) -> Result<BulkSubmission>
    where
        F: FnMut(&CatalogDirectory) -> Option<AnalysisCallback> + Send,
    {
        let directories = self.analyzer.store().list_catalog_directories().await?;
        info!(count = directories.len(), "Queueing every catalog directory for analysis");

        let mut summary = BulkSubmission {
            directories: directories.len(),
            ..BulkSubmission::default()
        };
        for (index, directory) in directories.iter().enumerate() {
            let mut request = AnalysisRequest::new(
                directory.directory_path.as_str(),
                directory.share_id.as_str(),
                bulk_priority(index),
            );
            request.callback = on_complete(directory);

            match self.submit_request(request, cancel).await {
                Ok(Submission::Queued { .. }) => summary.queued += 1,
                Ok(Submission::Coalesced { .. }) => summary.coalesced += 1,
                Err(e @ (CatalogError::Cancelled(_) | CatalogError::SchedulerStopped)) => {
                    return Err(e)
                }
                Err(e) => {
                    error!(
                        directory = %directory.directory_path,
                        share = %directory.share_id,
                        error = %e,
                        "Failed to queue directory analysis"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            queued = summary.queued,
            coalesced = summary.coalesced,
            failed = summary.failed,
            "Catalog directories queued"
        );
        Ok(summary)
    }

    /// Priority of the queued request for a path, if one is queued
    pub async fn pending_priority(&self, directory_path: &str) -> Option<i32> {
        match self.paths.lock().await.get(directory_path)?.state {
            PathState::Queued { priority, .. } => Some(priority),
            PathState::Running { .. } => None,
        }
    }

    pub async fn path_state(&self, directory_path: &str) -> Option<PathState> {
        self.paths.lock().await.get(directory_path).map(|e| e.state)
    }

    /// Number of queued (not yet running) paths
    pub async fn pending_count(&self) -> usize {
        self.paths
            .lock()
            .await
            .values()
            .filter(|e| matches!(e.state, PathState::Queued { .. }))
            .count()
    }

    async fn admit(&self, intake: Intake<'_>) -> Result<Admission> {
        if self.shutdown.is_cancelled() {
            return Err(CatalogError::SchedulerStopped);
        }

        let mut paths = self.paths.lock().await;
        if let Some(entry) = paths.get_mut(intake.directory_path) {
            if let PathState::Queued { priority, .. } = &mut entry.state {
                *priority = (*priority).max(intake.priority);
                if entry.share_id != intake.share_id {
                    warn!(
                        directory = %intake.directory_path,
                        queued_share = %entry.share_id,
                        share = %intake.share_id,
                        "Request for another share coalesced into the queued analysis"
                    );
                }
                info!(
                    directory = %intake.directory_path,
                    priority = *priority,
                    dropped_callback = intake.has_callback,
                    "Analysis already queued, request coalesced"
                );
                return Ok(Admission::Coalesced(*priority));
            }
        }

        let id = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        paths.insert(
            intake.directory_path.to_string(),
            PathEntry {
                state: PathState::Queued {
                    priority: intake.priority,
                    submitted_at: intake.submitted_at,
                },
                share_id: intake.share_id.to_string(),
                ticket: id,
            },
        );
        debug!(
            directory = %intake.directory_path,
            share = %intake.share_id,
            priority = intake.priority,
            request_id = %intake.request_id,
            "Analysis request admitted"
        );
        Ok(Admission::Admitted(id))
    }

    /// Drop the path entry if it still belongs to `ticket`
    async fn forget(&self, directory_path: &str, ticket: u64) {
        let mut paths = self.paths.lock().await;
        if paths.get(directory_path).map_or(false, |e| e.ticket == ticket) {
            paths.remove(directory_path);
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "Analysis worker started");
        loop {
            let request = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(request) => request,
                        None => break,
                    },
                }
            };
            self.process(worker_id, request).await;
        }
        debug!(worker_id, "Analysis worker stopped");
    }

    async fn process(&self, worker_id: usize, mut request: AnalysisRequest) {
        let path = request.directory_path.clone();
        let guard = self.path_guard(&path);
        let permit = guard.clone().lock_owned().await;

        let share = request.share_id.clone();
        let priority = self
            .mark_running(&path, &share, request.ticket, request.priority)
            .await;
        info!(
            worker_id,
            directory = %path,
            share = %share,
            priority,
            request_id = %request.request_id,
            queued_ms = (Utc::now() - request.submitted_at).num_milliseconds(),
            "Starting directory analysis"
        );

        let analyzer = Arc::clone(&self.analyzer);
        let directory = path.clone();
        let mut handle = tokio::spawn(async move { analyzer.analyze(&directory, &share).await });

        let outcome = match timeout(self.config.analysis_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!(worker_id, directory = %path, error = %join_error, "Analysis task panicked");
                Err(CatalogError::TaskError(format!(
                    "analysis of {} aborted: {}",
                    path, join_error
                )))
            }
            Err(_) => {
                handle.abort();
                Err(CatalogError::Timeout(format!(
                    "analysis of {} exceeded {:?}",
                    path, self.config.analysis_timeout
                )))
            }
        };

        match &outcome {
            Ok(result) => info!(
                worker_id,
                directory = %path,
                classified = result.is_classified(),
                files_updated = result.updated_files.len(),
                "Directory analysis finished"
            ),
            Err(e) => error!(
                worker_id,
                directory = %path,
                error = %e,
                error_type = e.error_type(),
                stage = e.stage().map(|s| s.as_str()).unwrap_or("none"),
                "Directory analysis failed"
            ),
        }

        self.mark_finished(&path, request.ticket).await;
        drop(permit);
        self.release_path_guard(&path, guard);

        request.complete(outcome);
    }

    /// Flip the path to running; returns the effective (possibly raised) priority
    async fn mark_running(&self, path: &str, share_id: &str, ticket: u64, priority: i32) -> i32 {
        let mut paths = self.paths.lock().await;
        let priority = match paths.get(path) {
            Some(PathEntry {
                state: PathState::Queued { priority, .. },
                ticket: queued,
                ..
            }) if *queued == ticket => *priority,
            _ => priority,
        };
        paths.insert(
            path.to_string(),
            PathEntry {
                state: PathState::Running {
                    priority,
                    started_at: Utc::now(),
                },
                share_id: share_id.to_string(),
                ticket,
            },
        );
        priority
    }

    /// Remove the running entry unless a newer request has taken the path
    async fn mark_finished(&self, directory_path: &str, ticket: u64) {
        let mut paths = self.paths.lock().await;
        if let Some(entry) = paths.get(directory_path) {
            if entry.ticket == ticket && matches!(entry.state, PathState::Running { .. }) {
                paths.remove(directory_path);
            }
        }
    }

    fn path_guard(&self, directory_path: &str) -> Arc<Mutex<()>> {
        let mut guards = self
            .path_guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guards.entry(directory_path.to_string()).or_default().clone()
    }

    fn release_path_guard(&self, directory_path: &str, guard: Arc<Mutex<()>>) {
        drop(guard);
        let mut guards = self
            .path_guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guards
            .get(directory_path)
            .map_or(false, |g| Arc::strong_count(g) == 1)
        {
            guards.remove(directory_path);
        }
    }
}
