//! Per-channel job status registry shared by every concurrent invocation.
//!
//! All transitions happen under one mutex so check-then-set is atomic per
//! channel key. Entries are created on first start and never removed; idle is
//! stored explicitly once a job has run. Closing the registry refuses new
//! starts under the same lock that cancels running jobs.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use archivist_core::current_unix_timestamp_ms;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Lifecycle state of one channel's cataloging job.
pub enum JobState {
    #[default]
    Idle,
    Running,
    CancelRequested,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::CancelRequested => "cancel_requested",
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

#[derive(Debug, Default)]
struct JobEntry {
    state: JobState,
    job_id: Option<u64>,
    started_unix_ms: Option<u64>,
    run_count: u64,
    cancel_tx: Option<watch::Sender<bool>>,
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryJobSnapshot {
    pub channel_id: String,
    pub state: JobState,
    pub job_id: Option<u64>,
    pub started_unix_ms: Option<u64>,
    pub run_count: u64,
}

#[derive(Debug)]
struct HistoryJobRegistryInner {
    entries: Mutex<HashMap<String, JobEntry>>,
    next_job_id: AtomicU64,
    // Set while `entries` is locked and never reset.
    closed: AtomicBool,
}

/// Shared mapping from channel id to job state.
#[derive(Debug, Clone)]
pub struct HistoryJobRegistry {
    inner: Arc<HistoryJobRegistryInner>,
}

impl Default for HistoryJobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryJobRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HistoryJobRegistryInner {
                entries: Mutex::new(HashMap::new()),
                next_job_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Missing entries read as [`JobState::Idle`].
    pub fn get(&self, channel_id: &str) -> JobState {
        lock_unpoisoned(&self.inner.entries)
            .get(channel_id)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Atomically moves `Idle` to `Running` and hands out the job lease.
    ///
    /// Returns `None` when a job is already running or cancelling for the
    /// channel, or once the registry has been closed.
    pub fn try_set_running(&self, channel_id: &str) -> Option<JobLease> {
        let mut entries = lock_unpoisoned(&self.inner.entries);
        if self.inner.closed.load(Ordering::Acquire) {
            return None;
        }
        let entry = entries.entry(channel_id.to_string()).or_default();
        if entry.state.is_active() {
            return None;
        }
        let job_id = self.inner.next_job_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        entry.state = JobState::Running;
        entry.job_id = Some(job_id);
        entry.started_unix_ms = Some(current_unix_timestamp_ms());
        entry.run_count = entry.run_count.saturating_add(1);
        entry.cancel_tx = Some(cancel_tx);
        Some(JobLease {
            registry: self.clone(),
            channel_id: channel_id.to_string(),
            job_id,
            cancel_token: HistoryCancelToken { rx: cancel_rx },
            released: false,
        })
    }

    /// Atomically moves `Running` to `CancelRequested`; false for any other state.
    pub fn request_cancel(&self, channel_id: &str) -> bool {
        let mut entries = lock_unpoisoned(&self.inner.entries);
        entries.get_mut(channel_id).is_some_and(cancel_entry)
    }

    /// Requests cancellation for every running job, returning the affected channels.
    pub fn request_cancel_all(&self) -> Vec<String> {
        let running = self
            .snapshot()
            .into_iter()
            .filter(|entry| entry.state == JobState::Running)
            .map(|entry| entry.channel_id)
            .collect::<Vec<_>>();
        running
            .into_iter()
            .filter(|channel_id| self.request_cancel(channel_id))
            .collect()
    }

    /// Refuses every later start and requests cancellation for running jobs.
    ///
    /// Both happen under one lock, so no start can slip in between.
    pub fn close(&self) -> Vec<String> {
        let mut entries = lock_unpoisoned(&self.inner.entries);
        self.inner.closed.store(true, Ordering::Release);
        let mut cancelled = entries
            .iter_mut()
            .filter_map(|(channel_id, entry)| cancel_entry(entry).then(|| channel_id.clone()))
            .collect::<Vec<_>>();
        cancelled.sort();
        cancelled
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the channel to `Idle`. Workers release through [`JobLease`].
    pub fn clear(&self, channel_id: &str) {
        let mut entries = lock_unpoisoned(&self.inner.entries);
        if let Some(entry) = entries.get_mut(channel_id) {
            reset_entry(entry);
        }
    }

    fn release(&self, channel_id: &str, job_id: u64) {
        let mut entries = lock_unpoisoned(&self.inner.entries);
        if let Some(entry) = entries.get_mut(channel_id) {
            if entry.job_id == Some(job_id) {
                reset_entry(entry);
            }
        }
    }

    /// Entries sorted by channel id.
    pub fn snapshot(&self) -> Vec<HistoryJobSnapshot> {
        let entries = lock_unpoisoned(&self.inner.entries);
        let mut rows = entries
            .iter()
            .map(|(channel_id, entry)| HistoryJobSnapshot {
                channel_id: channel_id.clone(),
                state: entry.state,
                job_id: entry.job_id,
                started_unix_ms: entry.started_unix_ms,
                run_count: entry.run_count,
            })
            .collect::<Vec<_>>();
        rows.sort_by(|left, right| left.channel_id.cmp(&right.channel_id));
        rows
    }

    pub fn active_job_count(&self) -> usize {
        lock_unpoisoned(&self.inner.entries)
            .values()
            .filter(|entry| entry.state.is_active())
            .count()
    }
}

fn cancel_entry(entry: &mut JobEntry) -> bool {
    if entry.state != JobState::Running {
        return false;
    }
    entry.state = JobState::CancelRequested;
    if let Some(cancel_tx) = entry.cancel_tx.as_ref() {
        cancel_tx.send_replace(true);
    }
    true
}

fn reset_entry(entry: &mut JobEntry) {
    entry.state = JobState::Idle;
    entry.job_id = None;
    entry.started_unix_ms = None;
    entry.cancel_tx = None;
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cooperative cancellation signal handed to a worker at start.
#[derive(Debug, Clone)]
pub struct HistoryCancelToken {
    rx: watch::Receiver<bool>,
}

impl HistoryCancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested or the owning entry is cleared.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Ownership of one `Running` registry entry.
///
/// Dropping the lease clears the entry exactly once, whichever way the worker exits.
#[derive(Debug)]
pub struct JobLease {
    registry: HistoryJobRegistry,
    channel_id: String,
    job_id: u64,
    cancel_token: HistoryCancelToken,
    released: bool,
}

impl JobLease {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn cancel_token(&self) -> &HistoryCancelToken {
        &self.cancel_token
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release(&self.channel_id, self.job_id);
        }
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        self.release_once();
    }
}
