//! Worker contract for history cataloging jobs.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::history_job_registry::{HistoryCancelToken, JobLease};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// The invocation that triggered a job; workers reply to its origin channel.
pub struct HistoryTrigger {
    pub actor_id: String,
    pub origin_channel_id: String,
    pub message_id: Option<String>,
}

/// One job handed to a [`HistoryWorker`].
///
/// The job owns the registry lease; dropping it returns the channel to idle.
#[derive(Debug)]
pub struct HistoryJob {
    lease: JobLease,
    trigger: HistoryTrigger,
}

impl HistoryJob {
    pub fn new(lease: JobLease, trigger: HistoryTrigger) -> Self {
        Self { lease, trigger }
    }

    pub fn channel_id(&self) -> &str {
        self.lease.channel_id()
    }

    pub fn job_id(&self) -> u64 {
        self.lease.job_id()
    }

    pub fn trigger(&self) -> &HistoryTrigger {
        &self.trigger
    }

    pub fn cancel_token(&self) -> HistoryCancelToken {
        self.lease.cancel_token().clone()
    }

    /// Checkpoint poll; workers call this at least once per fetched page.
    pub fn is_cancel_requested(&self) -> bool {
        self.lease.is_cancel_requested()
    }

    /// Clears the registry entry now instead of at drop.
    pub fn finish(self) {
        self.lease.release();
    }
}

#[async_trait]
/// Trait contract for `HistoryWorker` behavior.
///
/// Workers report their own progress and completion to the chat.
pub trait HistoryWorker: Send + Sync {
    async fn run(&self, job: HistoryJob);
}

/// Task handle for one started job.
#[derive(Debug)]
pub struct HistoryJobHandle {
    channel_id: String,
    job_id: u64,
    handle: JoinHandle<()>,
}

impl HistoryJobHandle {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker task; a panicking worker surfaces as an error.
    pub async fn wait(self) -> Result<()> {
        let channel_id = self.channel_id;
        let job_id = self.job_id;
        self.handle.await.map_err(|error| {
            anyhow!("history job {job_id} for channel {channel_id} aborted: {error}")
        })
    }
}

/// Spawns the worker on its own task and returns the handle.
pub fn spawn_history_job(worker: Arc<dyn HistoryWorker>, job: HistoryJob) -> HistoryJobHandle {
    let channel_id = job.channel_id().to_string();
    let job_id = job.job_id();
    let handle = tokio::spawn(async move {
        worker.run(job).await;
    });
    HistoryJobHandle {
        channel_id,
        job_id,
        handle,
    }
}
