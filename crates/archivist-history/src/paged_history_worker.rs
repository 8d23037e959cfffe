//! Reference worker that catalogs channel history page by page.
//!
//! Messages are appended as JSON lines to `<catalog_dir>/<channel>.jsonl`.
//! Ids already present in the catalog are skipped, so a repeat run only adds
//! history that arrived since. Cancellation is checked before every page fetch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use archivist_core::{append_text_line, format_elapsed_ms};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::history_reply::{deliver_reply, CommandReply, ReplySink, HISTORY_REPLY_TITLE};
use crate::history_worker::{HistoryJob, HistoryWorker};

pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One message as catalogued from a channel's history.
pub struct HistoryMessage {
    pub id: String,
    pub author_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
    pub timestamp_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// A batch of messages, newest first, plus the cursor for the next older page.
pub struct HistoryPage {
    pub messages: Vec<HistoryMessage>,
    pub next_before: Option<String>,
}

#[derive(Debug, Error)]
/// Enumerates supported `HistorySourceError` values.
pub enum HistorySourceError {
    #[error("channel {0} is not available to the history source")]
    ChannelUnavailable(String),
    #[error("history fetch failed: {0}")]
    Fetch(String),
}

#[async_trait]
/// Trait contract for `HistoryPageSource` behavior.
pub trait HistoryPageSource: Send + Sync {
    async fn fetch_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<HistoryPage, HistorySourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedHistoryWorkerConfig {
    pub catalog_dir: PathBuf,
    pub page_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRunStatus {
    Completed,
    Cancelled,
    Failed,
}

impl HistoryRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRunReport {
    pub status: HistoryRunStatus,
    pub messages: u64,
    pub skipped: u64,
    pub pages: u64,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Catalogs a channel through a [`HistoryPageSource`].
pub struct PagedHistoryWorker<S> {
    source: S,
    replies: Arc<dyn ReplySink>,
    config: PagedHistoryWorkerConfig,
}

impl<S: HistoryPageSource> PagedHistoryWorker<S> {
    pub fn new(source: S, replies: Arc<dyn ReplySink>, config: PagedHistoryWorkerConfig) -> Self {
        Self {
            source,
            replies,
            config,
        }
    }

    pub fn catalog_path(&self, channel_id: &str) -> PathBuf {
        catalog_path_for_channel(&self.config.catalog_dir, channel_id)
    }

    /// Runs the page loop and reports how it ended. Does not release the job.
    pub async fn catalog(&self, job: &HistoryJob) -> HistoryRunReport {
        let started = Instant::now();
        let channel_id = job.channel_id();
        let catalog_path = self.catalog_path(channel_id);
        let page_size = self.config.page_size.max(1);
        let mut report = HistoryRunReport {
            status: HistoryRunStatus::Completed,
            messages: 0,
            skipped: 0,
            pages: 0,
            elapsed_ms: 0,
            error: None,
        };
        let mut catalogued = match load_catalogued_ids(&catalog_path) {
            Ok(ids) => ids,
            Err(error) => {
                report.status = HistoryRunStatus::Failed;
                report.error = Some(format!("{error:#}"));
                report.elapsed_ms = elapsed_ms_since(started);
                return report;
            }
        };
        let mut before: Option<String> = None;

        loop {
            if job.is_cancel_requested() {
                report.status = HistoryRunStatus::Cancelled;
                break;
            }
            let page = match self
                .source
                .fetch_page(channel_id, before.as_deref(), page_size)
                .await
            {
                Ok(page) => page,
                Err(error) => {
                    report.status = HistoryRunStatus::Failed;
                    report.error = Some(error.to_string());
                    break;
                }
            };
            if page.messages.is_empty() {
                break;
            }
            report.pages = report.pages.saturating_add(1);
            let fresh = page
                .messages
                .iter()
                .filter(|message| catalogued.insert(message.id.clone()))
                .collect::<Vec<_>>();
            if let Err(error) = append_catalog_page(&catalog_path, &fresh) {
                report.status = HistoryRunStatus::Failed;
                report.error = Some(format!("{error:#}"));
                break;
            }
            report.messages = report.messages.saturating_add(fresh.len() as u64);
            report.skipped = report
                .skipped
                .saturating_add((page.messages.len() - fresh.len()) as u64);
            before = page
                .next_before
                .or_else(|| page.messages.last().map(|message| message.id.clone()));
            if page.messages.len() < page_size {
                break;
            }
        }

        report.elapsed_ms = elapsed_ms_since(started);
        report
    }

    fn render_summary(&self, channel_id: &str, report: &HistoryRunReport) -> String {
        let elapsed = format_elapsed_ms(report.elapsed_ms);
        match report.status {
            HistoryRunStatus::Completed if report.skipped > 0 => format!(
                "Finished cataloging history for `{channel_id}`: {} new message(s) across {} page(s) in {elapsed} ({} already catalogued).",
                report.messages, report.pages, report.skipped
            ),
            HistoryRunStatus::Completed => format!(
                "Finished cataloging history for `{channel_id}`: {} message(s) across {} page(s) in {elapsed}.",
                report.messages, report.pages
            ),
            HistoryRunStatus::Cancelled => format!(
                "Cataloging history for `{channel_id}` was cancelled after {} message(s) in {elapsed}.",
                report.messages
            ),
            HistoryRunStatus::Failed => format!(
                "Cataloging history for `{channel_id}` failed after {} message(s): {}",
                report.messages,
                report.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

#[async_trait]
impl<S: HistoryPageSource + 'static> HistoryWorker for PagedHistoryWorker<S> {
    async fn run(&self, job: HistoryJob) {
        let channel_id = job.channel_id().to_string();
        let origin = job.trigger().origin_channel_id.clone();
        let message_id = job.trigger().message_id.clone();
        deliver_reply(
            self.replies.as_ref(),
            CommandReply::new(
                origin.clone(),
                HISTORY_REPLY_TITLE,
                format!("Cataloging history for `{channel_id}`..."),
            )
            .in_reply_to(message_id.as_deref()),
        )
        .await;

        let report = self.catalog(&job).await;
        let job_id = job.job_id();
        job.finish();

        match report.status {
            HistoryRunStatus::Failed => warn!(
                channel_id = %channel_id,
                job_id,
                messages = report.messages,
                error = report.error.as_deref().unwrap_or_default(),
                "history cataloging failed"
            ),
            status => info!(
                channel_id = %channel_id,
                job_id,
                status = status.as_str(),
                messages = report.messages,
                pages = report.pages,
                elapsed_ms = report.elapsed_ms,
                "history cataloging finished"
            ),
        }
        deliver_reply(
            self.replies.as_ref(),
            CommandReply::new(
                origin,
                HISTORY_REPLY_TITLE,
                self.render_summary(&channel_id, &report),
            )
            .in_reply_to(message_id.as_deref()),
        )
        .await;
    }
}

/// Maps a channel id to its catalog file.
///
/// Bytes outside `[A-Za-z0-9_-]` are written as `.xx` hex escapes, so distinct
/// ids never share a file.
pub fn catalog_path_for_channel(catalog_dir: &Path, channel_id: &str) -> PathBuf {
    let mut file_stem = String::with_capacity(channel_id.len());
    for byte in channel_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            file_stem.push(char::from(byte));
        } else {
            file_stem.push_str(&format!(".{byte:02x}"));
        }
    }
    catalog_dir.join(format!("{file_stem}.jsonl"))
}

#[derive(Deserialize)]
struct CatalogLine {
    id: String,
}

/// Ids already written to the catalog at `path`; empty when the file is missing.
fn load_catalogued_ids(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<CatalogLine>(line)
                .map(|entry| entry.id)
                .with_context(|| {
                    format!("invalid catalog line {} in {}", index + 1, path.display())
                })
        })
        .collect()
}

fn elapsed_ms_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn append_catalog_page(path: &Path, messages: &[&HistoryMessage]) -> Result<()> {
    for message in messages {
        let line = serde_json::to_string(message)
            .with_context(|| format!("failed to encode message {}", message.id))?;
        append_text_line(path, &line)?;
    }
    Ok(())
}
