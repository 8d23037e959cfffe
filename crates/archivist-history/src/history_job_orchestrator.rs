//! Decision engine for the `history` command.
//!
//! Resolves the invocation mode, gates it through the authorization context,
//! and issues start/cancel transitions against the job registry. Started jobs
//! run on their own task; synchronous mode awaits them inline while
//! asynchronous mode tracks the handle for later reaping or shutdown joins.

use std::sync::{Arc, Mutex, MutexGuard};

use archivist_access::AuthorizationContext;
use tracing::{debug, info, warn};

use crate::history_command::{
    is_history_all_argument, parse_designated_request, parse_local_sub_mode,
    DesignatedHistoryRequest, HistorySubMode,
};
use crate::history_job_registry::{HistoryJobRegistry, JobLease};
use crate::history_reply::{
    deliver_reply, reply_channel_not_registered, reply_history_usage, CommandReply, ReplySink,
    HISTORY_REPLY_TITLE, REPLY_HISTORY_CANCELLED, REPLY_LACKING_BOT_ADMIN,
    REPLY_LACKING_LOCAL_ADMIN,
};
use crate::history_worker::{
    spawn_history_job, HistoryJob, HistoryJobHandle, HistoryTrigger, HistoryWorker,
};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Runtime configuration for [`HistoryJobOrchestrator`].
pub struct HistoryOrchestratorConfig {
    pub command_prefix: String,
    pub asynchronous_history: bool,
}

impl Default for HistoryOrchestratorConfig {
    fn default() -> Self {
        Self {
            command_prefix: "ddg ".to_string(),
            asynchronous_history: false,
        }
    }
}

/// One `history` invocation as received from the command router.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryInvocation {
    pub actor_id: String,
    pub origin_channel_id: String,
    pub message_id: Option<String>,
    pub args: String,
}

impl HistoryInvocation {
    fn trigger(&self) -> HistoryTrigger {
        HistoryTrigger {
            actor_id: self.actor_id.clone(),
            origin_channel_id: self.origin_channel_id.clone(),
            message_id: self.message_id.clone(),
        }
    }

    fn reply(&self, body: impl Into<String>) -> CommandReply {
        CommandReply::new(self.origin_channel_id.clone(), HISTORY_REPLY_TITLE, body)
            .in_reply_to(self.message_id.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Mode the orchestrator resolved for an invocation.
pub enum HistoryDecision {
    BatchAll,
    Local,
    Designated,
    DeniedLocalAdmin,
    DeniedBotAdmin,
    UsageHint,
    Ignored,
}

impl HistoryDecision {
    pub fn reason_code(self) -> &'static str {
        match self {
            Self::BatchAll => "history_batch_all",
            Self::Local => "history_local",
            Self::Designated => "history_designated",
            Self::DeniedLocalAdmin => "history_denied_lacking_local_admin",
            Self::DeniedBotAdmin => "history_denied_lacking_bot_admin",
            Self::UsageHint => "history_usage_hint",
            Self::Ignored => "history_ignored_unregistered_channel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Per-channel action taken while handling an invocation.
pub enum HistoryActionKind {
    Started,
    CancelRequested,
    CancelIgnored,
    SkippedAlreadyRunning,
    SkippedShuttingDown,
    RejectedNotRegistered,
}

impl HistoryActionKind {
    pub fn reason_code(self) -> &'static str {
        match self {
            Self::Started => "history_job_started",
            Self::CancelRequested => "history_cancel_requested",
            Self::CancelIgnored => "history_cancel_ignored_not_running",
            Self::SkippedAlreadyRunning => "history_skipped_already_running",
            Self::SkippedShuttingDown => "history_skipped_shutting_down",
            Self::RejectedNotRegistered => "history_rejected_channel_not_registered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryAction {
    pub channel_id: String,
    pub kind: HistoryActionKind,
}

/// Result of one invocation, in the order actions were issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryOutcome {
    pub decision: HistoryDecision,
    pub actions: Vec<HistoryAction>,
    pub replies_delivered: usize,
}

impl HistoryOutcome {
    fn new(decision: HistoryDecision) -> Self {
        Self {
            decision,
            actions: Vec::new(),
            replies_delivered: 0,
        }
    }

    fn push(&mut self, channel_id: &str, kind: HistoryActionKind) {
        self.actions.push(HistoryAction {
            channel_id: channel_id.to_string(),
            kind,
        });
    }

    /// Channel ids whose action matched `kind`.
    pub fn channels_with(&self, kind: HistoryActionKind) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|action| action.kind == kind)
            .map(|action| action.channel_id.as_str())
            .collect()
    }
}

/// Starts, tracks, and cancels cataloging jobs for `history` invocations.
pub struct HistoryJobOrchestrator {
    config: HistoryOrchestratorConfig,
    registry: HistoryJobRegistry,
    worker: Arc<dyn HistoryWorker>,
    replies: Arc<dyn ReplySink>,
    detached: Mutex<Vec<HistoryJobHandle>>,
}

impl HistoryJobOrchestrator {
    pub fn new(
        config: HistoryOrchestratorConfig,
        registry: HistoryJobRegistry,
        worker: Arc<dyn HistoryWorker>,
        replies: Arc<dyn ReplySink>,
    ) -> Self {
        Self {
            config,
            registry,
            worker,
            replies,
            detached: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &HistoryOrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &HistoryJobRegistry {
        &self.registry
    }

    /// Handles one `history` invocation end to end.
    pub async fn handle_history(
        &self,
        auth: &AuthorizationContext,
        invocation: &HistoryInvocation,
    ) -> HistoryOutcome {
        self.reap_detached().await;
        let origin = invocation.origin_channel_id.as_str();
        let actor = invocation.actor_id.as_str();

        if is_history_all_argument(&invocation.args)
            && auth.is_bot_admin(actor)
            && auth.is_designated_admin_channel(origin)
        {
            return self.handle_batch_all(auth, invocation).await;
        }

        if auth.is_channel_registered(origin) {
            if !auth.commands_allowed(origin) {
                info!(
                    channel_id = %origin,
                    actor_id = %actor,
                    reason_code = "history_ignored_commands_disabled",
                    "history requested in channel with commands disabled"
                );
                return HistoryOutcome::new(HistoryDecision::Ignored);
            }
            return self.handle_local(auth, invocation).await;
        }

        if auth.is_designated_admin_channel(origin) {
            return self.handle_designated(auth, invocation).await;
        }

        info!(
            channel_id = %origin,
            actor_id = %actor,
            reason_code = HistoryDecision::Ignored.reason_code(),
            "history requested in unregistered channel"
        );
        HistoryOutcome::new(HistoryDecision::Ignored)
    }

    async fn handle_batch_all(
        &self,
        auth: &AuthorizationContext,
        invocation: &HistoryInvocation,
    ) -> HistoryOutcome {
        let mut outcome = HistoryOutcome::new(HistoryDecision::BatchAll);
        let targets = auth.registered_channel_ids();
        info!(
            actor_id = %invocation.actor_id,
            targets = targets.len(),
            "beginning history for all registered channels"
        );
        for channel_id in &targets {
            self.try_start(channel_id, invocation, &mut outcome).await;
        }
        info!(
            started = outcome.channels_with(HistoryActionKind::Started).len(),
            skipped = outcome
                .channels_with(HistoryActionKind::SkippedAlreadyRunning)
                .len(),
            "history for all registered channels dispatched"
        );
        outcome
    }

    async fn handle_local(
        &self,
        auth: &AuthorizationContext,
        invocation: &HistoryInvocation,
    ) -> HistoryOutcome {
        let origin = invocation.origin_channel_id.as_str();
        if !auth.is_local_admin(&invocation.actor_id, origin) {
            let mut outcome = HistoryOutcome::new(HistoryDecision::DeniedLocalAdmin);
            warn!(
                channel_id = %origin,
                actor_id = %invocation.actor_id,
                reason_code = outcome.decision.reason_code(),
                "history denied: actor lacks local admin"
            );
            self.reply(invocation, REPLY_LACKING_LOCAL_ADMIN, &mut outcome)
                .await;
            return outcome;
        }

        let mut outcome = HistoryOutcome::new(HistoryDecision::Local);
        match parse_local_sub_mode(&invocation.args) {
            HistorySubMode::Cancel => {
                let kind = if self.registry.request_cancel(origin) {
                    HistoryActionKind::CancelRequested
                } else {
                    HistoryActionKind::CancelIgnored
                };
                outcome.push(origin, kind);
                info!(
                    channel_id = %origin,
                    actor_id = %invocation.actor_id,
                    reason_code = kind.reason_code(),
                    "history cancellation acknowledged"
                );
                self.reply(invocation, REPLY_HISTORY_CANCELLED, &mut outcome)
                    .await;
            }
            HistorySubMode::Start => {
                self.try_start(origin, invocation, &mut outcome).await;
            }
        }
        outcome
    }

    async fn handle_designated(
        &self,
        auth: &AuthorizationContext,
        invocation: &HistoryInvocation,
    ) -> HistoryOutcome {
        if !auth.is_bot_admin(&invocation.actor_id) {
            let mut outcome = HistoryOutcome::new(HistoryDecision::DeniedBotAdmin);
            warn!(
                channel_id = %invocation.origin_channel_id,
                actor_id = %invocation.actor_id,
                reason_code = outcome.decision.reason_code(),
                "history denied: actor lacks bot admin"
            );
            self.reply(invocation, REPLY_LACKING_BOT_ADMIN, &mut outcome)
                .await;
            return outcome;
        }

        match parse_designated_request(&invocation.args) {
            DesignatedHistoryRequest::Invalid => {
                let mut outcome = HistoryOutcome::new(HistoryDecision::UsageHint);
                info!(
                    actor_id = %invocation.actor_id,
                    reason_code = outcome.decision.reason_code(),
                    "history batch request listed no valid channels"
                );
                let usage = reply_history_usage(&self.config.command_prefix);
                self.reply(invocation, usage, &mut outcome).await;
                outcome
            }
            DesignatedHistoryRequest::Cancel { channel_ids } => {
                let mut outcome = HistoryOutcome::new(HistoryDecision::Designated);
                for channel_id in &channel_ids {
                    if !self.registry.request_cancel(channel_id) {
                        debug!(
                            channel_id = %channel_id,
                            reason_code = HistoryActionKind::CancelIgnored.reason_code(),
                            "skipping cancel: history not running"
                        );
                        outcome.push(channel_id, HistoryActionKind::CancelIgnored);
                        continue;
                    }
                    outcome.push(channel_id, HistoryActionKind::CancelRequested);
                    info!(
                        channel_id = %channel_id,
                        actor_id = %invocation.actor_id,
                        "history cancellation requested from admin channel"
                    );
                    self.reply(invocation, REPLY_HISTORY_CANCELLED, &mut outcome)
                        .await;
                }
                outcome
            }
            DesignatedHistoryRequest::Start { channel_ids } => {
                let mut outcome = HistoryOutcome::new(HistoryDecision::Designated);
                for channel_id in &channel_ids {
                    if !auth.is_channel_registered(channel_id) {
                        outcome.push(channel_id, HistoryActionKind::RejectedNotRegistered);
                        info!(
                            channel_id = %channel_id,
                            actor_id = %invocation.actor_id,
                            reason_code = HistoryActionKind::RejectedNotRegistered.reason_code(),
                            "history target is not registered"
                        );
                        self.reply(
                            invocation,
                            reply_channel_not_registered(channel_id),
                            &mut outcome,
                        )
                        .await;
                        continue;
                    }
                    self.try_start(channel_id, invocation, &mut outcome).await;
                }
                outcome
            }
        }
    }

    async fn try_start(
        &self,
        channel_id: &str,
        invocation: &HistoryInvocation,
        outcome: &mut HistoryOutcome,
    ) {
        let Some(lease) = self.registry.try_set_running(channel_id) else {
            let kind = if self.registry.is_closed() {
                HistoryActionKind::SkippedShuttingDown
            } else {
                HistoryActionKind::SkippedAlreadyRunning
            };
            info!(
                channel_id = %channel_id,
                actor_id = %invocation.actor_id,
                reason_code = kind.reason_code(),
                "history not started"
            );
            outcome.push(channel_id, kind);
            return;
        };
        outcome.push(channel_id, HistoryActionKind::Started);
        self.start(lease, invocation.trigger()).await;
    }

    async fn start(&self, lease: JobLease, trigger: HistoryTrigger) {
        let job = HistoryJob::new(lease, trigger);
        info!(
            channel_id = %job.channel_id(),
            job_id = job.job_id(),
            asynchronous = self.config.asynchronous_history,
            "starting history job"
        );
        let handle = spawn_history_job(self.worker.clone(), job);
        if self.config.asynchronous_history {
            lock_unpoisoned(&self.detached).push(handle);
            return;
        }
        if let Err(error) = handle.wait().await {
            warn!(%error, "history job ended abnormally");
        }
    }

    async fn reply(
        &self,
        invocation: &HistoryInvocation,
        body: impl Into<String>,
        outcome: &mut HistoryOutcome,
    ) {
        if deliver_reply(self.replies.as_ref(), invocation.reply(body)).await {
            outcome.replies_delivered += 1;
        }
    }

    /// Stops accepting starts and cancels every running job.
    ///
    /// Invocations still in flight see their starts skipped.
    pub fn close(&self) -> Vec<String> {
        let cancelled = self.registry.close();
        info!(cancelled = cancelled.len(), "history orchestrator closed");
        cancelled
    }

    /// Number of detached jobs still tracked.
    pub fn detached_job_count(&self) -> usize {
        lock_unpoisoned(&self.detached).len()
    }

    /// Drops finished detached handles, logging any that aborted.
    pub async fn reap_detached(&self) {
        let finished = {
            let mut detached = lock_unpoisoned(&self.detached);
            let (finished, running): (Vec<_>, Vec<_>) = detached
                .drain(..)
                .partition(|handle| handle.is_finished());
            *detached = running;
            finished
        };
        for handle in finished {
            if let Err(error) = handle.wait().await {
                warn!(%error, "detached history job ended abnormally");
            }
        }
    }

    /// Waits for every detached job to finish.
    pub async fn join_detached(&self) {
        let handles = std::mem::take(&mut *lock_unpoisoned(&self.detached));
        for handle in handles {
            if let Err(error) = handle.wait().await {
                warn!(%error, "detached history job ended abnormally");
            }
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
