use std::sync::{Arc, Mutex};
use std::time::Duration;

use archivist_access::{AuthorizationContext, ChannelRegistration, ChannelRegistrationFile};
use archivist_commands::{CommandDispatcher, CommandOutcome, InboundChatMessage, ShutdownSignal};
use archivist_history::{
    CommandReply, HistoryActionKind, HistoryDecision, HistoryJob, HistoryJobOrchestrator,
    HistoryJobRegistry, HistoryOrchestratorConfig, HistoryWorker, JobState, ReplyError, ReplySink,
    REPLY_HISTORY_CANCELLED, REPLY_LACKING_BOT_ADMIN,
};
use async_trait::async_trait;
use tokio::sync::watch;

const LOCAL_CHANNEL: &str = "100";
const OTHER_CHANNEL: &str = "200";
const ADMIN_CHANNEL: &str = "900";

#[derive(Default)]
struct RecordingSink {
    replies: Mutex<Vec<CommandReply>>,
}

impl RecordingSink {
    fn bodies(&self) -> Vec<String> {
        self.replies
            .lock()
            .expect("replies lock")
            .iter()
            .map(|reply| reply.body.clone())
            .collect()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send_reply(&self, reply: CommandReply) -> Result<(), ReplyError> {
        self.replies.lock().expect("replies lock").push(reply);
        Ok(())
    }
}

/// Holds each job open until it is cancelled or released.
struct HeldWorker {
    release: watch::Sender<bool>,
    started: Mutex<Vec<String>>,
}

impl HeldWorker {
    fn new() -> Self {
        let (release, _rx) = watch::channel(false);
        Self {
            release,
            started: Mutex::new(Vec::new()),
        }
    }

    fn release_all(&self) {
        self.release.send_replace(true);
    }
}

#[async_trait]
impl HistoryWorker for HeldWorker {
    async fn run(&self, job: HistoryJob) {
        self.started
            .lock()
            .expect("started lock")
            .push(job.channel_id().to_string());
        let mut token = job.cancel_token();
        let mut release = self.release.subscribe();
        tokio::select! {
            _ = token.cancelled() => {}
            _ = async {
                let _ = release.wait_for(|released| *released).await;
            } => {}
        }
        job.finish();
    }
}

struct Harness {
    auth: AuthorizationContext,
    dispatcher: CommandDispatcher,
    replies: Arc<RecordingSink>,
    worker: Arc<HeldWorker>,
}

impl Harness {
    fn new() -> Self {
        let mut registrations = ChannelRegistrationFile::default();
        for channel_id in [LOCAL_CHANNEL, OTHER_CHANNEL] {
            registrations.channels.insert(
                channel_id.to_string(),
                ChannelRegistration {
                    allow_commands: true,
                    local_admins: vec!["alice".to_string()],
                    label: None,
                },
            );
        }
        registrations.admin_channels.insert(ADMIN_CHANNEL.to_string());
        let auth = AuthorizationContext::new(["root"], registrations);

        let replies = Arc::new(RecordingSink::default());
        let worker = Arc::new(HeldWorker::new());
        let orchestrator = HistoryJobOrchestrator::new(
            HistoryOrchestratorConfig {
                asynchronous_history: true,
                ..HistoryOrchestratorConfig::default()
            },
            HistoryJobRegistry::new(),
            worker.clone(),
            replies.clone(),
        );
        let dispatcher =
            CommandDispatcher::new(Arc::new(orchestrator), replies.clone(), ShutdownSignal::new());
        Self {
            auth,
            dispatcher,
            replies,
            worker,
        }
    }

    fn registry(&self) -> &HistoryJobRegistry {
        self.dispatcher.orchestrator().registry()
    }

    async fn send(&self, channel_id: &str, actor_id: &str, text: &str) -> CommandOutcome {
        self.dispatcher
            .dispatch(
                &self.auth,
                &InboundChatMessage {
                    message_id: Some(format!("msg-{channel_id}")),
                    channel_id: channel_id.to_string(),
                    actor_id: actor_id.to_string(),
                    text: text.to_string(),
                },
            )
            .await
    }

    async fn wait_until_idle(&self, channel_id: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.registry().get(channel_id) != JobState::Idle {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job should clear");
    }
}

fn history_outcome(outcome: CommandOutcome) -> archivist_history::HistoryOutcome {
    match outcome {
        CommandOutcome::History(outcome) => outcome,
        other => panic!("expected history outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn integration_local_admin_start_marks_channel_running() {
    let harness = Harness::new();
    let outcome = history_outcome(harness.send(LOCAL_CHANNEL, "alice", "ddg history").await);

    assert_eq!(outcome.decision, HistoryDecision::Local);
    assert_eq!(
        outcome.channels_with(HistoryActionKind::Started),
        vec![LOCAL_CHANNEL]
    );
    assert_eq!(harness.registry().get(LOCAL_CHANNEL), JobState::Running);

    harness.worker.release_all();
    harness.dispatcher.orchestrator().join_detached().await;
    assert_eq!(harness.registry().get(LOCAL_CHANNEL), JobState::Idle);
}

#[tokio::test]
async fn integration_local_cancel_acknowledges_and_clears_job() {
    let harness = Harness::new();
    harness.send(LOCAL_CHANNEL, "alice", "ddg history").await;
    assert_eq!(harness.registry().get(LOCAL_CHANNEL), JobState::Running);

    let outcome =
        history_outcome(harness.send(LOCAL_CHANNEL, "alice", "ddg history cancel").await);
    assert_eq!(
        outcome.channels_with(HistoryActionKind::CancelRequested),
        vec![LOCAL_CHANNEL]
    );
    assert!(harness
        .replies
        .bodies()
        .contains(&REPLY_HISTORY_CANCELLED.to_string()));

    harness.wait_until_idle(LOCAL_CHANNEL).await;
    harness.dispatcher.orchestrator().join_detached().await;
}

#[tokio::test]
async fn integration_batch_all_skips_channels_already_running() {
    let harness = Harness::new();
    harness.send(OTHER_CHANNEL, "alice", "ddg history").await;
    assert_eq!(harness.registry().get(OTHER_CHANNEL), JobState::Running);

    let outcome = history_outcome(harness.send(ADMIN_CHANNEL, "root", "ddg history all").await);
    assert_eq!(outcome.decision, HistoryDecision::BatchAll);
    assert_eq!(
        outcome.channels_with(HistoryActionKind::Started),
        vec![LOCAL_CHANNEL]
    );
    assert_eq!(
        outcome.channels_with(HistoryActionKind::SkippedAlreadyRunning),
        vec![OTHER_CHANNEL]
    );
    assert_eq!(harness.registry().get(LOCAL_CHANNEL), JobState::Running);
    assert_eq!(harness.registry().get(OTHER_CHANNEL), JobState::Running);
    assert_eq!(
        harness
            .worker
            .started
            .lock()
            .expect("started lock")
            .iter()
            .filter(|channel| channel.as_str() == OTHER_CHANNEL)
            .count(),
        1
    );

    harness.registry().request_cancel_all();
    harness.dispatcher.orchestrator().join_detached().await;
}

#[tokio::test]
async fn integration_designated_list_denied_for_non_bot_admin() {
    let harness = Harness::new();
    let outcome = history_outcome(
        harness
            .send(ADMIN_CHANNEL, "alice", "ddg history 100,200")
            .await,
    );

    assert_eq!(outcome.decision, HistoryDecision::DeniedBotAdmin);
    assert!(outcome.actions.is_empty());
    assert_eq!(harness.replies.bodies(), vec![REPLY_LACKING_BOT_ADMIN]);
    assert_eq!(harness.registry().get(LOCAL_CHANNEL), JobState::Idle);
    assert_eq!(harness.registry().get(OTHER_CHANNEL), JobState::Idle);
}

#[tokio::test]
async fn integration_unregistered_channel_is_ignored_silently() {
    let harness = Harness::new();
    let outcome = history_outcome(harness.send("555", "root", "ddg history").await);

    assert_eq!(outcome.decision, HistoryDecision::Ignored);
    assert!(outcome.actions.is_empty());
    assert!(harness.replies.bodies().is_empty());
    assert!(harness.registry().snapshot().is_empty());
}

#[tokio::test]
async fn integration_designated_cancel_acks_only_running_channels() {
    let harness = Harness::new();
    harness.send(LOCAL_CHANNEL, "alice", "ddg history").await;

    let outcome = history_outcome(
        harness
            .send(ADMIN_CHANNEL, "root", "ddg history cancel 100,200")
            .await,
    );
    assert_eq!(
        outcome.channels_with(HistoryActionKind::CancelRequested),
        vec![LOCAL_CHANNEL]
    );
    assert_eq!(
        outcome.channels_with(HistoryActionKind::CancelIgnored),
        vec![OTHER_CHANNEL]
    );
    assert_eq!(outcome.replies_delivered, 1);

    harness.wait_until_idle(LOCAL_CHANNEL).await;
    harness.dispatcher.orchestrator().join_detached().await;
}

#[tokio::test]
async fn integration_exit_triggers_shutdown_only_for_bot_admin() {
    let harness = Harness::new();
    assert_eq!(
        harness.send(LOCAL_CHANNEL, "alice", "ddg exit").await,
        CommandOutcome::ExitDenied
    );
    assert!(!harness.dispatcher.shutdown().is_triggered());

    assert_eq!(
        harness.send(LOCAL_CHANNEL, "root", "ddg exit").await,
        CommandOutcome::ExitGranted
    );
    assert!(harness.dispatcher.shutdown().is_triggered());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn regression_concurrent_starts_launch_one_worker_per_channel() {
    let harness = Arc::new(Harness::new());
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let harness = Arc::clone(&harness);
        tasks.push(tokio::spawn(async move {
            history_outcome(harness.send(LOCAL_CHANNEL, "alice", "ddg history").await)
                .channels_with(HistoryActionKind::Started)
                .len()
        }));
    }
    let mut started = 0;
    for task in tasks {
        started += task.await.expect("task");
    }
    assert_eq!(started, 1);
    assert_eq!(harness.worker.started.lock().expect("started lock").len(), 1);

    harness.registry().request_cancel_all();
    harness.dispatcher.orchestrator().join_detached().await;
}

#[tokio::test]
async fn regression_history_after_exit_close_starts_nothing() {
    let harness = Harness::new();
    harness.send(LOCAL_CHANNEL, "alice", "ddg history").await;
    assert_eq!(
        harness.send(ADMIN_CHANNEL, "root", "ddg exit").await,
        CommandOutcome::ExitGranted
    );
    assert_eq!(
        harness.dispatcher.orchestrator().close(),
        vec![LOCAL_CHANNEL.to_string()]
    );

    let outcome = history_outcome(harness.send(ADMIN_CHANNEL, "root", "ddg history all").await);
    assert_eq!(
        outcome.channels_with(HistoryActionKind::SkippedShuttingDown),
        vec![LOCAL_CHANNEL, OTHER_CHANNEL]
    );
    assert!(harness
        .registry()
        .snapshot()
        .iter()
        .all(|entry| entry.state != JobState::Running));

    tokio::time::timeout(
        Duration::from_secs(5),
        harness.dispatcher.orchestrator().join_detached(),
    )
    .await
    .expect("cancelled jobs should finish");
    assert_eq!(harness.registry().active_job_count(), 0);
}
