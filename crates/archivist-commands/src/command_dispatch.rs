//! Routes inbound chat messages to the history orchestrator or shutdown.

use std::sync::Arc;

use archivist_access::AuthorizationContext;
use archivist_history::{
    deliver_reply, CommandReply, HistoryInvocation, HistoryJobOrchestrator, HistoryOutcome,
    ReplySink, REPLY_LACKING_BOT_ADMIN,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::command_text::{parse_chat_command, ChatCommandKind, ParsedChatCommand};
use crate::shutdown::ShutdownSignal;

pub const EXIT_REPLY_TITLE: &str = "Command: Exit";
pub const EXIT_REPLY_BODY: &str = "Exiting...";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `InboundChatMessage` received from a chat transport.
pub struct InboundChatMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    pub channel_id: String,
    pub actor_id: String,
    pub text: String,
}

impl InboundChatMessage {
    /// Copy with surrounding whitespace stripped from every id.
    pub fn normalized(&self) -> Self {
        Self {
            message_id: self
                .message_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            channel_id: self.channel_id.trim().to_string(),
            actor_id: self.actor_id.trim().to_string(),
            text: self.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of dispatching one inbound message.
pub enum CommandOutcome {
    History(HistoryOutcome),
    ExitGranted,
    ExitDenied,
    NotACommand,
}

/// Dispatches chat commands against an explicit authorization context.
pub struct CommandDispatcher {
    command_prefix: String,
    orchestrator: Arc<HistoryJobOrchestrator>,
    replies: Arc<dyn ReplySink>,
    shutdown: ShutdownSignal,
}

impl CommandDispatcher {
    pub fn new(
        orchestrator: Arc<HistoryJobOrchestrator>,
        replies: Arc<dyn ReplySink>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            command_prefix: orchestrator.config().command_prefix.clone(),
            orchestrator,
            replies,
            shutdown,
        }
    }

    pub fn orchestrator(&self) -> &Arc<HistoryJobOrchestrator> {
        &self.orchestrator
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub async fn dispatch(
        &self,
        auth: &AuthorizationContext,
        message: &InboundChatMessage,
    ) -> CommandOutcome {
        let Some(command) = parse_chat_command(&message.text, &self.command_prefix) else {
            return CommandOutcome::NotACommand;
        };
        let message = &message.normalized();
        debug!(
            command = command.kind.as_str(),
            channel_id = %message.channel_id,
            actor_id = %message.actor_id,
            commandable = auth.is_commandable_channel(&message.channel_id),
            "dispatching chat command"
        );
        match command.kind {
            ChatCommandKind::History => {
                let invocation = history_invocation(message, &command);
                CommandOutcome::History(self.orchestrator.handle_history(auth, &invocation).await)
            }
            ChatCommandKind::Exit => self.handle_exit(auth, message).await,
        }
    }

    async fn handle_exit(
        &self,
        auth: &AuthorizationContext,
        message: &InboundChatMessage,
    ) -> CommandOutcome {
        if !auth.is_bot_admin(&message.actor_id) {
            warn!(
                channel_id = %message.channel_id,
                actor_id = %message.actor_id,
                reason_code = "exit_denied_lacking_bot_admin",
                "exit denied: actor lacks bot admin"
            );
            deliver_reply(
                self.replies.as_ref(),
                exit_reply(message, REPLY_LACKING_BOT_ADMIN),
            )
            .await;
            return CommandOutcome::ExitDenied;
        }
        deliver_reply(self.replies.as_ref(), exit_reply(message, EXIT_REPLY_BODY)).await;
        info!(
            channel_id = %message.channel_id,
            actor_id = %message.actor_id,
            reason_code = "exit_requested",
            "exit requested, shutting down"
        );
        self.shutdown.trigger();
        CommandOutcome::ExitGranted
    }
}

fn history_invocation(message: &InboundChatMessage, command: &ParsedChatCommand) -> HistoryInvocation {
    HistoryInvocation {
        actor_id: message.actor_id.clone(),
        origin_channel_id: message.channel_id.clone(),
        message_id: message.message_id.clone(),
        args: command.args.clone(),
    }
}

fn exit_reply(message: &InboundChatMessage, body: &str) -> CommandReply {
    CommandReply::new(message.channel_id.clone(), EXIT_REPLY_TITLE, body)
        .in_reply_to(message.message_id.as_deref())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use archivist_access::{ChannelRegistration, ChannelRegistrationFile};
    use archivist_history::{
        HistoryDecision, HistoryJob, HistoryJobRegistry, HistoryOrchestratorConfig,
        HistoryWorker, JobState, ReplyError,
    };
    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        replies: Mutex<Vec<CommandReply>>,
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn send_reply(&self, reply: CommandReply) -> Result<(), ReplyError> {
            self.replies.lock().expect("lock").push(reply);
            Ok(())
        }
    }

    struct NoopWorker;

    #[async_trait]
    impl HistoryWorker for NoopWorker {
        async fn run(&self, _job: HistoryJob) {}
    }

    fn fixture() -> (CommandDispatcher, AuthorizationContext, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Arc::new(HistoryJobOrchestrator::new(
            HistoryOrchestratorConfig {
                command_prefix: "!".to_string(),
                asynchronous_history: false,
            },
            HistoryJobRegistry::new(),
            Arc::new(NoopWorker),
            sink.clone(),
        ));
        let dispatcher = CommandDispatcher::new(orchestrator, sink.clone(), ShutdownSignal::new());
        let mut registrations = ChannelRegistrationFile::default();
        registrations.channels.insert(
            "111".to_string(),
            ChannelRegistration {
                local_admins: vec!["alice".to_string()],
                ..ChannelRegistration::default()
            },
        );
        (
            dispatcher,
            AuthorizationContext::new(["root"], registrations),
            sink,
        )
    }

    fn message(actor: &str, channel: &str, text: &str) -> InboundChatMessage {
        InboundChatMessage {
            message_id: Some("m-1".to_string()),
            channel_id: channel.to_string(),
            actor_id: actor.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn functional_dispatch_routes_history_aliases_to_orchestrator() {
        let (dispatcher, auth, _sink) = fixture();
        let outcome = dispatcher
            .dispatch(&auth, &message("alice", "111", "!Catalog"))
            .await;
        match outcome {
            CommandOutcome::History(history) => {
                assert_eq!(history.decision, HistoryDecision::Local);
                assert_eq!(history.actions.len(), 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            dispatcher.orchestrator().registry().get("111"),
            JobState::Idle
        );
    }

    #[tokio::test]
    async fn functional_exit_by_bot_admin_triggers_shutdown() {
        let (dispatcher, auth, sink) = fixture();
        let outcome = dispatcher
            .dispatch(&auth, &message("root", "555", "!kill"))
            .await;
        assert_eq!(outcome, CommandOutcome::ExitGranted);
        assert!(dispatcher.shutdown().is_triggered());
        let replies = sink.replies.lock().expect("lock");
        assert_eq!(replies[0].body, EXIT_REPLY_BODY);
        assert_eq!(replies[0].title, EXIT_REPLY_TITLE);
    }

    #[tokio::test]
    async fn functional_exit_by_non_admin_is_denied() {
        let (dispatcher, auth, sink) = fixture();
        let outcome = dispatcher
            .dispatch(&auth, &message("alice", "111", "!exit"))
            .await;
        assert_eq!(outcome, CommandOutcome::ExitDenied);
        assert!(!dispatcher.shutdown().is_triggered());
        let replies = sink.replies.lock().expect("lock");
        assert_eq!(replies[0].body, REPLY_LACKING_BOT_ADMIN);
    }

    #[tokio::test]
    async fn regression_exit_matches_padded_ids_like_history() {
        let (dispatcher, auth, sink) = fixture();
        let mut padded = message(" root ", " 555 ", "!exit");
        padded.message_id = Some(" m-9 ".to_string());
        let outcome = dispatcher.dispatch(&auth, &padded).await;
        assert_eq!(outcome, CommandOutcome::ExitGranted);
        let replies = sink.replies.lock().expect("lock");
        assert_eq!(replies[0].channel_id, "555");
        assert_eq!(replies[0].reply_to_message_id.as_deref(), Some("m-9"));
    }

    #[test]
    fn unit_normalized_message_trims_ids_and_keeps_text() {
        let mut raw = message(" alice\t", "111 ", " !history ");
        raw.message_id = Some("   ".to_string());
        let normalized = raw.normalized();
        assert_eq!(normalized.actor_id, "alice");
        assert_eq!(normalized.channel_id, "111");
        assert_eq!(normalized.message_id, None);
        assert_eq!(normalized.text, " !history ");
    }

    #[tokio::test]
    async fn regression_plain_chatter_is_not_a_command() {
        let (dispatcher, auth, sink) = fixture();
        let outcome = dispatcher
            .dispatch(&auth, &message("alice", "111", "history please"))
            .await;
        assert_eq!(outcome, CommandOutcome::NotACommand);
        assert!(sink.replies.lock().expect("lock").is_empty());
    }

    #[test]
    fn unit_inbound_chat_message_parses_without_message_id() {
        let parsed: InboundChatMessage = serde_json::from_str(
            r#"{"channel_id":"111","actor_id":"alice","text":"!history"}"#,
        )
        .expect("parse");
        assert_eq!(parsed.message_id, None);
        assert_eq!(parsed.text, "!history");
    }
}
