//! Reply contract between command handling and the chat transport.

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub const HISTORY_REPLY_TITLE: &str = "Command: History";
pub const REPLY_LACKING_LOCAL_ADMIN: &str =
    "You do not have local admin permissions for this channel.";
pub const REPLY_LACKING_BOT_ADMIN: &str = "You do not have bot admin permissions.";
pub const REPLY_HISTORY_CANCELLED: &str = "History cataloging was cancelled.";

pub fn reply_channel_not_registered(channel_id: &str) -> String {
    format!("Channel `{channel_id}` is not registered.")
}

pub fn reply_history_usage(command_prefix: &str) -> String {
    format!(
        "Please enter valid channel ID(s)...\n\nExample: `{command_prefix}history <id1>,<id2>,<id3>`"
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outbound reply addressed to one channel.
pub struct CommandReply {
    pub channel_id: String,
    pub title: String,
    pub body: String,
    pub reply_to_message_id: Option<String>,
}

impl CommandReply {
    pub fn new(
        channel_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            title: title.into(),
            body: body.into(),
            reply_to_message_id: None,
        }
    }

    pub fn in_reply_to(mut self, message_id: Option<&str>) -> Self {
        self.reply_to_message_id = message_id.map(str::to_string);
        self
    }
}

#[derive(Debug, Error)]
/// Delivery failure reported by a [`ReplySink`].
///
/// Missing send permission is not an error here; sinks report it through
/// [`ReplySink::can_send`] and the reply is skipped before sending.
pub enum ReplyError {
    #[error("reply transport failed: {0}")]
    Transport(String),
}

#[async_trait]
/// Trait contract for `ReplySink` behavior.
pub trait ReplySink: Send + Sync {
    /// Whether the bot may post in `channel_id`.
    fn can_send(&self, channel_id: &str) -> bool {
        let _ = channel_id;
        true
    }

    async fn send_reply(&self, reply: CommandReply) -> Result<(), ReplyError>;
}

/// Sends a reply, logging and swallowing delivery failures.
///
/// Returns true when the transport accepted the reply.
pub async fn deliver_reply(sink: &dyn ReplySink, reply: CommandReply) -> bool {
    if !sink.can_send(&reply.channel_id) {
        warn!(
            channel_id = %reply.channel_id,
            reason_code = "delivery_missing_send_permission",
            "skipping reply: bot lacks send permission"
        );
        return false;
    }
    let channel_id = reply.channel_id.clone();
    match sink.send_reply(reply).await {
        Ok(()) => true,
        Err(error) => {
            warn!(
                channel_id = %channel_id,
                reason_code = "delivery_failed",
                %error,
                "failed to deliver reply"
            );
            false
        }
    }
}
