//! JSON-lines chat transport: inbound messages on stdin, replies on stdout.

use std::io::Write;
use std::sync::Mutex;

use archivist_commands::InboundChatMessage;
use archivist_history::{CommandReply, ReplyError, ReplySink};
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct OutboundReplyRecord<'a> {
    channel_id: &'a str,
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<&'a str>,
}

pub fn render_reply_line(reply: &CommandReply) -> Result<String, ReplyError> {
    serde_json::to_string(&OutboundReplyRecord {
        channel_id: &reply.channel_id,
        title: &reply.title,
        body: &reply.body,
        reply_to_message_id: reply.reply_to_message_id.as_deref(),
    })
    .map_err(|error| ReplyError::Transport(format!("failed to encode reply: {error}")))
}

/// Blank lines yield `Ok(None)`.
pub fn parse_inbound_line(line: &str) -> anyhow::Result<Option<InboundChatMessage>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let message = serde_json::from_str::<InboundChatMessage>(line)
        .map_err(|error| anyhow::anyhow!("invalid inbound message: {error}"))?;
    Ok(Some(message))
}

/// Writes one JSON object per reply to stdout.
#[derive(Default)]
pub struct StdoutReplySink {
    write_lock: Mutex<()>,
}

#[async_trait]
impl ReplySink for StdoutReplySink {
    async fn send_reply(&self, reply: CommandReply) -> Result<(), ReplyError> {
        let line = render_reply_line(&reply)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")
            .and_then(|()| stdout.flush())
            .map_err(|error| ReplyError::Transport(error.to_string()))
    }
}
