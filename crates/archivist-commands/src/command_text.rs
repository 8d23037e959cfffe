//! Prefix and command-name parsing for inbound chat text.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Commands handled by this crate.
pub enum ChatCommandKind {
    History,
    Exit,
}

impl ChatCommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Exit => "exit",
        }
    }

    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::History => &["catalog", "cache"],
            Self::Exit => &["reload", "kill"],
        }
    }

    /// Case-insensitive lookup by name or alias.
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::History, Self::Exit].into_iter().find(|kind| {
            name.eq_ignore_ascii_case(kind.as_str())
                || kind
                    .aliases()
                    .iter()
                    .any(|alias| name.eq_ignore_ascii_case(alias))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A recognised command with its raw trailing arguments.
pub struct ParsedChatCommand {
    pub kind: ChatCommandKind,
    pub name: String,
    pub args: String,
}

/// Returns `None` for text without the prefix or with an unknown command name.
pub fn parse_chat_command(text: &str, command_prefix: &str) -> Option<ParsedChatCommand> {
    let text = text.trim_start();
    let body = text.strip_prefix(command_prefix)?;
    let body = body.trim_start();
    let name = body.split_whitespace().next()?;
    let kind = ChatCommandKind::from_name(name)?;
    let args = body[name.len()..].trim().to_string();
    Some(ParsedChatCommand {
        kind,
        name: name.to_string(),
        args,
    })
}
