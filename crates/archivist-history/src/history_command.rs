//! Argument parsing for the `history` command.

const HISTORY_ARG_ALL: &str = "all";
const HISTORY_ARG_CANCEL: &str = "cancel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Sub-mode of a history invocation targeting the origin channel.
pub enum HistorySubMode {
    Start,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Parsed batch request issued from a designated admin channel.
pub enum DesignatedHistoryRequest {
    Start { channel_ids: Vec<String> },
    Cancel { channel_ids: Vec<String> },
    Invalid,
}

pub fn is_history_all_argument(args: &str) -> bool {
    args.trim().eq_ignore_ascii_case(HISTORY_ARG_ALL)
}

/// Anything other than `cancel` starts a local job.
pub fn parse_local_sub_mode(args: &str) -> HistorySubMode {
    if args.trim().eq_ignore_ascii_case(HISTORY_ARG_CANCEL) {
        HistorySubMode::Cancel
    } else {
        HistorySubMode::Start
    }
}

/// Parses `<id>,<id>,...` or `cancel <id>,<id>,...`.
pub fn parse_designated_request(args: &str) -> DesignatedHistoryRequest {
    let trimmed = args.trim();
    let first_token = trimmed.split_whitespace().next().unwrap_or_default();
    if first_token.eq_ignore_ascii_case(HISTORY_ARG_CANCEL) {
        let remainder = trimmed[first_token.len()..].trim();
        return match parse_channel_list(remainder) {
            Some(channel_ids) => DesignatedHistoryRequest::Cancel { channel_ids },
            None => DesignatedHistoryRequest::Invalid,
        };
    }
    match parse_channel_list(trimmed) {
        Some(channel_ids) => DesignatedHistoryRequest::Start { channel_ids },
        None => DesignatedHistoryRequest::Invalid,
    }
}

/// Splits a comma list, trimming each id and dropping empties and repeats.
///
/// Returns `None` when nothing remains or any id contains inner whitespace.
pub fn parse_channel_list(raw: &str) -> Option<Vec<String>> {
    let mut channel_ids: Vec<String> = Vec::new();
    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if token.chars().any(char::is_whitespace) {
            return None;
        }
        if !channel_ids.iter().any(|existing| existing == token) {
            channel_ids.push(token.to_string());
        }
    }
    if channel_ids.is_empty() {
        None
    } else {
        Some(channel_ids)
    }
}
