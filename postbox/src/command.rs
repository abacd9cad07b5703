//! Line commands understood by the `postbox` front end.

use postbox_store::{ChatId, PendingId};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/new NAME`
    NewChat(String),
    /// `/chats`
    Chats,
    /// `/open ID`
    Open(ChatId),
    /// `/history`
    History,
    /// `/read`
    Read,
    /// `/retry`: sweep the whole outbox.
    Retry,
    /// `/retry-one ID`
    RetryOne(PendingId),
    /// `/discard ID`
    Discard(PendingId),
    /// `/online`
    Online,
    /// `/offline`
    Offline,
    /// `/clear`
    Clear,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// Anything not starting with `/`: a message for the open chat.
    Send(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("/{0} needs an argument")]
    MissingArgument(&'static str),

    #[error("not a valid id: {0:?}")]
    InvalidId(String),

    #[error("unknown command /{0} (try /help)")]
    Unknown(String),
}

/// Help text listing every command.
pub const HELP: &str = "\
/new NAME        create a chat
/chats           list chats
/open ID         open a chat
/history         show the open chat
/read            mark the open chat read
/retry           retry every pending message
/retry-one ID    retry one pending message of the open chat
/discard ID      drop a pending message
/online          report the network as up
/offline         report the network as down and stop sending
/clear           delete all chats
/quit            exit
anything else is sent to the open chat";

/// Parse one input line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns [`CommandError`] for an unknown command, a missing argument or an
/// id that is not a number.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "new" => Command::NewChat(required(arg, "new")?.to_string()),
        "chats" => Command::Chats,
        "open" => Command::Open(parse_id(required(arg, "open")?)?),
        "history" => Command::History,
        "read" => Command::Read,
        "retry" => Command::Retry,
        "retry-one" => Command::RetryOne(parse_id(required(arg, "retry-one")?)?),
        "discard" => Command::Discard(parse_id(required(arg, "discard")?)?),
        "online" => Command::Online,
        "offline" => Command::Offline,
        "clear" => Command::Clear,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn required<'a>(arg: &'a str, command: &'static str) -> Result<&'a str, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument(command))
    } else {
        Ok(arg)
    }
}

fn parse_id<I: std::str::FromStr>(raw: &str) -> Result<I, CommandError> {
    raw.parse().map_err(|_| CommandError::InvalidId(raw.to_string()))
}
