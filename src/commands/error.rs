//! Command Errors
//!
//! Every user-facing failure of a command is one of these variants. They
//! never escape the command layer: [`CommandHandler::execute`] turns them
//! into RESP error replies with Redis-compatible text.
//!
//! [`CommandHandler::execute`]: crate::commands::CommandHandler::execute

use crate::protocol::RespValue;
use crate::storage::WrongType;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Argument count (or pairing) does not fit the command.
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    /// The expiry does not fit on the clock.
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR empty command")]
    EmptyCommand,

    /// The command could not be executed at all (worker panic, pool gone).
    #[error("ERR server error")]
    Internal,
}

/// Result type for command handlers.
pub type CommandResult = Result<RespValue, CommandError>;

impl From<WrongType> for CommandError {
    fn from(_: WrongType) -> Self {
        CommandError::WrongType
    }
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::Error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text() {
        assert_eq!(
            RespValue::from(CommandError::WrongArity("get")),
            RespValue::error("ERR wrong number of arguments for 'get' command")
        );
        assert_eq!(
            CommandError::WrongType.to_string(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );
        assert_eq!(
            CommandError::UnknownCommand("foo".into()).to_string(),
            "ERR unknown command 'foo'"
        );
        assert_eq!(
            CommandError::InvalidExpireTime("set").to_string(),
            "ERR invalid expire time in 'set' command"
        );
    }
}
