//! Special commands parser for interactive chat mode
//!
//! Special commands manage sessions instead of being sent to the model.
//! They are prefixed with `/`; the command word is case-insensitive, its
//! argument is kept as typed.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new session and make it active
    NewSession,

    /// List sessions with their positions
    ListSessions,

    /// Make the session at this 1-based position active
    SwitchSession(usize),

    /// Rename the active session
    Rename(String),

    /// Delete the active session
    DeleteSession,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command; send as a message
    None,
}

/// Parse user input into a special command
///
/// # Examples
///
/// ```
/// use chatwire::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/switch 2").unwrap(), SpecialCommand::SwitchSession(2));
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    let (word, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((word, arg)) => (word.to_lowercase(), arg.trim()),
        None => (lower.clone(), ""),
    };

    match word.as_str() {
        "/new" => Ok(SpecialCommand::NewSession),
        "/list" | "/sessions" => Ok(SpecialCommand::ListSessions),
        "/delete" => Ok(SpecialCommand::DeleteSession),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/quit" | "/exit" | "exit" | "quit" => Ok(SpecialCommand::Exit),

        "/switch" if arg.is_empty() => Err(CommandError::MissingArgument {
            command: "/switch".to_string(),
            usage: "/switch <number>".to_string(),
        }),
        "/switch" => match arg.parse::<usize>() {
            Ok(position) if position > 0 => Ok(SpecialCommand::SwitchSession(position)),
            _ => Err(CommandError::UnsupportedArgument {
                command: "/switch".to_string(),
                arg: arg.to_string(),
            }),
        },

        "/rename" if arg.is_empty() => Err(CommandError::MissingArgument {
            command: "/rename".to_string(),
            usage: "/rename <title>".to_string(),
        }),
        "/rename" => Ok(SpecialCommand::Rename(arg.to_string())),

        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print help for special commands
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Chat Mode
===========================================

SESSIONS:
  /new            - Start a new session
  /list           - List sessions (the active one is marked with *)
  /switch <n>     - Switch to session number n from /list
  /rename <title> - Rename the active session
  /delete         - Delete the active session (the last one is kept)

OTHER:
  /help           - Show this help message
  /quit           - Exit interactive mode (also: exit, quit)

Anything else is sent to the model. Switching or deleting a session
stops a reply that is still arriving.
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(
            parse_special_command("what is rust?").unwrap(),
            SpecialCommand::None
        );
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(parse_special_command("/new").unwrap(), SpecialCommand::NewSession);
        assert_eq!(parse_special_command("/LIST").unwrap(), SpecialCommand::ListSessions);
        assert_eq!(parse_special_command("/delete").unwrap(), SpecialCommand::DeleteSession);
        assert_eq!(
            parse_special_command("  /switch 3 ").unwrap(),
            SpecialCommand::SwitchSession(3)
        );
    }

    #[test]
    fn test_rename_keeps_case_of_title() {
        assert_eq!(
            parse_special_command("/Rename  Trip to Lisbon").unwrap(),
            SpecialCommand::Rename("Trip to Lisbon".to_string())
        );
    }

    #[test]
    fn test_exit_aliases() {
        for input in ["/quit", "/exit", "exit", "QUIT"] {
            assert_eq!(parse_special_command(input).unwrap(), SpecialCommand::Exit);
        }
    }

    #[test]
    fn test_switch_requires_positive_number() {
        assert!(matches!(
            parse_special_command("/switch"),
            Err(CommandError::MissingArgument { .. })
        ));
        assert!(matches!(
            parse_special_command("/switch 0"),
            Err(CommandError::UnsupportedArgument { .. })
        ));
        assert!(matches!(
            parse_special_command("/switch two"),
            Err(CommandError::UnsupportedArgument { .. })
        ));
    }

    #[test]
    fn test_rename_requires_title() {
        assert!(matches!(
            parse_special_command("/rename   "),
            Err(CommandError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_special_command("/model gpt"),
            Err(CommandError::UnknownCommand("/model gpt".to_string()))
        );
    }
}
