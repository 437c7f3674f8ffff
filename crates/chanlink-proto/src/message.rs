//! IRC message parsing and serialization.
//!
//! A message is an optional source prefix, a command (verb or three-digit
//! numeric), and arguments of which at most the last may be *trailing*
//! (contain spaces, be empty, or begin with `:`).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::ProtocolError;

/// Maximum serialized length before the CRLF terminator.
pub const MAX_BODY_LEN: usize = 510;

/// One parsed IRC message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Source prefix, without the leading `:`.
    pub prefix: Option<String>,
    /// Command verb or numeric reply code.
    pub command: String,
    /// Arguments in order; the last one may be a trailing argument.
    pub args: Vec<String>,
}

impl Message {
    /// Build a message from a command and arguments.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.into(),
            args,
        }
    }

    /// Build a message with a source prefix.
    pub fn with_prefix(
        prefix: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            prefix: Some(prefix.into()),
            command: command.into(),
            args,
        }
    }

    /// The nick portion of the prefix (everything before `!`), if any.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split('!').next().unwrap_or(prefix))
    }

    /// Argument at `idx`, or `""`.
    pub fn arg(&self, idx: usize) -> &str {
        self.args.get(idx).map(String::as_str).unwrap_or("")
    }

    /// Serialize to a wire line with CRLF appended.
    ///
    /// Fails when the serialized form would exceed the 510-byte body limit.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        let body = self.to_string();
        if body.len() > MAX_BODY_LEN {
            return Err(ProtocolError::MessageTooLong {
                actual: body.len(),
                limit: MAX_BODY_LEN,
            });
        }
        Ok(body + "\r\n")
    }
}

fn needs_trailing(arg: &str) -> bool {
    arg.is_empty() || arg.contains(' ') || arg.starts_with(':')
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        write!(f, "{}", self.command)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i + 1 == self.args.len() && needs_trailing(arg) {
                write!(f, " :{}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = s.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, tail) = stripped.split_once(' ').unwrap_or((stripped, ""));
            rest = tail;
            Some(prefix.to_owned())
        } else {
            None
        };

        let (command, mut tail) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(ProtocolError::MissingCommand);
        }

        let mut args = Vec::new();
        while !tail.is_empty() {
            if let Some(trailing) = tail.strip_prefix(':') {
                args.push(trailing.to_owned());
                break;
            }
            let (arg, next) = tail.split_once(' ').unwrap_or((tail, ""));
            if !arg.is_empty() {
                args.push(arg.to_owned());
            }
            tail = next;
        }

        Ok(Message {
            prefix,
            command: command.to_owned(),
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_privmsg_with_prefix() {
        let msg: Message = ":nick!u@h PRIVMSG #chan :hello world".parse().unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("nick!u@h"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.args, vec!["#chan", "hello world"]);
        assert_eq!(msg.source_nick(), Some("nick"));
    }

    #[test]
    fn parse_numeric_reply() {
        let msg: Message = ":irc.example.org 001 nick :Welcome".parse().unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.args, vec!["nick", "Welcome"]);
    }

    #[test]
    fn parse_without_trailing() {
        let msg: Message = "JOIN #chan".parse().unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.args, vec!["#chan"]);
    }

    #[test]
    fn parse_empty_trailing() {
        let msg: Message = "TOPIC #chan :".parse().unwrap();
        assert_eq!(msg.args, vec!["#chan", ""]);
    }

    #[test]
    fn roundtrip_is_byte_equal() {
        let line = ":nick!u@h PRIVMSG #chan :hello world";
        let msg: Message = line.parse().unwrap();
        assert_eq!(msg.to_string(), line);
        assert_eq!(msg.to_line().unwrap(), format!("{line}\r\n"));
    }

    #[test]
    fn trailing_emitted_for_space_empty_or_colon() {
        let m = Message::new("PRIVMSG", vec!["#c".into(), "a b".into()]);
        assert_eq!(m.to_string(), "PRIVMSG #c :a b");

        let m = Message::new("PART", vec!["#c".into(), String::new()]);
        assert_eq!(m.to_string(), "PART #c :");

        let m = Message::new("PRIVMSG", vec!["#c".into(), ":)".into()]);
        assert_eq!(m.to_string(), "PRIVMSG #c ::)");

        let m = Message::new("JOIN", vec!["#c".into()]);
        assert_eq!(m.to_string(), "JOIN #c");
    }

    #[test]
    fn overlong_body_is_rejected() {
        let m = Message::new("PRIVMSG", vec!["#c".into(), "x".repeat(520)]);
        assert!(matches!(
            m.to_line(),
            Err(ProtocolError::MessageTooLong { .. })
        ));
    }

    #[test]
    fn empty_line_is_an_error() {
        assert!(matches!(
            "".parse::<Message>(),
            Err(ProtocolError::EmptyMessage)
        ));
        assert!(matches!(
            "\r\n".parse::<Message>(),
            Err(ProtocolError::EmptyMessage)
        ));
    }
}
