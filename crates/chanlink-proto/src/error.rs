//! Protocol error types.

use thiserror::Error;

/// Errors produced while framing or parsing IRC lines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A line exceeded the wire limit (512 bytes including CRLF).
    #[error("message too long: {actual} bytes (limit {limit})")]
    MessageTooLong {
        /// Observed line length in bytes.
        actual: usize,
        /// The enforced limit.
        limit: usize,
    },

    /// The line was empty after stripping the terminator.
    #[error("empty message")]
    EmptyMessage,

    /// A message had no command token.
    #[error("missing command")]
    MissingCommand,

    /// A non-trailing argument contained a space or was empty.
    #[error("invalid argument: {0:?}")]
    InvalidArgument(String),
}
