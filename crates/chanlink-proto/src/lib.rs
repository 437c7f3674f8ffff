//! # chanlink-proto
//!
//! Wire-level model of the IRC client protocol as used by the chanlink
//! gateway: CRLF line framing, message parsing and serialization, ISUPPORT
//! (005) token parsing, and channel mode-string interpretation.
//!
//! The types here are deliberately transport-agnostic; the daemon drives
//! them from its own socket engine.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
pub mod error;
pub mod framing;
pub mod isupport;
pub mod message;
pub mod mode;

pub use self::error::ProtocolError;
pub use self::isupport::{ChanModes, ModeClass, PrefixSpec, ServerCaps};
pub use self::message::Message;
pub use self::mode::ModeChange;
