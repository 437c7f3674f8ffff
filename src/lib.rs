//! chanlinkd - gateway daemon bridging an XMPP component with IRC servers.
//!
//! The daemon appears as one component on the XMPP side and as many
//! independent clients on the IRC side, one per (user, server) pair. The
//! [`bridge`] owns that mapping; [`irc`] implements the per-server client
//! state machine on top of the [`net`] socket engine; [`component`] holds the
//! stanza boundary toward the XMPP server.

pub mod bridge;
pub mod component;
pub mod config;
pub mod irc;
pub mod net;
