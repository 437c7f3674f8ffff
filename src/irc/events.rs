//! Events surfaced by an IRC client to the bridge.

use std::collections::BTreeSet;

/// One event tagged with the client it came from.
#[derive(Clone, Debug)]
pub struct ClientUpdate {
    /// Bare JID of the component-side user.
    pub owner: String,
    /// IRC server hostname.
    pub server: String,
    /// What happened.
    pub event: ClientEvent,
}

/// Which nickname numeric the server answered with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NickErrorKind {
    /// 432 - erroneous nickname.
    Erroneous,
    /// 433 - nickname already in use (post-welcome).
    Conflict,
    /// 438 - nick change rate-limited.
    ChangeTooFast,
}

/// What happened on the IRC side, in bridge vocabulary.
///
/// Channel names are as the server spelled them; the bridge owns the
/// translation into component identifiers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// Welcome (001) received; the session is usable.
    Welcomed {
        /// Server-assigned nickname.
        nick: String,
    },
    /// Another participant is present or joined.
    UserJoined {
        channel: String,
        nick: String,
        modes: BTreeSet<char>,
    },
    /// End-of-names reached: our own join is complete. Emitted exactly once
    /// per join, before the topic.
    SelfJoined {
        channel: String,
        nick: String,
    },
    /// Topic stored (332 or TOPIC).
    TopicChanged {
        channel: String,
        topic: String,
        /// Set for a live TOPIC change, absent for the join-time 332.
        set_by: Option<String>,
    },
    /// Group message in a channel.
    ChannelMessage {
        channel: String,
        nick: String,
        body: String,
    },
    /// Private message addressed to our nick.
    PrivateMessage {
        nick: String,
        body: String,
    },
    /// A participant left (PART, or QUIT fanned out per channel).
    UserParted {
        channel: String,
        nick: String,
        reason: String,
        /// True when the local user left.
        is_self: bool,
    },
    /// A participant was kicked.
    UserKicked {
        channel: String,
        nick: String,
        by: String,
        reason: String,
        is_self: bool,
    },
    /// A participant changed nick (one event per shared channel).
    NickChanged {
        channel: String,
        old: String,
        new: String,
        modes: BTreeSet<char>,
        is_self: bool,
    },
    /// A participant's membership modes changed.
    UserModeChanged {
        channel: String,
        nick: String,
        modes: BTreeSet<char>,
        set_by: String,
    },
    /// The channel's own modes changed; carries a printable summary.
    ChannelModeChanged {
        channel: String,
        summary: String,
        set_by: String,
    },
    /// Server-level message for the dummy channel (notices, unknown
    /// commands).
    ServerMessage {
        from: String,
        body: String,
    },
    /// Completed MOTD, flushed as one block on 376.
    Motd {
        text: String,
    },
    /// A nickname numeric surfaced by the server.
    NickError {
        kind: NickErrorKind,
        requested: String,
        text: String,
        /// Channels currently joined, for per-room error presence.
        channels: Vec<String>,
    },
    /// The connect cascade and port ladder are both exhausted.
    ConnectionFailed {
        reason: String,
        /// Joins that were pending when the connection died.
        pending_channels: Vec<String>,
    },
    /// An established session ended.
    Disconnected {
        reason: String,
        /// Channels that were joined, for farewell presence.
        channels: Vec<String>,
    },
}
