//! The internal identifier locating a channel or server on the IRC side.
//!
//! Wire form is the component-protocol node `[local]%domain`: the optional
//! local part keeps its channel marker (`#chan%irc.example.net`), and a bare
//! domain addresses the server itself.

use std::fmt;

/// A parsed component node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Iid {
    /// Channel name with its marker, or `None` for a server-level target.
    pub local: Option<String>,
    /// IRC server hostname.
    pub server: String,
}

impl Iid {
    /// Parse `[local]%domain`; a node without `%` is a bare server target.
    pub fn parse(node: &str) -> Self {
        match node.split_once('%') {
            Some((local, server)) => Iid {
                local: (!local.is_empty()).then(|| local.to_owned()),
                server: server.to_owned(),
            },
            None => Iid {
                local: None,
                server: node.to_owned(),
            },
        }
    }

    /// True when this addresses a channel rather than the server.
    pub fn is_channel(&self) -> bool {
        self.local.is_some()
    }
}

impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.local {
            Some(local) => write!(f, "{}%{}", local, self.server),
            None => write!(f, "{}", self.server),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_iid_keeps_marker() {
        let iid = Iid::parse("#chan%irc.example.net");
        assert_eq!(iid.local.as_deref(), Some("#chan"));
        assert_eq!(iid.server, "irc.example.net");
        assert!(iid.is_channel());
        assert_eq!(iid.to_string(), "#chan%irc.example.net");
    }

    #[test]
    fn bare_domain_is_server_level() {
        let iid = Iid::parse("irc.example.net");
        assert_eq!(iid.local, None);
        assert!(!iid.is_channel());
        assert_eq!(iid.to_string(), "irc.example.net");
    }

    #[test]
    fn empty_local_part_is_server_level() {
        let iid = Iid::parse("%irc.example.net");
        assert_eq!(iid.local, None);
        assert_eq!(iid.server, "irc.example.net");
    }

    #[test]
    fn private_target_is_a_nick_local() {
        let iid = Iid::parse("alice%irc.example.net");
        assert_eq!(iid.local.as_deref(), Some("alice"));
    }
}
