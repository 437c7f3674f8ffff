//! Channel membership state.

use std::collections::{BTreeSet, HashMap};

use chanlink_proto::casemap;

/// Where the local user stands in the join lifecycle of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipPhase {
    /// JOIN sent or echoed; nothing surfaced yet.
    Joining,
    /// Names list (353) is accumulating.
    NamesPending,
    /// Topic received while names are still pending.
    TopicPending,
    /// End-of-names (366) seen; the channel is usable.
    Joined,
    /// PART sent, awaiting the echo.
    Parting,
}

/// One remote participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelUser {
    /// Nickname as the server spelled it.
    pub nick: String,
    /// Membership mode characters (`o`, `v`, ...).
    pub modes: BTreeSet<char>,
}

/// One channel on one server, plus the per-client dummy channel that
/// carries server-level messages.
#[derive(Clone, Debug)]
pub struct Channel {
    /// Server-side channel name; empty for the dummy channel.
    pub name: String,
    /// Join lifecycle phase.
    pub phase: MembershipPhase,
    /// Current topic.
    pub topic: String,
    /// Channel-level mode characters.
    pub modes: BTreeSet<char>,
    users: HashMap<String, ChannelUser>,
}

impl Channel {
    /// New channel in the `Joining` phase.
    pub fn new(name: impl Into<String>) -> Self {
        Channel {
            name: name.into(),
            phase: MembershipPhase::Joining,
            topic: String::new(),
            modes: BTreeSet::new(),
            users: HashMap::new(),
        }
    }

    /// The per-client dummy channel; always `Joined`.
    pub fn dummy() -> Self {
        let mut chan = Channel::new("");
        chan.phase = MembershipPhase::Joined;
        chan
    }

    /// True once 366 has been processed.
    pub fn is_joined(&self) -> bool {
        self.phase == MembershipPhase::Joined
    }

    /// Insert or update a user; returns a reference to the entry.
    pub fn add_user(&mut self, nick: &str, modes: BTreeSet<char>) -> &ChannelUser {
        self.users
            .entry(casemap::fold(nick))
            .and_modify(|u| {
                u.nick = nick.to_owned();
                u.modes.extend(modes.iter().copied());
            })
            .or_insert_with(|| ChannelUser {
                nick: nick.to_owned(),
                modes,
            })
    }

    /// Remove a user by nick.
    pub fn remove_user(&mut self, nick: &str) -> Option<ChannelUser> {
        self.users.remove(&casemap::fold(nick))
    }

    /// Look up a user by nick.
    pub fn find_user(&self, nick: &str) -> Option<&ChannelUser> {
        self.users.get(&casemap::fold(nick))
    }

    /// Mutable lookup by nick.
    pub fn find_user_mut(&mut self, nick: &str) -> Option<&mut ChannelUser> {
        self.users.get_mut(&casemap::fold(nick))
    }

    /// Re-key a user after a nick change; returns false if absent.
    pub fn rename_user(&mut self, old: &str, new: &str) -> bool {
        match self.users.remove(&casemap::fold(old)) {
            Some(mut user) => {
                user.nick = new.to_owned();
                self.users.insert(casemap::fold(new), user);
                true
            }
            None => false,
        }
    }

    /// All users, in no particular order.
    pub fn users(&self) -> impl Iterator<Item = &ChannelUser> {
        self.users.values()
    }

    /// Number of known users.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn users_are_keyed_case_insensitively() {
        let mut chan = Channel::new("#test");
        chan.add_user("Alice", BTreeSet::new());
        assert!(chan.find_user("alice").is_some());
        assert!(chan.find_user("ALICE").is_some());
        assert_eq!(chan.user_count(), 1);

        let removed = chan.remove_user("aLiCe").unwrap();
        assert_eq!(removed.nick, "Alice");
        assert_eq!(chan.user_count(), 0);
    }

    #[test]
    fn rename_rekeys_the_entry() {
        let mut chan = Channel::new("#test");
        chan.add_user("old", [('o')].into_iter().collect());
        assert!(chan.rename_user("OLD", "new"));
        assert!(chan.find_user("old").is_none());
        let user = chan.find_user("new").unwrap();
        assert_eq!(user.nick, "new");
        assert!(user.modes.contains(&'o'));
        assert!(!chan.rename_user("ghost", "x"));
    }

    #[test]
    fn re_adding_merges_modes_and_respelling() {
        let mut chan = Channel::new("#test");
        chan.add_user("nick", [('v')].into_iter().collect());
        chan.add_user("Nick", [('o')].into_iter().collect());
        let user = chan.find_user("nick").unwrap();
        assert_eq!(user.nick, "Nick");
        assert!(user.modes.contains(&'o') && user.modes.contains(&'v'));
    }

    #[test]
    fn dummy_channel_is_always_joined() {
        assert!(Channel::dummy().is_joined());
    }
}
