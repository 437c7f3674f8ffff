//! ISUPPORT (005) parsing and the per-server capability state.
//!
//! Servers advertise tokens of the form `KEY` or `KEY=VALUE`. The gateway
//! cares about three of them:
//!
//! - `CHANMODES=A,B,C,D`: the four channel-mode classes
//! - `CHANTYPES=#&`: the channel-marker characters
//! - `PREFIX=(ov)@+`: membership modes paired with their prefix symbols
//!
//! Everything else is ignored.

use std::collections::BTreeSet;

/// Parsed `CHANMODES` buckets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChanModes {
    /// Type A: list modes (always take an argument).
    pub a: String,
    /// Type B: modes with an argument for both set and unset.
    pub b: String,
    /// Type C: modes with an argument only when set.
    pub c: String,
    /// Type D: modes that never take an argument.
    pub d: String,
}

impl ChanModes {
    /// Parse a `CHANMODES` value like `b,k,l,imnpst`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(4, ',');
        let (a, b, c, d) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        Some(ChanModes {
            a: a.to_owned(),
            b: b.to_owned(),
            c: c.to_owned(),
            d: d.to_owned(),
        })
    }
}

impl Default for ChanModes {
    fn default() -> Self {
        ChanModes::parse("b,k,l,imnpst").unwrap()
    }
}

/// Parsed `PREFIX` token: membership modes paired with prefix symbols.
///
/// The mode string also gives the privilege priority order, highest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixSpec {
    /// Mode characters (e.g. `ov`).
    pub modes: String,
    /// Prefix symbols (e.g. `@+`), same length as `modes`.
    pub prefixes: String,
}

impl PrefixSpec {
    /// Parse a `PREFIX` value like `(ov)@+`.
    ///
    /// Mismatched lengths make the pairing meaningless, so they are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let open = s.find('(')?;
        let close = s[open + 1..].find(')')? + open + 1;
        let modes = &s[open + 1..close];
        let prefixes = &s[close + 1..];
        if modes.is_empty() || modes.chars().count() != prefixes.chars().count() {
            return None;
        }
        Some(PrefixSpec {
            modes: modes.to_owned(),
            prefixes: prefixes.to_owned(),
        })
    }

    /// True if `mode` grants a membership prefix on this server.
    pub fn is_prefix_mode(&self, mode: char) -> bool {
        self.modes.contains(mode)
    }

    /// The prefix symbol for a membership mode (`'o'` → `'@'`).
    pub fn prefix_for_mode(&self, mode: char) -> Option<char> {
        self.modes
            .chars()
            .position(|c| c == mode)
            .and_then(|i| self.prefixes.chars().nth(i))
    }

    /// The membership mode for a prefix symbol (`'@'` → `'o'`).
    pub fn mode_for_prefix(&self, prefix: char) -> Option<char> {
        self.prefixes
            .chars()
            .position(|c| c == prefix)
            .and_then(|i| self.modes.chars().nth(i))
    }
}

impl Default for PrefixSpec {
    fn default() -> Self {
        PrefixSpec::parse("(ov)@+").unwrap()
    }
}

/// How a channel mode character behaves, per ISUPPORT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeClass {
    /// Membership prefix mode; consumes a nickname argument.
    Prefix,
    /// Type A list mode; always consumes an argument.
    ListA,
    /// Type B; always consumes an argument.
    ArgB,
    /// Type C; consumes an argument only when set.
    ArgWhenSetC,
    /// Type D; never consumes an argument.
    FlagD,
}

/// Accumulated capability state for one server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerCaps {
    /// Channel-mode classes.
    pub chanmodes: ChanModes,
    /// Channel-marker characters from `CHANTYPES`.
    pub chantypes: BTreeSet<char>,
    /// Membership prefix mapping from `PREFIX`.
    pub prefix: PrefixSpec,
}

impl ServerCaps {
    /// Apply one ISUPPORT token (`KEY` or `KEY=VALUE`); unknown keys are
    /// ignored.
    pub fn apply_token(&mut self, token: &str) {
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k, v),
            None => (token, ""),
        };
        match key {
            "CHANMODES" => {
                if let Some(cm) = ChanModes::parse(value) {
                    self.chanmodes = cm;
                }
            }
            "CHANTYPES" => {
                self.chantypes = value.chars().collect();
            }
            "PREFIX" => {
                if let Some(spec) = PrefixSpec::parse(value) {
                    self.prefix = spec;
                }
            }
            _ => {}
        }
    }

    /// True if `name` begins with a channel-marker character.
    pub fn is_channel_name(&self, name: &str) -> bool {
        match name.chars().next() {
            Some(c) if !self.chantypes.is_empty() => self.chantypes.contains(&c),
            Some(c) => c == '#' || c == '&',
            None => false,
        }
    }

    /// Classify a channel mode character.
    pub fn classify(&self, mode: char) -> ModeClass {
        if self.prefix.is_prefix_mode(mode) {
            ModeClass::Prefix
        } else if self.chanmodes.a.contains(mode) {
            ModeClass::ListA
        } else if self.chanmodes.b.contains(mode) {
            ModeClass::ArgB
        } else if self.chanmodes.c.contains(mode) {
            ModeClass::ArgWhenSetC
        } else {
            ModeClass::FlagD
        }
    }

    /// Split a names-list token into its prefix modes and the bare nick.
    ///
    /// `@+nick` yields the modes for `@` and `+` plus `"nick"`.
    pub fn strip_name_prefixes<'a>(&self, token: &'a str) -> (BTreeSet<char>, &'a str) {
        let mut modes = BTreeSet::new();
        let mut rest = token;
        while let Some(c) = rest.chars().next() {
            match self.prefix.mode_for_prefix(c) {
                Some(mode) => {
                    modes.insert(mode);
                    rest = &rest[c.len_utf8()..];
                }
                None => break,
            }
        }
        (modes, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chanmodes_parses_four_buckets() {
        let cm = ChanModes::parse("eIbq,k,flj,CFLPQcgimnprstz").unwrap();
        assert_eq!(cm.a, "eIbq");
        assert_eq!(cm.b, "k");
        assert_eq!(cm.c, "flj");
        assert!(cm.d.contains('n'));
        assert!(ChanModes::parse("a,b,c").is_none());
    }

    #[test]
    fn prefix_spec_maps_both_ways() {
        let spec = PrefixSpec::parse("(qaohv)~&@%+").unwrap();
        assert_eq!(spec.prefix_for_mode('o'), Some('@'));
        assert_eq!(spec.prefix_for_mode('q'), Some('~'));
        assert_eq!(spec.mode_for_prefix('+'), Some('v'));
        assert_eq!(spec.mode_for_prefix('!'), None);
        assert!(spec.is_prefix_mode('h'));
        assert!(!spec.is_prefix_mode('b'));
    }

    #[test]
    fn prefix_spec_rejects_mismatched_lengths() {
        assert!(PrefixSpec::parse("(ov)@").is_none());
        assert!(PrefixSpec::parse("ov@+").is_none());
    }

    #[test]
    fn caps_apply_tokens_and_ignore_unknown() {
        let mut caps = ServerCaps::default();
        caps.apply_token("CHANTYPES=#&!");
        caps.apply_token("PREFIX=(ohv)@%+");
        caps.apply_token("CHANMODES=b,k,l,imnt");
        caps.apply_token("NETWORK=TestNet");
        caps.apply_token("EXCEPTS");

        assert!(caps.is_channel_name("!chan"));
        assert!(!caps.is_channel_name("nick"));
        assert_eq!(caps.classify('h'), ModeClass::Prefix);
        assert_eq!(caps.classify('b'), ModeClass::ListA);
        assert_eq!(caps.classify('k'), ModeClass::ArgB);
        assert_eq!(caps.classify('l'), ModeClass::ArgWhenSetC);
        assert_eq!(caps.classify('t'), ModeClass::FlagD);
    }

    #[test]
    fn names_token_prefix_stripping() {
        let caps = ServerCaps::default();
        let (modes, nick) = caps.strip_name_prefixes("@+alice");
        assert_eq!(nick, "alice");
        assert!(modes.contains(&'o'));
        assert!(modes.contains(&'v'));

        let (modes, nick) = caps.strip_name_prefixes("bob");
        assert!(modes.is_empty());
        assert_eq!(nick, "bob");
    }
}
