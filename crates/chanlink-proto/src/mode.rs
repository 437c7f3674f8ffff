//! Channel mode-string interpretation.

use crate::isupport::{ModeClass, ServerCaps};

/// One add/remove operation parsed from a MODE command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeChange {
    /// `true` for `+`, `false` for `-`.
    pub add: bool,
    /// The mode character.
    pub mode: char,
    /// The consumed argument, when the mode class takes one.
    pub arg: Option<String>,
    /// How the server classifies this mode.
    pub class: ModeClass,
}

/// Parse a mode string plus its arguments into per-character operations.
///
/// Argument consumption follows the server's ISUPPORT classification:
/// membership prefixes and class A/B modes always consume one, class C only
/// when adding, class D never. Mode characters beyond the argument supply
/// are kept with `arg: None`.
pub fn parse_mode_changes(caps: &ServerCaps, modestr: &str, args: &[String]) -> Vec<ModeChange> {
    let mut changes = Vec::new();
    let mut add = true;
    let mut next_arg = 0usize;

    for c in modestr.chars() {
        match c {
            '+' => add = true,
            '-' => add = false,
            mode => {
                let class = caps.classify(mode);
                let wants_arg = match class {
                    ModeClass::Prefix | ModeClass::ListA | ModeClass::ArgB => true,
                    ModeClass::ArgWhenSetC => add,
                    ModeClass::FlagD => false,
                };
                let arg = if wants_arg {
                    let a = args.get(next_arg).cloned();
                    if a.is_some() {
                        next_arg += 1;
                    }
                    a
                } else {
                    None
                };
                changes.push(ModeChange {
                    add,
                    mode,
                    arg,
                    class,
                });
            }
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> ServerCaps {
        let mut caps = ServerCaps::default();
        caps.apply_token("PREFIX=(ov)@+");
        caps.apply_token("CHANMODES=b,k,l,imnpst");
        caps
    }

    #[test]
    fn prefix_modes_consume_nicks() {
        let changes = parse_mode_changes(&caps(), "+ov", &["alice".into(), "bob".into()]);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].mode, 'o');
        assert_eq!(changes[0].arg.as_deref(), Some("alice"));
        assert_eq!(changes[1].mode, 'v');
        assert_eq!(changes[1].arg.as_deref(), Some("bob"));
    }

    #[test]
    fn class_c_consumes_only_when_adding() {
        let changes = parse_mode_changes(&caps(), "+l-l", &["50".into()]);
        assert_eq!(changes[0].arg.as_deref(), Some("50"));
        assert!(changes[0].add);
        assert_eq!(changes[1].arg, None);
        assert!(!changes[1].add);
    }

    #[test]
    fn mixed_signs_and_flags() {
        let changes = parse_mode_changes(&caps(), "+nt-i+k", &["sekrit".into()]);
        assert_eq!(changes.len(), 4);
        assert!(changes[0].add && changes[0].arg.is_none());
        assert!(!changes[2].add);
        assert_eq!(changes[2].mode, 'i');
        assert_eq!(changes[3].arg.as_deref(), Some("sekrit"));
    }

    #[test]
    fn missing_arguments_are_tolerated() {
        let changes = parse_mode_changes(&caps(), "+oo", &["alice".into()]);
        assert_eq!(changes[0].arg.as_deref(), Some("alice"));
        assert_eq!(changes[1].arg, None);
    }
}
