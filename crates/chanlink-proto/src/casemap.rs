//! Nickname and channel-name case folding.
//!
//! The gateway folds with plain ASCII lowercase; server-specific mappings
//! (rfc1459 bracket equivalences) are intentionally not applied.

/// Fold a nickname or channel name for map keys and comparisons.
pub fn fold(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// Case-insensitive equality under the gateway's folding.
pub fn eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_is_ascii_only() {
        assert_eq!(fold("NickName"), "nickname");
        // rfc1459 equivalences are deliberately not applied
        assert_eq!(fold("[away]"), "[away]");
    }

    #[test]
    fn eq_ignores_ascii_case() {
        assert!(eq("#Chan", "#chan"));
        assert!(!eq("#chan[", "#chan{"));
    }
}
