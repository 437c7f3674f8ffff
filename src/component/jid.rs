//! Minimal JID splitting.

/// A JID split into node, domain, and resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Jid {
    /// Part before `@`, if any.
    pub local: String,
    /// The domain.
    pub domain: String,
    /// Part after `/`, if any.
    pub resource: String,
}

impl Jid {
    /// Split a JID string. Never fails; missing parts come back empty.
    pub fn parse(s: &str) -> Self {
        let (bare, resource) = match s.split_once('/') {
            Some((b, r)) => (b, r),
            None => (s, ""),
        };
        let (local, domain) = match bare.split_once('@') {
            Some((l, d)) => (l, d),
            None => ("", bare),
        };
        Jid {
            local: local.to_owned(),
            domain: domain.to_owned(),
            resource: resource.to_owned(),
        }
    }

    /// The JID without its resource.
    pub fn bare(&self) -> String {
        if self.local.is_empty() {
            self.domain.clone()
        } else {
            format!("{}@{}", self.local, self.domain)
        }
    }
}
