//! Component-protocol boundary.
//!
//! Everything XML lives here: the typed stanza model the bridge works with,
//! and the component stream that authenticates against the XMPP server and
//! exchanges stanzas. The bridge itself never sees markup.

pub mod jid;
pub mod stanza;
pub mod stream;

pub use self::jid::Jid;
pub use self::stanza::{MucUser, Stanza, StanzaError, StanzaKind};
pub use self::stream::{ComponentError, ComponentStream};
