//! IRC client side: per-server connection state machine, channel
//! book-keeping, and the command dispatch that feeds the bridge.

pub mod channel;
pub mod client;
pub mod events;

pub use self::channel::{Channel, ChannelUser, MembershipPhase};
pub use self::client::{ClientCommand, IrcClient, IrcSettings};
pub use self::events::{ClientEvent, ClientUpdate, NickErrorKind};
