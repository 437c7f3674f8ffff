//! Non-blocking socket engine: endpoints, DNS resolution, named timers,
//! TLS trust, and the buffered TCP/TLS connection handler.

pub mod endpoint;
pub mod resolver;
pub mod socket;
pub mod timer;
pub mod tls;

pub use self::endpoint::Endpoint;
pub use self::resolver::Resolver;
pub use self::socket::{ConnectError, ConnectionState, SocketEvent, SocketHandler};
pub use self::timer::TimerQueue;
