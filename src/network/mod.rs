//! Message transport: typed messages, send/resolve, and inbound dispatch.

pub mod loopback;
pub mod protocol;
pub mod router;
pub mod transport;

pub use loopback::LoopbackTransport;
pub use protocol::{Message, MessageArg};
pub use router::{Listener, MessageHandler, Router};
pub use transport::{parse_destination_url, Destination, MessageTransport, UdpTransport};
