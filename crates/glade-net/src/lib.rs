//! TCP transport: length-prefixed framing, a versioned postcard envelope,
//! and a server that hands inbound frames to the application while exposing
//! send-to-one / broadcast-to-all primitives.

pub mod envelope;
pub mod framing;
pub mod tcp_server;

pub use envelope::{EnvelopeError, PROTOCOL_VERSION, decode, encode};
pub use framing::{FrameLimits, FrameError, read_frame, read_message, write_frame, write_message};
pub use tcp_server::{
    ConnectionId, ConnectionLimitReached, ConnectionMap, IdGenerator, TransportConfig,
    TransportEvent, TransportServer,
};
