//! Live API protocol: wire messages, the transport seam and its WebSocket
//! implementation.

pub mod messages;
pub mod transport;
pub mod websocket;

pub use messages::{Blob, ClientMessage, ServerMessage};
pub use transport::{LiveConnection, LiveSetup, LiveSink, LiveTransport, TransportEvent};
pub use websocket::WebSocketTransport;
