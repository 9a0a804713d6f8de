// rowsync-api: wire codec and WebSocket transport for row-level change streams

pub mod error;
pub mod filter;
pub mod transport;
pub mod websocket;
pub mod wire;

pub use error::Error;
pub use filter::TransportFilter;
pub use transport::{FrameStream, Transport};
pub use websocket::{RealtimeConfig, WsTransport};
pub use wire::{InboundFrame, RawChange};
