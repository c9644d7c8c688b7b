//! WebSocket Voice Sessions
//!
//! - `protocol`: Defines the message format for client-server communication.
//! - `session`: Bridges a client socket to a voice session, from handshake to termination.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
