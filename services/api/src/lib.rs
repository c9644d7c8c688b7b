//! Voice Proxy API Library Crate
//!
//! Application state, configuration, tool execution, the WebSocket bridge
//! and routing. The `api` binary is a thin wrapper around this library.

pub mod audio_utils;
pub mod cleanup;
pub mod config;
pub mod router;
pub mod state;
pub mod tools;
pub mod ws;
