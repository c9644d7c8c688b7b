//! Wire types for the upstream real-time speech protocol.
//!
//! Every message on the socket is a JSON object discriminated by its `type`
//! field. Outbound messages are modelled by [`ClientEvent`], inbound ones by
//! [`ServerEvent`]. Both are closed enums so that handling a new event kind is
//! a compile-time decision rather than a string comparison.

pub mod client;
pub mod server;

pub use client::{
    AudioTranscription, ClientEvent, ContentPart, Item, ItemRole, ResponseConfig, SessionConfig,
    ToolDefinition, TurnDetection,
};
pub use server::{
    ErrorDetail, OutputItem, RateLimit, ResponseObject, ServerEvent,
};

/// Sample rate, in Hz, of PCM16 audio exchanged with the upstream endpoint.
pub const UPSTREAM_PCM16_SAMPLE_RATE: u32 = 24_000;
