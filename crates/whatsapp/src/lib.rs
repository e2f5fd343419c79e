//! WhatsApp channel.
//!
//! The WhatsApp Web protocol lives in a session-bridge sidecar; this crate
//! drives it over HTTP. A long-poll loop mirrors the bridge session into the
//! channel's [`ConnectionHandle`](herald_channels::ConnectionHandle), renders
//! pairing QR codes, and turns group and message events into channel events.

pub mod bridge;
pub mod channel;
pub mod inbound;
pub mod outbound;
pub mod qr;

pub use {
    bridge::{BridgeClient, BridgeError},
    channel::WhatsAppChannel,
    outbound::WhatsAppOutbound,
};
