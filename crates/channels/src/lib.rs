//! Channel plugin system.
//!
//! Each messaging backend (WhatsApp, Telegram) implements the ChannelPlugin
//! trait with sub-traits for outbound messaging, membership listing and
//! status, owns a [`ConnectionHandle`], and reports everything else as
//! [`ChannelEvent`]s on the shared event queue.

pub mod error;
pub mod events;
pub mod plugin;
pub mod registry;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    error::ChannelError,
    events::{
        ChannelEvent, ConnectionUpdate, EventReceiver, EventSender, InboundMessage,
        MembershipChange, event_channel,
    },
    plugin::{
        ChannelHealthSnapshot, ChannelMembership, ChannelOutbound, ChannelPlugin, ChannelStatus,
        MembershipEntry,
    },
    registry::Backends,
    state::{ConnectionHandle, ConnectionMachine, ConnectionState, Directive, TransitionError},
};
