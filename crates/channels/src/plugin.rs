use {
    anyhow::Result,
    async_trait::async_trait,
    herald_common::{Backend, MediaPayload, MessageKind},
    tokio_util::sync::CancellationToken,
};

use crate::{events::EventSender, state::ConnectionHandle};

/// Core channel plugin trait. Each messaging backend implements this.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    fn backend(&self) -> Backend;

    /// Human-readable channel name.
    fn name(&self) -> &str {
        self.backend().name()
    }

    /// Live connection state owned by the adapter.
    fn connection(&self) -> &ConnectionHandle;

    fn is_connected(&self) -> bool {
        self.connection().is_connected()
    }

    /// Outbound adapter for sending messages.
    fn outbound(&self) -> &dyn ChannelOutbound;

    /// Live membership listing, when the backend can enumerate its chats.
    fn membership(&self) -> Option<&dyn ChannelMembership>;

    /// Status adapter for health checks.
    fn status(&self) -> &dyn ChannelStatus;

    /// Spawn the adapter's background tasks. Events are delivered on
    /// `events` until `shutdown` is cancelled.
    async fn start(&self, events: EventSender, shutdown: CancellationToken) -> Result<()>;

    /// Drop the stored session so the next start re-authenticates.
    async fn reset_session(&self) -> Result<()>;
}

/// Send messages to a channel.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;

    /// Send `media` as `kind`, with an optional caption (empty for none).
    async fn send_media(
        &self,
        to: &str,
        kind: MessageKind,
        media: &MediaPayload,
        caption: &str,
    ) -> Result<()>;
}

/// A chat the bot currently belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEntry {
    pub id: String,
    pub title: Option<String>,
}

/// Enumerate the chats the bot belongs to right now.
#[async_trait]
pub trait ChannelMembership: Send + Sync {
    async fn fetch_memberships(&self) -> Result<Vec<MembershipEntry>>;
}

/// Probe channel account health.
#[async_trait]
pub trait ChannelStatus: Send + Sync {
    async fn probe(&self) -> Result<ChannelHealthSnapshot>;
}

/// Channel health snapshot.
#[derive(Debug, Clone)]
pub struct ChannelHealthSnapshot {
    pub connected: bool,
    pub account_id: Option<String>,
    pub details: Option<String>,
}
