use {
    herald_common::{Backend, MediaPayload},
    tokio::sync::mpsc,
};

use crate::state::Directive;

/// Sender half handed to every channel adapter.
pub type EventSender = mpsc::Sender<ChannelEvent>;

/// Receiver half consumed by the core event loop.
pub type EventReceiver = mpsc::Receiver<ChannelEvent>;

/// Create the single event queue shared by all adapters. Order is preserved
/// per sender, so each backend's events arrive in the order it emitted them.
pub fn event_channel(buffer: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(buffer.max(1))
}

/// Everything a backend reports to the core.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connection {
        backend: Backend,
        update: ConnectionUpdate,
        directive: Directive,
    },
    Membership {
        backend: Backend,
        change: MembershipChange,
    },
    Inbound(InboundMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    /// Waiting for the external handshake; `qr` carries a pairing code when
    /// the backend issued one.
    Pending { qr: Option<String> },
    Connected { account: Option<String> },
    Disconnected {
        logged_out: bool,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    /// The bot was added to a group or channel.
    Joined { id: String, title: Option<String> },
    /// The bot left or was kicked.
    Left { id: String },
    /// A message arrived from a chat; registers it if unknown.
    Seen { id: String, title: Option<String> },
}

/// A message delivered to the bot.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub backend: Backend,
    /// Where replies go.
    pub chat_id: String,
    /// Normalized sender identity checked against the admin list.
    pub sender_id: String,
    /// Direct (one-to-one) conversation rather than a group.
    pub is_direct: bool,
    /// Sent by the bot's own account.
    pub from_self: bool,
    pub text: Option<String>,
    pub media: Option<MediaPayload>,
}

impl InboundMessage {
    /// Text body or media caption, empty when absent.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}
