use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    herald_channels::ChannelOutbound,
    herald_common::{MediaPayload, MessageKind},
    tracing::debug,
};

use crate::bridge::{BridgeClient, OutgoingMessage};

/// Sends through the session bridge.
pub struct WhatsAppOutbound {
    pub(crate) client: Arc<BridgeClient>,
}

#[async_trait]
impl ChannelOutbound for WhatsAppOutbound {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        self.client
            .send_message(&OutgoingMessage::text(to, text))
            .await?;
        debug!(to, "whatsapp text sent");
        Ok(())
    }

    async fn send_media(
        &self,
        to: &str,
        kind: MessageKind,
        media: &MediaPayload,
        caption: &str,
    ) -> Result<()> {
        self.client
            .send_message(&OutgoingMessage::media(to, kind, media, caption))
            .await?;
        debug!(to, ?kind, bytes = media.len(), "whatsapp media sent");
        Ok(())
    }
}
