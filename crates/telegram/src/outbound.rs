use {
    anyhow::Result,
    async_trait::async_trait,
    herald_channels::ChannelOutbound,
    herald_common::{MediaPayload, MessageKind},
    teloxide::{
        payloads::{SendDocumentSetters, SendPhotoSetters, SendVideoSetters},
        prelude::*,
        types::{InputFile, Recipient},
    },
    tracing::debug,
};

/// Numeric ids address chats directly; anything else is taken as a public
/// `@channel` username.
pub(crate) fn recipient(to: &str) -> Recipient {
    match to.trim().parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => {
            let name = to.trim();
            if name.starts_with('@') {
                Recipient::ChannelUsername(name.to_string())
            } else {
                Recipient::ChannelUsername(format!("@{name}"))
            }
        },
    }
}

fn file_name(media: &MediaPayload) -> String {
    let ext = media
        .mime_type
        .split('/')
        .nth(1)
        .and_then(|sub| sub.split(['+', ';']).next())
        .filter(|sub| !sub.is_empty())
        .unwrap_or("bin");
    format!("file.{ext}")
}

/// Sends through the Bot API.
pub struct TelegramOutbound {
    pub(crate) bot: Bot,
}

#[async_trait]
impl ChannelOutbound for TelegramOutbound {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        self.bot.send_message(recipient(to), text).await?;
        debug!(to, "telegram text sent");
        Ok(())
    }

    async fn send_media(
        &self,
        to: &str,
        kind: MessageKind,
        media: &MediaPayload,
        caption: &str,
    ) -> Result<()> {
        let chat = recipient(to);
        let file = InputFile::memory(media.bytes.to_vec()).file_name(file_name(media));

        match kind {
            MessageKind::Image => {
                let mut req = self.bot.send_photo(chat, file);
                if !caption.is_empty() {
                    req = req.caption(caption);
                }
                req.await?;
            },
            MessageKind::Video => {
                let mut req = self.bot.send_video(chat, file);
                if !caption.is_empty() {
                    req = req.caption(caption);
                }
                req.await?;
            },
            MessageKind::Document | MessageKind::Text => {
                let mut req = self.bot.send_document(chat, file);
                if !caption.is_empty() {
                    req = req.caption(caption);
                }
                req.await?;
            },
        }
        debug!(to, ?kind, bytes = media.len(), "telegram media sent");
        Ok(())
    }
}
