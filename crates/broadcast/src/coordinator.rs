use std::{sync::Arc, time::Instant};

use {
    herald_channels::Backends,
    herald_common::{Backend, BatchConfig, BroadcastSummary, DispatchResult, MediaPayload},
    herald_media::MediaSource,
    herald_membership::MembershipRegistry,
    tracing::{info, warn},
};

use crate::dispatcher::{BatchDispatcher, RetryPolicy};

/// Default text for a broadcast with neither message nor media.
pub const DEFAULT_PLACEHOLDER: &str = "📣 New message!";

/// What one broadcast sends to every recipient.
#[derive(Debug, Clone, Default)]
pub struct BroadcastRequest {
    pub message: Option<String>,
    pub image_url: Option<String>,
    /// Media already in hand (e.g. an attachment); wins over `image_url`.
    pub media: Option<MediaPayload>,
}

impl BroadcastRequest {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Nothing to send at all.
    pub fn is_empty(&self) -> bool {
        self.message().is_none() && self.image_url().is_none() && self.media.is_none()
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.trim().is_empty())
    }

    fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Resolves media once and fans a broadcast out to both backends.
pub struct BroadcastCoordinator {
    backends: Backends,
    registry: Arc<MembershipRegistry>,
    media: Arc<dyn MediaSource>,
    dispatcher: BatchDispatcher,
    whatsapp_batch: BatchConfig,
    telegram_batch: BatchConfig,
    placeholder: String,
}

impl BroadcastCoordinator {
    pub fn new(
        backends: Backends,
        registry: Arc<MembershipRegistry>,
        media: Arc<dyn MediaSource>,
    ) -> Self {
        Self {
            backends,
            registry,
            media,
            dispatcher: BatchDispatcher::default(),
            whatsapp_batch: BatchConfig::whatsapp_default(),
            telegram_batch: BatchConfig::telegram_default(),
            placeholder: DEFAULT_PLACEHOLDER.into(),
        }
    }

    #[must_use]
    pub fn with_batch(mut self, backend: Backend, config: BatchConfig) -> Self {
        match backend {
            Backend::WhatsApp => self.whatsapp_batch = config,
            Backend::Telegram => self.telegram_batch = config,
        }
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.dispatcher = BatchDispatcher::new(retry);
        self
    }

    #[must_use]
    pub fn with_placeholder(mut self, text: impl Into<String>) -> Self {
        self.placeholder = text.into();
        self
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn registry(&self) -> &Arc<MembershipRegistry> {
        &self.registry
    }

    fn batch_for(&self, backend: Backend) -> BatchConfig {
        match backend {
            Backend::WhatsApp => self.whatsapp_batch,
            Backend::Telegram => self.telegram_batch,
        }
    }

    /// Send one message to every registered recipient on both backends.
    ///
    /// Never fails: send failures, an unreadable registry and a media
    /// download failure are reported in the summary instead.
    pub async fn broadcast_to_all(&self, request: BroadcastRequest) -> BroadcastSummary {
        let started = Instant::now();
        let message = request.message();

        let mut media_error = None;
        let media = match (request.media.clone(), request.image_url()) {
            (Some(media), _) => Some(media),
            (None, Some(url)) => match self.media.fetch(url).await {
                Ok(media) => Some(media),
                Err(e) => {
                    warn!(url, error = %e, "media unavailable, sending text only");
                    media_error = Some(e.to_string());
                    None
                },
            },
            (None, None) => None,
        };

        info!(
            media = media.as_ref().map(|m| m.mime_type.as_str()),
            "broadcast started"
        );

        let (whatsapp, telegram) = futures::join!(
            self.fan_out(Backend::WhatsApp, message, media.as_ref()),
            self.fan_out(Backend::Telegram, message, media.as_ref()),
        );

        let summary = BroadcastSummary::new(whatsapp, telegram, started.elapsed(), media_error);
        info!(summary = %summary.summary, "broadcast finished");
        summary
    }

    async fn fan_out(
        &self,
        backend: Backend,
        message: Option<&str>,
        media: Option<&MediaPayload>,
    ) -> DispatchResult {
        let ids = match self.registry.members(backend).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(%backend, error = %e, "registry unreadable, skipping backend");
                return DispatchResult::skipped(format!("registry unreadable: {e}"));
            },
        };
        if ids.is_empty() {
            return DispatchResult::default();
        }
        let Some(plugin) = self.backends.connected(backend) else {
            warn!(%backend, recipients = ids.len(), "backend not connected, skipping");
            return DispatchResult::skipped("backend not connected");
        };
        info!(%backend, recipients = ids.len(), "fanning out");

        let outbound = plugin.outbound();
        let caption = message.unwrap_or_default();
        let text = message.unwrap_or(self.placeholder.as_str());

        self.dispatcher
            .dispatch(backend.id(), &ids, self.batch_for(backend), |id| async move {
                match media {
                    Some(media) => outbound.send_media(&id, media.kind(), media, caption).await,
                    None => outbound.send_text(&id, text).await,
                }
            })
            .await
    }
}
