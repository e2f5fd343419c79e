use std::{
    fmt,
    str::FromStr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    bytes::Bytes,
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

// ── Backends ─────────────────────────────────────────────────────────────────

/// One of the two messaging platforms herald fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    WhatsApp,
    Telegram,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::WhatsApp, Backend::Telegram];

    /// Stable lowercase identifier, used in config keys and logs.
    pub fn id(self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Telegram => "telegram",
        }
    }

    /// Human-readable platform name.
    pub fn name(self) -> &'static str {
        match self {
            Self::WhatsApp => "WhatsApp",
            Self::Telegram => "Telegram",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown backend '{0}' (expected 'whatsapp' or 'telegram')")]
pub struct ParseBackendError(String);

impl FromStr for Backend {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whatsapp" | "wpp" | "wa" => Ok(Self::WhatsApp),
            "telegram" | "tg" => Ok(Self::Telegram),
            other => Err(ParseBackendError(other.to_string())),
        }
    }
}

// ── Media ────────────────────────────────────────────────────────────────────

/// A resolved media item. The buffer is reference-counted so a single
/// download is shared by every send of a broadcast, and so is its base64
/// form once some backend asks for it.
#[derive(Clone)]
pub struct MediaPayload {
    pub bytes: Bytes,
    pub mime_type: String,
    base64: Arc<OnceLock<Arc<str>>>,
}

impl MediaPayload {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            base64: Arc::default(),
        }
    }

    /// Standard base64 of the bytes, encoded on first use and shared by
    /// every clone of this payload.
    pub fn base64(&self) -> Arc<str> {
        Arc::clone(
            self.base64
                .get_or_init(|| STANDARD.encode(&self.bytes).into()),
        )
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Message kind this payload should be sent as.
    pub fn kind(&self) -> MessageKind {
        MessageKind::for_mime(Some(&self.mime_type))
    }

    /// Size in mebibytes, for log lines.
    pub fn size_mib(&self) -> f64 {
        self.bytes.len() as f64 / (1024.0 * 1024.0)
    }
}

impl PartialEq for MediaPayload {
    fn eq(&self, other: &Self) -> bool {
        self.mime_type == other.mime_type && self.bytes == other.bytes
    }
}

impl Eq for MediaPayload {}

impl fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Outbound message shape, selected from the media MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Document,
}

impl MessageKind {
    /// `video/*` is sent as video, `image/*` as image, any other MIME type as
    /// a generic document. No media at all is plain text.
    pub fn for_mime(mime: Option<&str>) -> Self {
        let Some(mime) = mime else {
            return Self::Text;
        };
        let mime = mime.to_ascii_lowercase();
        if mime.contains("video") {
            Self::Video
        } else if mime.contains("image") {
            Self::Image
        } else {
            Self::Document
        }
    }
}

// ── Batching ─────────────────────────────────────────────────────────────────

/// Per-backend fan-out pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_retries: u32,
}

impl BatchConfig {
    /// Build a config, clamping size and retries to at least one.
    pub fn new(batch_size: usize, batch_delay: Duration, max_retries: u32) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batch_delay,
            max_retries: max_retries.max(1),
        }
    }

    pub fn whatsapp_default() -> Self {
        Self::new(4, Duration::from_millis(2500), 2)
    }

    pub fn telegram_default() -> Self {
        Self::new(5, Duration::from_millis(1500), 2)
    }

    pub fn default_for(backend: Backend) -> Self {
        match backend {
            Backend::WhatsApp => Self::whatsapp_default(),
            Backend::Telegram => Self::telegram_default(),
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// A recipient whose send exhausted all retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of one fan-out run. `success + failed` always equals the number
/// of submitted items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    #[serde(rename = "success")]
    pub success_count: usize,
    #[serde(rename = "failed")]
    pub failed_count: usize,
    pub errors: Vec<DispatchFailure>,
    /// Why the backend was not attempted at all (disconnected, unreadable
    /// registry). Counts stay at zero in that case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl DispatchResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn total(&self) -> usize {
        self.success_count + self.failed_count
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self, id: impl Into<String>, error: impl Into<String>) {
        self.failed_count += 1;
        self.errors.push(DispatchFailure {
            id: id.into(),
            error: error.into(),
        });
    }
}

/// Aggregated result of a broadcast across both backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastSummary {
    pub whatsapp: DispatchResult,
    pub telegram: DispatchResult,
    /// Wall-clock duration, e.g. `"3.2s"`.
    pub elapsed: String,
    /// One-line human summary, suitable for a chat reply.
    pub summary: String,
    /// Set when the requested media URL could not be fetched and the
    /// broadcast degraded to text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_error: Option<String>,
}

impl BroadcastSummary {
    pub fn new(
        whatsapp: DispatchResult,
        telegram: DispatchResult,
        elapsed: Duration,
        media_error: Option<String>,
    ) -> Self {
        let elapsed = format!("{:.1}s", elapsed.as_secs_f64());
        let summary = format!(
            "📊 Broadcast finished in {elapsed}: WPP({}✅/{}❌) TG({}✅/{}❌)",
            whatsapp.success_count,
            whatsapp.failed_count,
            telegram.success_count,
            telegram.failed_count,
        );
        Self {
            whatsapp,
            telegram,
            elapsed,
            summary,
            media_error,
        }
    }

    pub fn for_backend(&self, backend: Backend) -> &DispatchResult {
        match backend {
            Backend::WhatsApp => &self.whatsapp,
            Backend::Telegram => &self.telegram,
        }
    }
}

/// Counts reported by an additive membership resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub found: usize,
    pub added: usize,
    pub total: usize,
}
