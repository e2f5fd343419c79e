//! Config schema: server, storage paths, per-backend channel settings,
//! broadcast pacing, media limits and control options.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    herald_common::{Backend, BatchConfig},
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub whatsapp: WhatsAppConfig,
    pub telegram: TelegramConfig,
    pub broadcast: BroadcastConfig,
    pub media: MediaConfig,
    pub control: ControlConfig,
}

impl HeraldConfig {
    /// Batch pacing for one backend.
    pub fn batch_for(&self, backend: Backend) -> BatchConfig {
        match backend {
            Backend::WhatsApp => self.whatsapp.batch.to_batch_config(),
            Backend::Telegram => self.telegram.batch.to_batch_config(),
        }
    }

    /// Registry file for one backend, resolved against the data dir.
    pub fn registry_path(&self, backend: Backend) -> PathBuf {
        let file = match backend {
            Backend::WhatsApp => &self.paths.whatsapp_registry,
            Backend::Telegram => &self.paths.telegram_registry,
        };
        self.paths.resolve(file)
    }

    pub fn admins_path(&self) -> PathBuf {
        self.paths.resolve(&self.paths.admins)
    }

    pub fn log_path(&self) -> PathBuf {
        self.paths.resolve(&self.paths.log_file)
    }
}

/// HTTP API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Request body limit for `POST /send-to-all`.
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
            body_limit_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Where persisted state lives. Relative entries resolve against `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub whatsapp_registry: PathBuf,
    pub telegram_registry: PathBuf,
    pub admins: PathBuf,
    pub log_file: PathBuf,
}

impl PathsConfig {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            whatsapp_registry: PathBuf::from("groups.json"),
            telegram_registry: PathBuf::from("telegram_chats.json"),
            admins: PathBuf::from("bot_admins.json"),
            log_file: PathBuf::from("logs/herald.log"),
        }
    }
}

/// Fan-out pacing as written in config files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub size: usize,
    pub delay_ms: u64,
    pub max_retries: u32,
}

impl BatchSettings {
    fn from_batch_config(cfg: BatchConfig) -> Self {
        Self {
            size: cfg.batch_size,
            delay_ms: cfg.batch_delay.as_millis() as u64,
            max_retries: cfg.max_retries,
        }
    }

    pub fn to_batch_config(self) -> BatchConfig {
        BatchConfig::new(
            self.size,
            Duration::from_millis(self.delay_ms),
            self.max_retries,
        )
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::from_batch_config(BatchConfig::whatsapp_default())
    }
}

/// WhatsApp session bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub enabled: bool,
    /// Base URL of the session bridge (e.g. `http://127.0.0.1:8085`).
    pub bridge_url: Option<String>,
    #[serde(skip_serializing)]
    pub bridge_token: Option<Secret<String>>,
    /// Local session directory wiped by the `reset` command, if any.
    pub session_dir: Option<PathBuf>,
    pub batch: BatchSettings,
    pub reconnect_delay_ms: u64,
    /// Long-poll wait passed to the bridge event endpoint.
    pub poll_wait_secs: u64,
}

impl WhatsAppConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bridge_url: None,
            bridge_token: None,
            session_dir: Some(PathBuf::from("session")),
            batch: BatchSettings::from_batch_config(BatchConfig::whatsapp_default()),
            reconnect_delay_ms: 5_000,
            poll_wait_secs: 25,
        }
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub token: Option<Secret<String>>,
    pub batch: BatchSettings,
    /// Reply in a chat the first time a message registers it.
    pub announce_registration: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
            batch: BatchSettings::from_batch_config(BatchConfig::telegram_default()),
            announce_registration: true,
        }
    }
}

/// Broadcast behavior shared by both backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Text sent when a broadcast has neither message nor media.
    pub placeholder_text: String,
    /// Text used for admin-chat broadcasts that carry no text of their own.
    pub admin_placeholder_text: String,
    /// Base of the linear retry backoff.
    pub retry_base_ms: u64,
    /// Delay between a backend connecting and its reconciliation sweep.
    pub sync_settle_ms: u64,
}

impl BroadcastConfig {
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn sync_settle(&self) -> Duration {
        Duration::from_millis(self.sync_settle_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            placeholder_text: "📣 New message!".into(),
            admin_placeholder_text: "📣 New message from admin!".into(),
            retry_base_ms: 500,
            sync_settle_ms: 3_000,
        }
    }
}

/// Limits for fetching media by URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub max_bytes: usize,
    pub timeout_secs: u64,
}

impl MediaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            timeout_secs: 30,
        }
    }
}

/// Administrator command options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Delay between the `reset` confirmation and process shutdown.
    pub reset_grace_ms: u64,
    /// Git checkout inspected by the `update` command.
    pub repo_dir: PathBuf,
    /// Branch named in the update instructions.
    pub update_branch: String,
}

impl ControlConfig {
    pub fn reset_grace(&self) -> Duration {
        Duration::from_millis(self.reset_grace_ms)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            reset_grace_ms: 2_000,
            repo_dir: PathBuf::from("."),
            update_branch: "main".into(),
        }
    }
}
