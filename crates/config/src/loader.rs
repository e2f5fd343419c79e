use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::HeraldConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["herald.toml", "herald.yaml", "herald.yml", "herald.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, discovery only looks in this
/// directory. Each call replaces the previous override.
pub fn set_config_dir(path: PathBuf) {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.lock() {
        *guard = Some(path);
    }
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.lock() {
        *guard = None;
    }
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<HeraldConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply environment
/// overrides.
///
/// Search order:
/// 1. `./herald.{toml,yaml,yml,json}` (working directory)
/// 2. `~/.config/herald/herald.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `HeraldConfig::default()` when nothing is found or the file
/// fails to parse.
pub fn discover_and_load() -> HeraldConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    HeraldConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            HeraldConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Environment variables win over file values.
///
/// - `PORT`: HTTP listen port
/// - `TELEGRAM_TOKEN`: Telegram bot token
/// - `WHATSAPP_BRIDGE_URL` / `WHATSAPP_BRIDGE_TOKEN`: WhatsApp session bridge
/// - `HERALD_DATA_DIR`: base directory for registry and admin files
pub fn apply_env_overrides(config: &mut HeraldConfig, env: impl Fn(&str) -> Option<String>) {
    let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    if let Some(port) = env("PORT") {
        match port.trim().parse::<u16>() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid PORT"),
        }
    }
    if let Some(token) = env("TELEGRAM_TOKEN") {
        config.telegram.token = Some(Secret::new(token));
    }
    if let Some(url) = env("WHATSAPP_BRIDGE_URL") {
        config.whatsapp.bridge_url = Some(url);
    }
    if let Some(token) = env("WHATSAPP_BRIDGE_TOKEN") {
        config.whatsapp.bridge_token = Some(Secret::new(token));
    }
    if let Some(dir) = env("HERALD_DATA_DIR") {
        config.paths.data_dir = PathBuf::from(dir);
    }
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    if let Some(path) = first_existing(Path::new(".")) {
        return Some(path);
    }

    config_dir().and_then(|dir| first_existing(&dir))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/herald/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("herald"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Path of the config file in use, if any.
pub fn config_file_in_use() -> Option<PathBuf> {
    find_config_file()
}

/// Render the effective config as TOML. Secrets are never serialized.
pub fn render_config(config: &HeraldConfig) -> anyhow::Result<String> {
    toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<HeraldConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
