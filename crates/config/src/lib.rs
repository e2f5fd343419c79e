//! Configuration loading: file discovery, `${ENV}` substitution, typed
//! schema and environment overrides.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, clear_config_dir, config_dir, config_file_in_use, discover_and_load,
        load_config, render_config, set_config_dir,
    },
    schema::{
        BatchSettings, BroadcastConfig, ControlConfig, HeraldConfig, MediaConfig, PathsConfig,
        ServerConfig, TelegramConfig, WhatsAppConfig,
    },
};
