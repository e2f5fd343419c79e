mod admin_commands;
mod registry_commands;
mod run;

use std::{fs::OpenOptions, path::Path, sync::Mutex};

use {
    clap::{Parser, Subcommand},
    herald_config::HeraldConfig,
    tracing::{Subscriber, info},
    tracing_subscriber::{
        EnvFilter, Layer, fmt, layer::SubscriberExt, registry::LookupSpan,
        util::SubscriberInitExt,
    },
};

#[derive(Parser)]
#[command(name = "herald", about = "Herald: one message to every WhatsApp group and Telegram chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Only look for `herald.{toml,yaml,yml,json}` in this directory.
    #[arg(long, global = true, env = "HERALD_CONFIG_DIR")]
    config_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the channels, the event loop and the HTTP API.
    Run {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration.
    Config,
    /// Inspect or edit a recipient registry.
    Registry {
        #[command(subcommand)]
        action: registry_commands::RegistryAction,
    },
    /// Administrator allow-list.
    Admins {
        #[command(subcommand)]
        action: admin_commands::AdminAction,
    },
}

fn init_telemetry(cli: &Cli, log_file: Option<&Path>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .with(file_layer(log_file))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .with(file_layer(log_file))
            .init();
    }
}

/// Plain-text copy of every log line, appended to the configured file.
fn file_layer<S>(path: Option<&Path>) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let path = path?;
    match open_log_file(path) {
        Ok(file) => Some(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        ),
        Err(e) => {
            eprintln!("cannot open log file {}: {e}", path.display());
            None
        },
    }
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if let Some(dir) = &cli.config_dir {
        herald_config::set_config_dir(dir.clone());
    }
    let config: HeraldConfig = herald_config::discover_and_load();

    // Only the long-running command appends to the log file.
    let running = matches!(cli.command, Commands::Run { .. });
    let log_file = running.then(|| config.log_path());
    init_telemetry(&cli, log_file.as_deref());

    if running {
        match herald_config::config_file_in_use() {
            Some(path) => {
                info!(version = env!("CARGO_PKG_VERSION"), config = %path.display(), "herald starting")
            },
            None => info!(
                version = env!("CARGO_PKG_VERSION"),
                "herald starting with default config"
            ),
        }
    }

    match cli.command {
        Commands::Run { bind, port } => run::run(config, bind, port).await,
        Commands::Config => {
            print!("{}", herald_config::render_config(&config)?);
            Ok(())
        },
        Commands::Registry { action } => registry_commands::handle_registry(&config, action).await,
        Commands::Admins { action } => admin_commands::handle_admins(&config, action),
    }
}
