use std::{sync::Arc, time::Instant};

use {
    anyhow::Result,
    herald_broadcast::{BroadcastCoordinator, RetryPolicy},
    herald_channels::{Backends, event_channel},
    herald_common::Backend,
    herald_config::{HeraldConfig, TelegramConfig, WhatsAppConfig},
    herald_control::{AuthorizationGate, CommandProcessor, EventRouter, GitUpdateChecker},
    herald_gateway::{GatewayState, start_gateway},
    herald_media::MediaFetcher,
    herald_membership::MembershipRegistry,
    herald_telegram::TelegramChannel,
    herald_whatsapp::{BridgeClient, WhatsAppChannel},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

const EVENT_BUFFER: usize = 256;

/// Telegram reconnect backoff after a failed token check or polling drop.
const TELEGRAM_RECONNECT_MS: u64 = 5_000;

fn whatsapp_channel(config: &HeraldConfig) -> Option<WhatsAppChannel> {
    let wa: &WhatsAppConfig = &config.whatsapp;
    if !wa.enabled {
        info!("WhatsApp disabled in config");
        return None;
    }
    let Some(url) = wa.bridge_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        warn!("WHATSAPP_BRIDGE_URL not set, WhatsApp disabled");
        return None;
    };
    let client = BridgeClient::new(url, wa.bridge_token.clone());
    Some(
        WhatsAppChannel::new(
            client,
            config.broadcast.sync_settle(),
            wa.reconnect_delay(),
        )
        .with_session_dir(wa.session_dir.as_ref().map(|d| config.paths.resolve(d)))
        .with_poll_wait(std::time::Duration::from_secs(wa.poll_wait_secs)),
    )
}

fn telegram_channel(config: &HeraldConfig) -> Option<TelegramChannel> {
    let tg: &TelegramConfig = &config.telegram;
    if !tg.enabled {
        info!("Telegram disabled in config");
        return None;
    }
    let Some(token) = &tg.token else {
        warn!("TELEGRAM_TOKEN not set, Telegram disabled");
        return None;
    };
    Some(TelegramChannel::new(
        token,
        config.broadcast.sync_settle(),
        std::time::Duration::from_millis(TELEGRAM_RECONNECT_MS),
    ))
}

/// Start channels, the event loop and the HTTP API; return once shut down.
pub async fn run(config: HeraldConfig, bind: Option<String>, port: Option<u16>) -> Result<()> {
    let started = Instant::now();
    let shutdown = CancellationToken::new();

    let mut backends = Backends::new();
    if let Some(channel) = whatsapp_channel(&config) {
        backends.register(Arc::new(channel));
    }
    if let Some(channel) = telegram_channel(&config) {
        backends.register(Arc::new(channel));
    }
    if backends.is_empty() {
        warn!("no messaging backend configured, only the HTTP API will run");
    }

    let registry = Arc::new(MembershipRegistry::from_files(
        config.registry_path(Backend::WhatsApp),
        config.registry_path(Backend::Telegram),
    ));
    let media = Arc::new(MediaFetcher::new(
        config.media.max_bytes,
        config.media.timeout(),
    ));
    let coordinator = Arc::new(
        BroadcastCoordinator::new(backends.clone(), Arc::clone(&registry), media)
            .with_batch(Backend::WhatsApp, config.batch_for(Backend::WhatsApp))
            .with_batch(Backend::Telegram, config.batch_for(Backend::Telegram))
            .with_retry(RetryPolicy::new(config.broadcast.retry_base()))
            .with_placeholder(config.broadcast.placeholder_text.clone()),
    );

    let updates = Arc::new(GitUpdateChecker::new(
        &config.control.repo_dir,
        config.control.update_branch.clone(),
    ));
    let processor = CommandProcessor::new(
        backends.clone(),
        Arc::clone(&registry),
        updates,
        shutdown.clone(),
    )
    .with_reset_grace(config.control.reset_grace())
    .with_started(started);
    let gate = AuthorizationGate::from_file(config.admins_path());
    let router = EventRouter::new(Arc::clone(&coordinator), gate, processor, shutdown.clone())
        .with_admin_placeholder(config.broadcast.admin_placeholder_text.clone())
        .with_announce_registration(config.telegram.announce_registration);

    let (events, inbox) = event_channel(EVENT_BUFFER);
    for plugin in backends.iter() {
        if let Err(e) = plugin.start(events.clone(), shutdown.child_token()).await {
            warn!(backend = %plugin.backend(), error = %e, "channel failed to start");
        }
    }
    drop(events);
    let event_loop = tokio::spawn(router.run(inbox));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = signal.cancelled() => {},
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    return;
                }
                info!("shutdown requested");
                signal.cancel();
            },
        }
    });

    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let port = port.unwrap_or(config.server.port);
    let state = GatewayState::new(coordinator, started);
    let served = start_gateway(
        &bind,
        port,
        state,
        config.server.body_limit_bytes,
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    if let Err(e) = event_loop.await {
        warn!(error = %e, "event loop ended abnormally");
    }
    info!("herald stopped");
    served
}
