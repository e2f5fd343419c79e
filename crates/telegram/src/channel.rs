use std::time::Duration;

use {
    anyhow::Result,
    async_trait::async_trait,
    herald_channels::{
        ChannelEvent, ChannelHealthSnapshot, ChannelMembership, ChannelOutbound, ChannelPlugin,
        ChannelStatus, ConnectionHandle, ConnectionMachine, ConnectionUpdate, Directive,
        EventSender,
    },
    herald_common::Backend,
    secrecy::{ExposeSecret, Secret},
    teloxide::{ApiError, RequestError, dptree, prelude::*},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{handlers, outbound::TelegramOutbound};

/// Telegram Bot API channel.
pub struct TelegramChannel {
    outbound: TelegramOutbound,
    connection: ConnectionHandle,
}

impl TelegramChannel {
    pub fn new(token: &Secret<String>, settle: Duration, reconnect: Duration) -> Self {
        Self::with_bot(Bot::new(token.expose_secret()), settle, reconnect)
    }

    pub fn with_bot(bot: Bot, settle: Duration, reconnect: Duration) -> Self {
        Self {
            outbound: TelegramOutbound { bot },
            connection: ConnectionHandle::new(ConnectionMachine::new(settle, reconnect)),
        }
    }

    fn bot(&self) -> &Bot {
        &self.outbound.bot
    }
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("token", &"[REDACTED]")
            .field("connection", &self.connection)
            .finish()
    }
}

#[async_trait]
impl ChannelPlugin for TelegramChannel {
    fn backend(&self) -> Backend {
        Backend::Telegram
    }

    fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    fn outbound(&self) -> &dyn ChannelOutbound {
        &self.outbound
    }

    /// The Bot API cannot enumerate the chats a bot belongs to.
    fn membership(&self) -> Option<&dyn ChannelMembership> {
        None
    }

    fn status(&self) -> &dyn ChannelStatus {
        self
    }

    async fn start(&self, events: EventSender, shutdown: CancellationToken) -> Result<()> {
        let bot = self.bot().clone();
        let connection = self.connection.clone();
        tokio::spawn(run(bot, connection, events, shutdown));
        Ok(())
    }

    async fn reset_session(&self) -> Result<()> {
        info!("Telegram authenticates by bot token, no session to reset");
        Ok(())
    }
}

#[async_trait]
impl ChannelStatus for TelegramChannel {
    async fn probe(&self) -> Result<ChannelHealthSnapshot> {
        let me = self.bot().get_me().await?;
        Ok(ChannelHealthSnapshot {
            connected: self.connection.is_connected(),
            account_id: Some(format!("@{}", me.username())),
            details: None,
        })
    }
}

async fn emit(events: &EventSender, update: ConnectionUpdate, directive: Directive) {
    let event = ChannelEvent::Connection {
        backend: Backend::Telegram,
        update,
        directive,
    };
    if events.send(event).await.is_err() {
        debug!("event loop closed, dropping Telegram connection event");
    }
}

/// Sleep for a reconnect directive. Returns false when shutdown wins or no
/// reconnect was requested.
async fn wait_for_retry(directive: Directive, shutdown: &CancellationToken) -> bool {
    let Directive::Reconnect(delay) = directive else {
        return false;
    };
    info!(?delay, "reconnecting to Telegram");
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// Validate the token, then long-poll updates until shutdown.
async fn run(
    bot: Bot,
    connection: ConnectionHandle,
    events: EventSender,
    shutdown: CancellationToken,
) {
    loop {
        if let Err(e) = connection.begin_auth() {
            warn!(error = %e, "Telegram cannot start");
            return;
        }
        emit(&events, ConnectionUpdate::Pending { qr: None }, Directive::None).await;

        let me = match bot.get_me().await {
            Ok(me) => me,
            Err(e) => {
                let logged_out = matches!(e, RequestError::Api(ApiError::InvalidToken));
                warn!(error = %e, logged_out, "Telegram login failed");
                let directive = connection.closed(logged_out);
                emit(
                    &events,
                    ConnectionUpdate::Disconnected {
                        logged_out,
                        reason: Some(e.to_string()),
                    },
                    directive,
                )
                .await;
                if wait_for_retry(directive, &shutdown).await {
                    continue;
                }
                return;
            },
        };

        let account = format!("@{}", me.username());
        let directive = match connection.opened() {
            Ok(directive) => directive,
            Err(e) => {
                warn!(error = %e, "unexpected Telegram connection state");
                Directive::None
            },
        };
        info!(%account, "Telegram bot started");
        emit(
            &events,
            ConnectionUpdate::Connected {
                account: Some(account),
            },
            directive,
        )
        .await;

        let mut dispatcher = Dispatcher::builder(bot.clone(), handlers::schema())
            .dependencies(dptree::deps![events.clone()])
            .default_handler(|_| async {})
            .build();

        tokio::select! {
            () = shutdown.cancelled() => {
                connection.closed(false);
                info!("Telegram polling stopped");
                return;
            },
            () = dispatcher.dispatch() => {},
        }

        let directive = connection.closed(false);
        emit(
            &events,
            ConnectionUpdate::Disconnected {
                logged_out: false,
                reason: Some("update polling ended".into()),
            },
            directive,
        )
        .await;
        if !wait_for_retry(directive, &shutdown).await {
            return;
        }
    }
}
