use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    herald_channels::{
        ChannelEvent, ChannelHealthSnapshot, ChannelMembership, ChannelOutbound, ChannelPlugin,
        ChannelStatus, ConnectionHandle, ConnectionMachine, ConnectionUpdate, Directive,
        EventSender, MembershipEntry,
    },
    herald_common::Backend,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    bridge::{BridgeClient, BridgeEvent, SessionInfo, SessionState},
    inbound::{normalize_jid, sender_id, translate},
    outbound::WhatsAppOutbound,
    qr::render_qr,
};

const DEFAULT_POLL_WAIT: Duration = Duration::from_secs(25);

type SharedAccount = Arc<RwLock<Option<String>>>;

/// WhatsApp channel backed by the session bridge.
pub struct WhatsAppChannel {
    client: Arc<BridgeClient>,
    outbound: WhatsAppOutbound,
    connection: ConnectionHandle,
    /// Normalized JID of the linked account, once known.
    account: SharedAccount,
    session_dir: Option<PathBuf>,
    poll_wait: Duration,
}

impl WhatsAppChannel {
    pub fn new(client: BridgeClient, settle: Duration, reconnect: Duration) -> Self {
        let client = Arc::new(client);
        Self {
            outbound: WhatsAppOutbound {
                client: Arc::clone(&client),
            },
            client,
            connection: ConnectionHandle::new(ConnectionMachine::new(settle, reconnect)),
            account: Arc::new(RwLock::new(None)),
            session_dir: None,
            poll_wait: DEFAULT_POLL_WAIT,
        }
    }

    /// Local directory removed on session reset.
    #[must_use]
    pub fn with_session_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.session_dir = dir;
        self
    }

    #[must_use]
    pub fn with_poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait = wait;
        self
    }

    /// Phone number of the linked account.
    pub fn account(&self) -> Option<String> {
        read_account(&self.account).map(|jid| sender_id(&jid))
    }
}

impl std::fmt::Debug for WhatsAppChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppChannel")
            .field("client", &self.client)
            .field("connection", &self.connection)
            .field("session_dir", &self.session_dir)
            .finish()
    }
}

fn read_account(account: &SharedAccount) -> Option<String> {
    account.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn write_account(account: &SharedAccount, jid: Option<String>) {
    *account.write().unwrap_or_else(|e| e.into_inner()) = jid;
}

#[async_trait]
impl ChannelPlugin for WhatsAppChannel {
    fn backend(&self) -> Backend {
        Backend::WhatsApp
    }

    fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    fn outbound(&self) -> &dyn ChannelOutbound {
        &self.outbound
    }

    fn membership(&self) -> Option<&dyn ChannelMembership> {
        Some(self)
    }

    fn status(&self) -> &dyn ChannelStatus {
        self
    }

    async fn start(&self, events: EventSender, shutdown: CancellationToken) -> Result<()> {
        let poller = Poller {
            client: Arc::clone(&self.client),
            connection: self.connection.clone(),
            account: Arc::clone(&self.account),
            events,
            shutdown,
            poll_wait: self.poll_wait,
        };
        info!(bridge = self.client.base_url(), "starting WhatsApp bridge poller");
        tokio::spawn(poller.run());
        Ok(())
    }

    async fn reset_session(&self) -> Result<()> {
        if let Err(e) = self.client.logout().await {
            warn!(error = %e, "bridge logout failed, clearing local session anyway");
        }
        if let Some(dir) = &self.session_dir
            && tokio::fs::try_exists(dir).await.unwrap_or(false)
        {
            tokio::fs::remove_dir_all(dir)
                .await
                .with_context(|| format!("failed to remove session dir {}", dir.display()))?;
            info!(dir = %dir.display(), "removed WhatsApp session directory");
        }
        write_account(&self.account, None);
        self.connection.closed(true);
        info!("WhatsApp session cleared");
        Ok(())
    }
}

#[async_trait]
impl ChannelMembership for WhatsAppChannel {
    async fn fetch_memberships(&self) -> Result<Vec<MembershipEntry>> {
        let groups = self.client.groups().await?;
        Ok(groups
            .into_iter()
            .map(|g| MembershipEntry {
                id: g.id,
                title: g.subject,
            })
            .collect())
    }
}

#[async_trait]
impl ChannelStatus for WhatsAppChannel {
    async fn probe(&self) -> Result<ChannelHealthSnapshot> {
        let info = self.client.session().await?;
        let account = info
            .user
            .as_deref()
            .map(sender_id)
            .or_else(|| self.account());
        Ok(ChannelHealthSnapshot {
            connected: self.connection.is_connected(),
            account_id: account,
            details: Some(format!("bridge session {}", info.state.as_str())),
        })
    }
}

// ── Poller ───────────────────────────────────────────────────────────────────

/// Outcome of handling a session update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Reconnect(Duration),
    Stop,
}

impl From<Directive> for Flow {
    fn from(directive: Directive) -> Self {
        match directive {
            Directive::Reconnect(delay) => Self::Reconnect(delay),
            Directive::None | Directive::ScheduleReconcile(_) => Self::Stop,
        }
    }
}

struct Poller {
    client: Arc<BridgeClient>,
    connection: ConnectionHandle,
    account: SharedAccount,
    events: EventSender,
    shutdown: CancellationToken,
    poll_wait: Duration,
}

impl Poller {
    async fn run(self) {
        loop {
            let delay = match self.session().await {
                Flow::Reconnect(delay) => delay,
                Flow::Continue | Flow::Stop => break,
            };
            info!(?delay, "reconnecting to WhatsApp bridge");
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {},
            }
        }
        info!("WhatsApp poller stopped");
    }

    /// Connect, then long-poll events until the session ends.
    async fn session(&self) -> Flow {
        if let Err(e) = self.connection.begin_auth() {
            warn!(error = %e, "WhatsApp cannot start");
            return Flow::Stop;
        }

        let connected = tokio::select! {
            () = self.shutdown.cancelled() => return self.stop(),
            result = self.client.connect() => result,
        };
        let info = match connected {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "WhatsApp bridge connect failed");
                return self.lost(e.to_string()).await;
            },
        };
        let flow = self.apply(info).await;
        if flow != Flow::Continue {
            return flow;
        }

        let mut cursor = None;
        loop {
            let polled = tokio::select! {
                () = self.shutdown.cancelled() => return self.stop(),
                result = self.client.events(cursor, self.poll_wait) => result,
            };
            let batch = match polled {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "WhatsApp event poll failed");
                    return self.lost(e.to_string()).await;
                },
            };
            cursor = Some(batch.cursor);

            for event in batch.events {
                match event {
                    BridgeEvent::Connection(info) => {
                        let flow = self.apply(info).await;
                        if flow != Flow::Continue {
                            return flow;
                        }
                    },
                    other => {
                        let own = read_account(&self.account);
                        for event in translate(other, own.as_deref()) {
                            self.emit(event).await;
                        }
                    },
                }
            }
        }
    }

    async fn apply(&self, info: SessionInfo) -> Flow {
        match info.state {
            SessionState::Open => {
                if let Some(user) = &info.user {
                    write_account(&self.account, Some(normalize_jid(user)));
                }
                if self.connection.is_connected() {
                    return Flow::Continue;
                }
                let directive = match self.connection.opened() {
                    Ok(directive) => directive,
                    Err(e) => {
                        warn!(error = %e, "unexpected WhatsApp connection state");
                        return Flow::Continue;
                    },
                };
                let account = read_account(&self.account).map(|jid| sender_id(&jid));
                info!(account = account.as_deref(), "WhatsApp connected");
                self.emit_connection(ConnectionUpdate::Connected { account }, directive)
                    .await;
                Flow::Continue
            },
            SessionState::Qr | SessionState::Connecting => {
                if self.connection.is_connected() {
                    // The bridge reconnects on its own; mirror the drop.
                    let directive = self.connection.closed(false);
                    self.emit_connection(
                        ConnectionUpdate::Disconnected {
                            logged_out: false,
                            reason: info.reason.clone(),
                        },
                        directive,
                    )
                    .await;
                }
                if let Err(e) = self.connection.begin_auth() {
                    warn!(error = %e, "WhatsApp cannot re-authenticate");
                    return Flow::Stop;
                }
                if let Some(qr) = info.qr {
                    match render_qr(&qr) {
                        Some(block) => {
                            info!("scan this QR code with WhatsApp to link the bot:\n{block}")
                        },
                        None => warn!("could not render WhatsApp pairing QR"),
                    }
                    self.emit_connection(ConnectionUpdate::Pending { qr: Some(qr) }, Directive::None)
                        .await;
                }
                Flow::Continue
            },
            SessionState::Close => {
                let directive = self.connection.closed(info.logged_out);
                if info.logged_out {
                    write_account(&self.account, None);
                    warn!("WhatsApp session logged out, reset and scan a new QR code");
                } else {
                    warn!(reason = info.reason.as_deref(), "WhatsApp connection closed");
                }
                self.emit_connection(
                    ConnectionUpdate::Disconnected {
                        logged_out: info.logged_out,
                        reason: info.reason,
                    },
                    directive,
                )
                .await;
                directive.into()
            },
            SessionState::Unknown => {
                debug!("ignoring unknown WhatsApp session state");
                Flow::Continue
            },
        }
    }

    /// Bridge unreachable: record the drop and back off.
    async fn lost(&self, reason: String) -> Flow {
        let directive = self.connection.closed(false);
        self.emit_connection(
            ConnectionUpdate::Disconnected {
                logged_out: false,
                reason: Some(reason),
            },
            directive,
        )
        .await;
        directive.into()
    }

    fn stop(&self) -> Flow {
        self.connection.closed(false);
        Flow::Stop
    }

    async fn emit_connection(&self, update: ConnectionUpdate, directive: Directive) {
        self.emit(ChannelEvent::Connection {
            backend: Backend::WhatsApp,
            update,
            directive,
        })
        .await;
    }

    async fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event loop closed, dropping WhatsApp event");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        herald_channels::{ConnectionState, MembershipChange, event_channel},
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{method, path},
        },
    };

    const SETTLE: Duration = Duration::from_secs(3);
    const RECONNECT: Duration = Duration::from_secs(5);

    fn channel(server: &MockServer) -> WhatsAppChannel {
        WhatsAppChannel::new(BridgeClient::new(&server.uri(), None), SETTLE, RECONNECT)
            .with_poll_wait(Duration::ZERO)
    }

    async fn mount_connect(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/v1/session/connect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_idle_events(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"cursor": 0, "events": []}))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(server)
            .await;
    }

    async fn next_connection(rx: &mut herald_channels::EventReceiver) -> (ConnectionUpdate, Directive) {
        loop {
            match rx.recv().await.unwrap() {
                ChannelEvent::Connection {
                    update, directive, ..
                } => return (update, directive),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn open_session_connects_and_forwards_events() {
        let server = MockServer::start().await;
        mount_connect(
            &server,
            serde_json::json!({"state": "open", "user": "5511999999999:7@s.whatsapp.net"}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/v1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cursor": 1,
                "events": [{"type": "groups_upsert", "groups": [{"id": "1@g.us", "subject": "Team"}]}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_idle_events(&server).await;

        let channel = channel(&server);
        let (tx, mut rx) = event_channel(16);
        let shutdown = CancellationToken::new();
        channel.start(tx, shutdown.clone()).await.unwrap();

        let (update, directive) = next_connection(&mut rx).await;
        assert_eq!(update, ConnectionUpdate::Connected {
            account: Some("5511999999999".into())
        });
        assert_eq!(directive, Directive::ScheduleReconcile(SETTLE));
        assert!(channel.is_connected());
        assert_eq!(channel.account().as_deref(), Some("5511999999999"));

        match rx.recv().await.unwrap() {
            ChannelEvent::Membership {
                backend,
                change: MembershipChange::Joined { id, title },
            } => {
                assert_eq!(backend, Backend::WhatsApp);
                assert_eq!(id, "1@g.us");
                assert_eq!(title.as_deref(), Some("Team"));
            },
            other => panic!("unexpected event {other:?}"),
        }
        shutdown.cancel();
    }

    #[tokio::test]
    async fn qr_session_stays_pending() {
        let server = MockServer::start().await;
        mount_connect(&server, serde_json::json!({"state": "qr", "qr": "2@pairing-code"})).await;
        mount_idle_events(&server).await;

        let channel = channel(&server);
        let (tx, mut rx) = event_channel(16);
        channel.start(tx, CancellationToken::new()).await.unwrap();

        let (update, directive) = next_connection(&mut rx).await;
        assert_eq!(update, ConnectionUpdate::Pending {
            qr: Some("2@pairing-code".into())
        });
        assert_eq!(directive, Directive::None);
        assert_eq!(channel.connection().state(), ConnectionState::Pending);
    }

    #[tokio::test]
    async fn logout_is_terminal() {
        let server = MockServer::start().await;
        mount_connect(
            &server,
            serde_json::json!({"state": "close", "logged_out": true, "reason": "401"}),
        )
        .await;

        let channel = channel(&server);
        let (tx, mut rx) = event_channel(16);
        channel.start(tx, CancellationToken::new()).await.unwrap();

        let (update, directive) = next_connection(&mut rx).await;
        assert_eq!(update, ConnectionUpdate::Disconnected {
            logged_out: true,
            reason: Some("401".into()),
        });
        assert_eq!(directive, Directive::None);
        assert_eq!(channel.connection().state(), ConnectionState::LoggedOut);
    }

    #[tokio::test]
    async fn unreachable_bridge_requests_reconnect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/session/connect"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let channel = channel(&server);
        let (tx, mut rx) = event_channel(16);
        let shutdown = CancellationToken::new();
        channel.start(tx, shutdown.clone()).await.unwrap();

        let (update, directive) = next_connection(&mut rx).await;
        match update {
            ConnectionUpdate::Disconnected { logged_out, reason } => {
                assert!(!logged_out);
                assert!(reason.unwrap().contains("502"));
            },
            other => panic!("unexpected update {other:?}"),
        }
        assert_eq!(directive, Directive::Reconnect(RECONNECT));
        assert_eq!(channel.connection().state(), ConnectionState::Disconnected);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn reset_logs_out_and_removes_session_dir() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/session"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let session = tmp.path().join("session");
        std::fs::create_dir_all(session.join("keys")).unwrap();
        std::fs::write(session.join("keys/creds.json"), "{}").unwrap();

        let channel = channel(&server).with_session_dir(Some(session.clone()));
        channel.reset_session().await.unwrap();

        assert!(!session.exists());
        assert_eq!(channel.connection().state(), ConnectionState::LoggedOut);
    }

    #[tokio::test]
    async fn reset_survives_unreachable_bridge() {
        let server = MockServer::start().await;
        let channel = channel(&server);
        // No mocks mounted: the bridge answers 404.
        channel.reset_session().await.unwrap();
        assert_eq!(channel.connection().state(), ConnectionState::LoggedOut);
    }

    #[tokio::test]
    async fn memberships_come_from_groups() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "1@g.us", "subject": "One"},
                {"id": "2@g.us"}
            ])))
            .mount(&server)
            .await;

        let channel = channel(&server);
        let entries = channel
            .membership()
            .unwrap()
            .fetch_memberships()
            .await
            .unwrap();
        assert_eq!(entries, vec![
            MembershipEntry {
                id: "1@g.us".into(),
                title: Some("One".into()),
            },
            MembershipEntry {
                id: "2@g.us".into(),
                title: None,
            },
        ]);
    }

    #[tokio::test]
    async fn probe_reports_account_and_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "state": "open",
                "user": "5511999999999:2@s.whatsapp.net"
            })))
            .mount(&server)
            .await;

        let snapshot = channel(&server).probe().await.unwrap();
        assert_eq!(snapshot.account_id.as_deref(), Some("5511999999999"));
        assert_eq!(snapshot.details.as_deref(), Some("bridge session open"));
        assert!(!snapshot.connected);
    }

    #[tokio::test]
    async fn text_sends_post_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(wiremock::matchers::body_json(serde_json::json!({
                "to": "1@g.us",
                "text": "hello"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        channel(&server)
            .outbound()
            .send_text("1@g.us", "hello")
            .await
            .unwrap();
    }
}
