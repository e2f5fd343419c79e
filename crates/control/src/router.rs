//! The core event loop.
//!
//! Channel adapters push [`ChannelEvent`]s onto one queue; the router handles
//! them one at a time in arrival order: connection changes schedule
//! reconciliation, membership changes update the registry, and inbound
//! direct messages from administrators become commands or broadcasts.

use std::{sync::Arc, time::Duration};

use {
    herald_broadcast::{BroadcastCoordinator, BroadcastRequest},
    herald_channels::{
        Backends, ChannelEvent, ConnectionUpdate, Directive, EventReceiver, InboundMessage,
        MembershipChange,
    },
    herald_common::Backend,
    herald_media::mime::media_url,
    herald_membership::MembershipRegistry,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    gate::AuthorizationGate,
    processor::{CommandProcessor, Requester},
    sync::reconcile_backend,
};

/// Default text for admin broadcasts that carry no text of their own.
pub const DEFAULT_ADMIN_PLACEHOLDER: &str = "📣 New message from admin!";

pub struct EventRouter {
    backends: Backends,
    registry: Arc<MembershipRegistry>,
    coordinator: Arc<BroadcastCoordinator>,
    gate: AuthorizationGate,
    processor: CommandProcessor,
    admin_placeholder: String,
    announce_registration: bool,
    shutdown: CancellationToken,
}

impl EventRouter {
    pub fn new(
        coordinator: Arc<BroadcastCoordinator>,
        gate: AuthorizationGate,
        processor: CommandProcessor,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backends: coordinator.backends().clone(),
            registry: Arc::clone(coordinator.registry()),
            coordinator,
            gate,
            processor,
            admin_placeholder: DEFAULT_ADMIN_PLACEHOLDER.into(),
            announce_registration: true,
            shutdown,
        }
    }

    #[must_use]
    pub fn with_admin_placeholder(mut self, text: impl Into<String>) -> Self {
        self.admin_placeholder = text.into();
        self
    }

    #[must_use]
    pub fn with_announce_registration(mut self, announce: bool) -> Self {
        self.announce_registration = announce;
        self
    }

    /// Consume events until shutdown or until every sender is dropped.
    pub async fn run(self, mut events: EventReceiver) {
        info!("event loop started");
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
        info!("event loop stopped");
    }

    pub async fn handle(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connection {
                backend,
                update,
                directive,
            } => self.on_connection(backend, update, directive),
            ChannelEvent::Membership { backend, change } => {
                self.on_membership(backend, change).await;
            },
            ChannelEvent::Inbound(message) => self.on_inbound(message).await,
        }
    }

    fn on_connection(&self, backend: Backend, update: ConnectionUpdate, directive: Directive) {
        match &update {
            ConnectionUpdate::Pending { qr } => {
                info!(%backend, has_qr = qr.is_some(), "waiting for login");
            },
            ConnectionUpdate::Connected { account } => {
                info!(%backend, account = account.as_deref(), "connected and ready");
            },
            ConnectionUpdate::Disconnected { logged_out, reason } => {
                if *logged_out {
                    warn!(%backend, reason = reason.as_deref(), "session logged out, re-authorization required");
                } else {
                    warn!(%backend, reason = reason.as_deref(), "disconnected");
                }
            },
        }

        match directive {
            Directive::ScheduleReconcile(settle) => self.schedule_reconcile(backend, settle),
            Directive::Reconnect(delay) => {
                debug!(%backend, ?delay, "adapter will reconnect");
            },
            Directive::None => {},
        }
    }

    fn schedule_reconcile(&self, backend: Backend, settle: Duration) {
        if self
            .backends
            .get(backend)
            .and_then(|plugin| plugin.membership())
            .is_none()
        {
            debug!(%backend, "no membership listing, skipping startup sync");
            return;
        }
        let backends = self.backends.clone();
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        info!(%backend, ?settle, "reconciliation scheduled");

        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(settle) => {},
            }
            match reconcile_backend(&backends, &registry, backend).await {
                Ok(report) => info!(
                    %backend,
                    found = report.found,
                    added = report.added,
                    total = report.total,
                    "startup sync finished"
                ),
                Err(e) => warn!(%backend, error = %e, "startup sync failed"),
            }
        });
    }

    async fn on_membership(&self, backend: Backend, change: MembershipChange) {
        let result = match &change {
            MembershipChange::Joined { id, title } => {
                info!(%backend, %id, title = title.as_deref(), "joined chat");
                self.registry.add(backend, id).await
            },
            MembershipChange::Left { id } => {
                info!(%backend, %id, "left chat");
                self.registry.remove(backend, id).await
            },
            MembershipChange::Seen { id, .. } => {
                let added = self.registry.add(backend, id).await;
                if matches!(added, Ok(true)) && self.announce_registration {
                    self.send(backend, id, "✅ Chat registered automatically!")
                        .await;
                }
                added
            },
        };
        if let Err(e) = result {
            warn!(%backend, ?change, error = %e, "registry update failed");
        }
    }

    async fn on_inbound(&self, message: InboundMessage) {
        if message.from_self {
            return;
        }
        if !message.is_direct {
            debug!(backend = %message.backend, chat = %message.chat_id, "ignoring group message");
            return;
        }
        if !self.gate.is_authorized(&message.sender_id) {
            warn!(backend = %message.backend, sender = %message.sender_id, "unauthorized sender");
            return;
        }

        let requester = Requester {
            backend: message.backend,
            chat_id: message.chat_id.clone(),
            sender_id: message.sender_id.clone(),
        };

        if self
            .processor
            .process(message.text(), &requester)
            .await
            .is_some()
        {
            return;
        }

        if !self.has_recipients().await {
            self.processor
                .reply(&requester, "❌ No group or channel registered yet.")
                .await;
            return;
        }

        let mut content = message.text().trim().to_string();
        let media = message.media;
        let mut image_url = None;
        if media.is_none()
            && let Some(url) = media_url(&content)
        {
            info!(url, "media url detected");
            image_url = Some(url.to_string());
            content.clear();
        }

        if content.is_empty() && media.is_none() && image_url.is_none() {
            self.processor
                .reply(&requester, "❌ Send a message, image or valid URL.")
                .await;
            return;
        }

        self.processor
            .reply(&requester, "📤 Sending to all groups...")
            .await;

        let message = if content.is_empty() {
            self.admin_placeholder.clone()
        } else {
            content
        };
        let request = BroadcastRequest {
            message: Some(message),
            image_url,
            media,
        };

        let summary = self.coordinator.broadcast_to_all(request).await;
        self.processor
            .reply(&requester, &format!("✅ {}", summary.summary))
            .await;
        info!(sender = %requester.sender_id, "admin broadcast finished");
    }

    /// An unreadable registry counts as empty so the other backend still
    /// gets the broadcast.
    async fn has_recipients(&self) -> bool {
        for backend in Backend::ALL {
            match self.registry.is_empty(backend).await {
                Ok(false) => return true,
                Ok(true) => {},
                Err(e) => warn!(%backend, error = %e, "registry unreadable"),
            }
        }
        false
    }

    async fn send(&self, backend: Backend, to: &str, text: &str) {
        let Some(plugin) = self.backends.get(backend) else {
            return;
        };
        if let Err(e) = plugin.outbound().send_text(to, text).await {
            warn!(%backend, to, error = %e, "send failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::{
            gate::StaticAdmins,
            update::{UpdateChecker, UpdateStatus},
        },
        anyhow::Result,
        async_trait::async_trait,
        herald_channels::{event_channel, testing::FakeChannel},
        herald_common::{MediaPayload, MessageKind},
        herald_media::{MediaError, MediaSource},
        herald_membership::{JsonFileStore, MemoryStore},
    };

    struct NoUpdates;

    #[async_trait]
    impl UpdateChecker for NoUpdates {
        async fn check(&self) -> Result<UpdateStatus> {
            Ok(UpdateStatus::UpToDate)
        }
    }

    struct NoMedia;

    #[async_trait]
    impl MediaSource for NoMedia {
        async fn fetch(&self, url: &str) -> Result<MediaPayload, MediaError> {
            Err(MediaError::InvalidUrl(url.to_string()))
        }
    }

    const ADMIN: &str = "5511999999999";
    const ADMIN_CHAT: &str = "5511999999999@s.whatsapp.net";

    struct Harness {
        wa: Arc<FakeChannel>,
        tg: Arc<FakeChannel>,
        registry: Arc<MembershipRegistry>,
        shutdown: CancellationToken,
        router: EventRouter,
    }

    fn harness_with_gate(gate: AuthorizationGate) -> Harness {
        harness_with(gate, MembershipRegistry::in_memory())
    }

    fn harness_with(gate: AuthorizationGate, registry: MembershipRegistry) -> Harness {
        let wa = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        let tg = Arc::new(FakeChannel::connected(Backend::Telegram));
        let registry = Arc::new(registry);
        let backends = Backends::new().with(wa.clone()).with(tg.clone());
        let shutdown = CancellationToken::new();

        let coordinator = Arc::new(BroadcastCoordinator::new(
            backends.clone(),
            Arc::clone(&registry),
            Arc::new(NoMedia),
        ));
        let processor = CommandProcessor::new(
            backends,
            Arc::clone(&registry),
            Arc::new(NoUpdates),
            shutdown.clone(),
        );
        let router = EventRouter::new(coordinator, gate, processor, shutdown.clone());
        Harness {
            wa,
            tg,
            registry,
            shutdown,
            router,
        }
    }

    fn harness() -> Harness {
        harness_with_gate(admins())
    }

    fn dm(sender: &str, text: &str) -> ChannelEvent {
        ChannelEvent::Inbound(InboundMessage {
            backend: Backend::WhatsApp,
            chat_id: format!("{sender}@s.whatsapp.net"),
            sender_id: sender.into(),
            is_direct: true,
            from_self: false,
            text: Some(text.into()),
            media: None,
        })
    }

    fn admins() -> AuthorizationGate {
        AuthorizationGate::new(Arc::new(StaticAdmins(vec![ADMIN.into()])))
    }

    fn admin_replies(h: &Harness) -> Vec<String> {
        h.wa.sent_to(ADMIN_CHAT).into_iter().map(|m| m.text).collect()
    }

    #[tokio::test]
    async fn unauthorized_command_is_ignored() {
        let h = harness();
        h.registry.add(Backend::WhatsApp, "g1@g.us").await.unwrap();

        h.router.handle(dm("5511000000000", "status")).await;
        h.router.handle(dm("5511000000000", "hello")).await;

        assert!(h.wa.sent().is_empty());
        assert!(h.tg.sent().is_empty());
        assert_eq!(h.registry.len(Backend::WhatsApp).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unauthorized_telegram_dm_leaves_no_trace() {
        let h = harness();

        // A private Telegram chat produces only the inbound message.
        h.router
            .handle(ChannelEvent::Inbound(InboundMessage {
                backend: Backend::Telegram,
                chat_id: "777".into(),
                sender_id: "777".into(),
                is_direct: true,
                from_self: false,
                text: Some("status".into()),
                media: None,
            }))
            .await;

        assert!(h.tg.sent().is_empty());
        assert!(h.registry.is_empty(Backend::Telegram).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_registry_does_not_block_admin_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let groups = dir.path().join("groups.json");
        std::fs::write(&groups, "{not json").unwrap();
        let registry = MembershipRegistry::new(
            Arc::new(JsonFileStore::new(&groups)),
            Arc::new(MemoryStore::with_ids(["-100"])),
        );
        let h = harness_with(admins(), registry);

        h.router.handle(dm(ADMIN, "Promo today!")).await;

        assert_eq!(h.tg.sent_to("-100")[0].text, "Promo today!");
        let replies = admin_replies(&h);
        assert_eq!(replies[0], "📤 Sending to all groups...");
        assert!(replies[1].contains("WPP(0✅/0❌) TG(1✅/0❌)"));
    }

    #[tokio::test]
    async fn removed_admin_is_refused_on_next_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot_admins.json");
        std::fs::write(&path, format!(r#"{{"admins": ["{ADMIN}"]}}"#)).unwrap();
        let h = harness_with_gate(AuthorizationGate::from_file(&path));

        h.router.handle(dm(ADMIN, "help")).await;
        assert_eq!(admin_replies(&h).len(), 1);

        std::fs::write(&path, r#"{"admins": []}"#).unwrap();
        h.router.handle(dm(ADMIN, "help")).await;
        assert_eq!(admin_replies(&h).len(), 1);
    }

    #[tokio::test]
    async fn group_and_own_messages_are_ignored() {
        let h = harness();
        let mut group = match dm(ADMIN, "status") {
            ChannelEvent::Inbound(m) => m,
            _ => unreachable!(),
        };
        group.is_direct = false;
        h.router.handle(ChannelEvent::Inbound(group.clone())).await;

        group.is_direct = true;
        group.from_self = true;
        h.router.handle(ChannelEvent::Inbound(group)).await;

        assert!(h.wa.sent().is_empty());
    }

    #[tokio::test]
    async fn command_is_not_broadcast() {
        let h = harness();
        h.registry.add(Backend::WhatsApp, "g1@g.us").await.unwrap();

        h.router.handle(dm(ADMIN, "status")).await;

        assert!(h.wa.sent_to("g1@g.us").is_empty());
        assert!(admin_replies(&h)[0].contains("BOT STATUS"));
    }

    #[tokio::test(start_paused = true)]
    async fn admin_text_is_broadcast() {
        let h = harness();
        h.registry.add(Backend::WhatsApp, "g1@g.us").await.unwrap();
        h.registry.add(Backend::Telegram, "-100").await.unwrap();

        h.router.handle(dm(ADMIN, "Promo today!")).await;

        assert_eq!(h.wa.sent_to("g1@g.us")[0].text, "Promo today!");
        assert_eq!(h.tg.sent_to("-100")[0].text, "Promo today!");
        let replies = admin_replies(&h);
        assert_eq!(replies[0], "📤 Sending to all groups...");
        assert!(replies[1].starts_with("✅ 📊 Broadcast finished in"));
        assert!(replies[1].contains("WPP(1✅/0❌) TG(1✅/0❌)"));
    }

    #[tokio::test(start_paused = true)]
    async fn attachment_without_caption_uses_admin_placeholder() {
        let h = harness();
        h.registry.add(Backend::Telegram, "-100").await.unwrap();

        h.router
            .handle(ChannelEvent::Inbound(InboundMessage {
                backend: Backend::WhatsApp,
                chat_id: ADMIN_CHAT.into(),
                sender_id: ADMIN.into(),
                is_direct: true,
                from_self: false,
                text: None,
                media: Some(MediaPayload::new(vec![1u8; 16], "image/jpeg")),
            }))
            .await;

        let sent = h.tg.sent_to("-100");
        assert_eq!(sent[0].kind, MessageKind::Image);
        assert_eq!(sent[0].text, DEFAULT_ADMIN_PLACEHOLDER);
    }

    #[tokio::test(start_paused = true)]
    async fn media_url_failure_still_sends_placeholder_text() {
        let h = harness();
        h.registry.add(Backend::WhatsApp, "g1@g.us").await.unwrap();

        h.router
            .handle(dm(ADMIN, "https://cdn.example.com/banner.png"))
            .await;

        let sent = h.wa.sent_to("g1@g.us");
        assert_eq!(sent[0].kind, MessageKind::Text);
        assert_eq!(sent[0].text, DEFAULT_ADMIN_PLACEHOLDER);
    }

    #[tokio::test]
    async fn empty_registries_are_reported() {
        let h = harness();
        h.router.handle(dm(ADMIN, "hello")).await;
        assert_eq!(admin_replies(&h), vec![
            "❌ No group or channel registered yet."
        ]);
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let h = harness();
        h.registry.add(Backend::WhatsApp, "g1@g.us").await.unwrap();
        h.router.handle(dm(ADMIN, "   ")).await;
        assert_eq!(admin_replies(&h), vec!["❌ Send a message, image or valid URL."]);
    }

    #[tokio::test]
    async fn membership_events_update_registry() {
        let h = harness();

        h.router
            .handle(ChannelEvent::Membership {
                backend: Backend::WhatsApp,
                change: MembershipChange::Joined {
                    id: "g1@g.us".into(),
                    title: Some("Team".into()),
                },
            })
            .await;
        assert!(h.registry.contains(Backend::WhatsApp, "g1@g.us").await.unwrap());

        h.router
            .handle(ChannelEvent::Membership {
                backend: Backend::WhatsApp,
                change: MembershipChange::Left {
                    id: "g1@g.us".into(),
                },
            })
            .await;
        assert!(h.registry.is_empty(Backend::WhatsApp).await.unwrap());
    }

    #[tokio::test]
    async fn first_message_registers_chat_once() {
        let h = harness();
        let seen = || ChannelEvent::Membership {
            backend: Backend::Telegram,
            change: MembershipChange::Seen {
                id: "-100".into(),
                title: None,
            },
        };

        h.router.handle(seen()).await;
        h.router.handle(seen()).await;

        assert_eq!(h.registry.len(Backend::Telegram).await.unwrap(), 1);
        let sent = h.tg.sent_to("-100");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "✅ Chat registered automatically!");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_schedules_reconciliation() {
        let h = harness();
        h.wa.set_memberships(["G1", "G2"]);

        h.router
            .handle(ChannelEvent::Connection {
                backend: Backend::WhatsApp,
                update: ConnectionUpdate::Connected { account: None },
                directive: Directive::ScheduleReconcile(Duration::from_secs(3)),
            })
            .await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.registry.is_empty(Backend::WhatsApp).await.unwrap());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.registry.members(Backend::WhatsApp).await.unwrap(), vec![
            "G1", "G2"
        ]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = harness();
        let (tx, rx) = event_channel(8);
        let shutdown = h.shutdown.clone();
        let wa = h.wa.clone();

        let task = tokio::spawn(h.router.run(rx));
        tx.send(dm(ADMIN, "help")).await.unwrap();
        for _ in 0..100 {
            if !wa.sent_to(ADMIN_CHAT).is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(wa.sent_to(ADMIN_CHAT)[0].text.contains("AVAILABLE COMMANDS"));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("event loop should stop after cancellation")
            .unwrap();
        // The loop stopped on the token, not because the queue closed.
        drop(tx);
    }
}
