use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    anyhow::Result,
    herald_channels::Backends,
    herald_common::Backend,
    herald_membership::MembershipRegistry,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    command::{Command, help_text},
    status::StatusReport,
    sync::reconcile_backend,
    update::UpdateChecker,
};

/// Who sent a message and where replies go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub backend: Backend,
    pub chat_id: String,
    pub sender_id: String,
}

/// Executes administrator commands and replies in the requester's chat.
pub struct CommandProcessor {
    backends: Backends,
    registry: Arc<MembershipRegistry>,
    updates: Arc<dyn UpdateChecker>,
    shutdown: CancellationToken,
    reset_grace: Duration,
    started: Instant,
}

impl CommandProcessor {
    pub fn new(
        backends: Backends,
        registry: Arc<MembershipRegistry>,
        updates: Arc<dyn UpdateChecker>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backends,
            registry,
            updates,
            shutdown,
            reset_grace: Duration::from_secs(2),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_reset_grace(mut self, grace: Duration) -> Self {
        self.reset_grace = grace;
        self
    }

    #[must_use]
    pub fn with_started(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    /// Run `text` if it is a command. Returns `None` for anything else, which
    /// the caller treats as broadcast content.
    pub async fn process(&self, text: &str, requester: &Requester) -> Option<Command> {
        let command = Command::parse(text)?;
        info!(%command, backend = %requester.backend, sender = %requester.sender_id, "command received");

        if let Err(e) = self.execute(command, requester).await {
            warn!(%command, error = %e, "command failed");
            self.reply(requester, &format!("❌ Error: {e}")).await;
        }
        Some(command)
    }

    async fn execute(&self, command: Command, requester: &Requester) -> Result<()> {
        match command {
            Command::Status => {
                let report = StatusReport::collect(&self.backends, &self.registry, self.started)
                    .await?;
                self.reply(requester, &report.render()).await;
            },
            Command::Test => {
                let plugin = self.backends.require(requester.backend)?;
                let start = Instant::now();
                plugin.status().probe().await?;
                let elapsed = start.elapsed().as_millis();
                self.reply(
                    requester,
                    &format!("🤖 Bot working perfectly!\n⏱️ Response test completed in {elapsed}ms."),
                )
                .await;
                info!(sender = %requester.sender_id, elapsed_ms = elapsed as u64, "test completed");
            },
            Command::Sync => {
                self.reply(requester, "🔄 Syncing groups...").await;
                let report =
                    reconcile_backend(&self.backends, &self.registry, requester.backend).await?;
                self.reply(
                    requester,
                    &format!(
                        "✅ *Sync complete!*\n\n📊 Groups found: {}\n➕ Newly added: {}\n📁 Total registered: {}",
                        report.found, report.added, report.total
                    ),
                )
                .await;
            },
            Command::Update => {
                self.reply(requester, "🔍 Checking for updates...").await;
                let status = self.updates.check().await?;
                self.reply(requester, &status.render()).await;
            },
            Command::Reset => {
                let plugin = self.backends.require(requester.backend)?;
                self.reply(
                    requester,
                    &format!(
                        "🔄 Resetting the {} session...\nThe bot will restart.",
                        requester.backend
                    ),
                )
                .await;
                plugin.reset_session().await?;
                info!(backend = %requester.backend, sender = %requester.sender_id, grace = ?self.reset_grace, "session reset, shutting down");

                let shutdown = self.shutdown.clone();
                let grace = self.reset_grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    shutdown.cancel();
                });
            },
            Command::Help => {
                self.reply(requester, &help_text()).await;
            },
        }
        Ok(())
    }

    /// Best effort: a failed reply is logged, never propagated.
    pub async fn reply(&self, requester: &Requester, text: &str) {
        let Some(plugin) = self.backends.get(requester.backend) else {
            warn!(backend = %requester.backend, "cannot reply, backend not configured");
            return;
        };
        if let Err(e) = plugin.outbound().send_text(&requester.chat_id, text).await {
            warn!(backend = %requester.backend, chat = %requester.chat_id, error = %e, "reply failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::update::UpdateStatus,
        async_trait::async_trait,
        herald_channels::testing::FakeChannel,
    };

    struct FixedUpdate(Option<UpdateStatus>);

    #[async_trait]
    impl UpdateChecker for FixedUpdate {
        async fn check(&self) -> Result<UpdateStatus> {
            self.0
                .clone()
                .ok_or_else(|| anyhow::anyhow!("not a git repository"))
        }
    }

    const ADMIN_CHAT: &str = "5511999999999@s.whatsapp.net";

    fn requester() -> Requester {
        Requester {
            backend: Backend::WhatsApp,
            chat_id: ADMIN_CHAT.into(),
            sender_id: "5511999999999".into(),
        }
    }

    fn processor(
        fake: &Arc<FakeChannel>,
        updates: Option<UpdateStatus>,
    ) -> (CommandProcessor, CancellationToken) {
        let shutdown = CancellationToken::new();
        let processor = CommandProcessor::new(
            Backends::new().with(fake.clone()),
            Arc::new(MembershipRegistry::in_memory()),
            Arc::new(FixedUpdate(updates)),
            shutdown.clone(),
        );
        (processor, shutdown)
    }

    fn replies(fake: &FakeChannel) -> Vec<String> {
        fake.sent_to(ADMIN_CHAT).into_iter().map(|m| m.text).collect()
    }

    #[tokio::test]
    async fn non_commands_pass_through() {
        let fake = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        let (processor, _) = processor(&fake, None);

        assert_eq!(processor.process("hello everyone", &requester()).await, None);
        assert!(fake.sent().is_empty());
    }

    #[tokio::test]
    async fn status_replies_with_report() {
        let fake = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        let (processor, _) = processor(&fake, None);

        assert_eq!(
            processor.process("Status", &requester()).await,
            Some(Command::Status)
        );
        let replies = replies(&fake);
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("BOT STATUS"));
    }

    #[tokio::test]
    async fn test_probes_backend() {
        let fake = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        let (processor, _) = processor(&fake, None);

        processor.process("test", &requester()).await;
        assert!(replies(&fake)[0].starts_with("🤖 Bot working perfectly!"));
    }

    #[tokio::test]
    async fn sync_reports_counts() {
        let fake = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        fake.set_memberships(["G1", "G2"]);
        let (processor, _) = processor(&fake, None);

        processor.process("sync", &requester()).await;
        let replies = replies(&fake);
        assert_eq!(replies[0], "🔄 Syncing groups...");
        assert!(replies[1].contains("Groups found: 2"));
        assert!(replies[1].contains("Newly added: 2"));
        assert!(replies[1].contains("Total registered: 2"));
    }

    #[tokio::test]
    async fn failures_become_error_replies() {
        let fake = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        let (processor, _) = processor(&fake, None);

        assert_eq!(
            processor.process("sync", &requester()).await,
            Some(Command::Sync)
        );
        let replies = replies(&fake);
        assert!(replies[1].starts_with("❌ Error:"));
        assert!(replies[1].contains("membership listing"));
    }

    #[tokio::test]
    async fn update_reports_availability() {
        let fake = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        let (processor, _) = processor(
            &fake,
            Some(UpdateStatus::Available {
                instructions: "git pull".into(),
            }),
        );

        processor.process("update", &requester()).await;
        let replies = replies(&fake);
        assert_eq!(replies[0], "🔍 Checking for updates...");
        assert!(replies[1].contains("UPDATE AVAILABLE"));
    }

    #[tokio::test]
    async fn update_error_is_replied() {
        let fake = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        let (processor, _) = processor(&fake, None);

        processor.process("update", &requester()).await;
        assert_eq!(replies(&fake)[1], "❌ Error: not a git repository");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_session_then_shuts_down() {
        let fake = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        let (processor, shutdown) = processor(&fake, None);

        processor.process("reset", &requester()).await;
        assert_eq!(fake.resets(), 1);
        assert!(replies(&fake)[0].contains("Resetting the WhatsApp session"));
        assert!(!shutdown.is_cancelled());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn help_lists_commands() {
        let fake = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        let (processor, _) = processor(&fake, None);

        processor.process("HELP", &requester()).await;
        assert!(replies(&fake)[0].contains("AVAILABLE COMMANDS"));
    }
}
