use std::time::{Duration, Instant};

use {
    anyhow::Result,
    herald_channels::{Backends, ConnectionState},
    herald_common::Backend,
    herald_membership::MembershipRegistry,
    serde::Serialize,
    sysinfo::{ProcessesToUpdate, System},
};

/// One backend's view in a status report.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub configured: bool,
    pub connected: bool,
    pub state: Option<ConnectionState>,
    pub recipients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Snapshot served by `GET /status` and the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub whatsapp: BackendStatus,
    pub telegram: BackendStatus,
    pub uptime_secs: u64,
    /// Resident memory of this process, when the platform reports it.
    pub memory_bytes: Option<u64>,
}

impl StatusReport {
    pub async fn collect(
        backends: &Backends,
        registry: &MembershipRegistry,
        started: Instant,
    ) -> Result<Self> {
        Ok(Self {
            whatsapp: backend_status(backends, registry, Backend::WhatsApp).await?,
            telegram: backend_status(backends, registry, Backend::Telegram).await?,
            uptime_secs: started.elapsed().as_secs(),
            memory_bytes: process_memory(),
        })
    }

    pub fn uptime(&self) -> Duration {
        Duration::from_secs(self.uptime_secs)
    }

    /// Chat-friendly rendering.
    pub fn render(&self) -> String {
        let mut out = String::from("📊 *BOT STATUS*\n\n");
        out.push_str(&format!(
            "🔸 WhatsApp: {}\n🔸 WPP groups: {}\n",
            connectivity(&self.whatsapp),
            self.whatsapp.recipients
        ));
        out.push_str(&format!(
            "🔸 Telegram: {}\n🔸 TG chats: {}\n",
            connectivity(&self.telegram),
            self.telegram.recipients
        ));
        out.push_str(&format!("🔸 Uptime: {}min\n", self.uptime_secs / 60));
        match self.memory_bytes {
            Some(bytes) => out.push_str(&format!("🔸 Memory: {}MB", bytes / (1024 * 1024))),
            None => out.push_str("🔸 Memory: n/a"),
        }
        out
    }
}

fn connectivity(status: &BackendStatus) -> &'static str {
    match status.state {
        None => "⚪ Not configured",
        Some(ConnectionState::Connected) => "✅ Connected",
        Some(ConnectionState::Pending) => "⏳ Waiting for login",
        Some(ConnectionState::LoggedOut) => "🚫 Logged out",
        Some(ConnectionState::Disconnected) => "❌ Disconnected",
    }
}

async fn backend_status(
    backends: &Backends,
    registry: &MembershipRegistry,
    backend: Backend,
) -> Result<BackendStatus> {
    let plugin = backends.get(backend);
    let account = match plugin {
        Some(p) if p.is_connected() => p.status().probe().await.ok().and_then(|s| s.account_id),
        _ => None,
    };
    Ok(BackendStatus {
        configured: plugin.is_some(),
        connected: plugin.is_some_and(|p| p.is_connected()),
        state: backends.state(backend),
        recipients: registry.len(backend).await?,
        account,
    })
}

fn process_memory() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory())
}
