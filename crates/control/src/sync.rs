use {
    anyhow::Result,
    herald_channels::{Backends, ChannelError},
    herald_common::{Backend, ReconcileReport},
    herald_membership::MembershipRegistry,
    tracing::info,
};

/// Add every chat the backend currently belongs to. Never removes entries.
pub async fn reconcile_backend(
    backends: &Backends,
    registry: &MembershipRegistry,
    backend: Backend,
) -> Result<ReconcileReport> {
    let plugin = backends.require(backend)?;
    if !plugin.is_connected() {
        return Err(ChannelError::NotConnected(backend).into());
    }
    let membership = plugin.membership().ok_or(ChannelError::Unsupported {
        backend,
        what: "membership listing",
    })?;

    info!(%backend, "syncing memberships");
    let entries = membership.fetch_memberships().await?;
    registry
        .reconcile(backend, entries.iter().map(|e| e.id.as_str()))
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, herald_channels::testing::FakeChannel, std::sync::Arc};

    #[tokio::test]
    async fn reconciles_live_snapshot() {
        let fake = Arc::new(FakeChannel::connected(Backend::WhatsApp));
        fake.set_memberships(["G1", "G2"]);
        let backends = Backends::new().with(fake);
        let registry = MembershipRegistry::in_memory();
        registry.add(Backend::WhatsApp, "G1").await.unwrap();

        let report = reconcile_backend(&backends, &registry, Backend::WhatsApp)
            .await
            .unwrap();
        assert_eq!(report, ReconcileReport {
            found: 2,
            added: 1,
            total: 2,
        });
    }

    #[tokio::test]
    async fn refuses_when_disconnected_or_missing() {
        let backends = Backends::new().with(Arc::new(FakeChannel::new(Backend::WhatsApp)));
        let registry = MembershipRegistry::in_memory();

        let err = reconcile_backend(&backends, &registry, Backend::WhatsApp)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not connected"));

        let err = reconcile_backend(&backends, &registry, Backend::Telegram)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
