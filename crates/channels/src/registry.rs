use std::{collections::BTreeMap, sync::Arc};

use herald_common::Backend;

use crate::{
    error::ChannelError,
    plugin::ChannelPlugin,
    state::ConnectionState,
};

/// The configured channel adapters, keyed by backend.
///
/// A backend that is disabled or unconfigured is simply absent; callers treat
/// that the same as a disconnected backend.
#[derive(Clone, Default)]
pub struct Backends {
    plugins: BTreeMap<Backend, Arc<dyn ChannelPlugin>>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn ChannelPlugin>) {
        self.plugins.insert(plugin.backend(), plugin);
    }

    pub fn with(mut self, plugin: Arc<dyn ChannelPlugin>) -> Self {
        self.register(plugin);
        self
    }

    pub fn get(&self, backend: Backend) -> Option<&Arc<dyn ChannelPlugin>> {
        self.plugins.get(&backend)
    }

    /// The adapter for `backend`, or `NotConfigured`.
    pub fn require(&self, backend: Backend) -> Result<&Arc<dyn ChannelPlugin>, ChannelError> {
        self.get(backend).ok_or(ChannelError::NotConfigured(backend))
    }

    /// The adapter for `backend` if it is currently connected.
    pub fn connected(&self, backend: Backend) -> Option<&Arc<dyn ChannelPlugin>> {
        self.get(backend).filter(|p| p.is_connected())
    }

    pub fn is_connected(&self, backend: Backend) -> bool {
        self.connected(backend).is_some()
    }

    /// Connection state, `None` when the backend is not configured.
    pub fn state(&self, backend: Backend) -> Option<ConnectionState> {
        self.get(backend).map(|p| p.connection().state())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChannelPlugin>> {
        self.plugins.values()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.plugins.keys()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, crate::testing::FakeChannel};

    #[test]
    fn missing_backend_is_not_configured() {
        let backends = Backends::new().with(Arc::new(FakeChannel::connected(Backend::Telegram)));

        assert!(backends.is_connected(Backend::Telegram));
        assert!(!backends.is_connected(Backend::WhatsApp));
        assert!(backends.state(Backend::WhatsApp).is_none());
        assert!(matches!(
            backends.require(Backend::WhatsApp),
            Err(ChannelError::NotConfigured(Backend::WhatsApp))
        ));
    }

    #[test]
    fn disconnected_backend_is_skipped() {
        let backends = Backends::new().with(Arc::new(FakeChannel::new(Backend::WhatsApp)));
        assert!(backends.get(Backend::WhatsApp).is_some());
        assert!(backends.connected(Backend::WhatsApp).is_none());
        assert_eq!(
            backends.state(Backend::WhatsApp),
            Some(ConnectionState::Disconnected)
        );
    }
}
