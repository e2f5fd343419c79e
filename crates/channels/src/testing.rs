//! In-memory channel that records every send, for tests across the workspace.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    herald_common::{Backend, MediaPayload, MessageKind},
    tokio::time::Instant,
    tokio_util::sync::CancellationToken,
};

use crate::{
    error::ChannelError,
    events::EventSender,
    plugin::{
        ChannelHealthSnapshot, ChannelMembership, ChannelOutbound, ChannelPlugin, ChannelStatus,
        MembershipEntry,
    },
    state::{ConnectionHandle, ConnectionMachine},
};

/// One recorded outbound send.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub to: String,
    pub kind: MessageKind,
    /// Text body for text sends, caption for media sends.
    pub text: String,
    pub media_len: Option<usize>,
    pub mime_type: Option<String>,
    pub at: Instant,
}

#[derive(Default)]
struct Inner {
    sent: Vec<SentMessage>,
    attempts: HashMap<String, u32>,
    /// Remaining forced failures per recipient; `u32::MAX` fails forever.
    failures: HashMap<String, u32>,
    memberships: Option<Vec<MembershipEntry>>,
    probe_error: Option<String>,
}

/// Recording fake implementing every channel capability.
pub struct FakeChannel {
    backend: Backend,
    connection: ConnectionHandle,
    inner: Mutex<Inner>,
    resets: AtomicUsize,
    starts: AtomicUsize,
}

impl FakeChannel {
    /// A fake in the `Disconnected` state.
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            connection: ConnectionHandle::new(ConnectionMachine::default()),
            inner: Mutex::new(Inner::default()),
            resets: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
        }
    }

    /// A fake that is already connected.
    pub fn connected(backend: Backend) -> Self {
        let fake = Self::new(backend);
        fake.set_connected(true);
        fake
    }

    pub fn set_connected(&self, connected: bool) {
        if connected {
            if !self.connection.is_connected() {
                let _ = self.connection.opened();
            }
        } else {
            self.connection.closed(false);
        }
    }

    /// Fail every send to `id`.
    pub fn fail_always(&self, id: &str) {
        self.lock().failures.insert(id.to_string(), u32::MAX);
    }

    /// Fail the next `times` sends to `id`, then succeed.
    pub fn fail_times(&self, id: &str, times: u32) {
        self.lock().failures.insert(id.to_string(), times);
    }

    /// Enable live membership listing with the given chats.
    pub fn set_memberships<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().memberships = Some(
            ids.into_iter()
                .map(|id| MembershipEntry {
                    id: id.into(),
                    title: None,
                })
                .collect(),
        );
    }

    pub fn fail_probe(&self, error: &str) {
        self.lock().probe_error = Some(error.to_string());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// Successful sends addressed to `id`.
    pub fn sent_to(&self, id: &str) -> Vec<SentMessage> {
        self.lock()
            .sent
            .iter()
            .filter(|m| m.to == id)
            .cloned()
            .collect()
    }

    /// Attempts made for `id`, successful or not.
    pub fn attempts(&self, id: &str) -> u32 {
        self.lock().attempts.get(id).copied().unwrap_or(0)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(
        &self,
        to: &str,
        kind: MessageKind,
        text: &str,
        media: Option<&MediaPayload>,
    ) -> Result<()> {
        let mut inner = self.lock();
        *inner.attempts.entry(to.to_string()).or_default() += 1;

        if let Some(remaining) = inner.failures.get_mut(to)
            && *remaining > 0
        {
            if *remaining != u32::MAX {
                *remaining -= 1;
            }
            bail!("simulated send failure to {to}");
        }

        inner.sent.push(SentMessage {
            to: to.to_string(),
            kind,
            text: text.to_string(),
            media_len: media.map(MediaPayload::len),
            mime_type: media.map(|m| m.mime_type.clone()),
            at: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl ChannelPlugin for FakeChannel {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    fn outbound(&self) -> &dyn ChannelOutbound {
        self
    }

    fn membership(&self) -> Option<&dyn ChannelMembership> {
        if self.lock().memberships.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn status(&self) -> &dyn ChannelStatus {
        self
    }

    async fn start(&self, _events: EventSender, _shutdown: CancellationToken) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reset_session(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.connection.closed(true);
        Ok(())
    }
}

#[async_trait]
impl ChannelOutbound for FakeChannel {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        if !self.connection.is_connected() {
            return Err(ChannelError::NotConnected(self.backend).into());
        }
        self.record(to, MessageKind::Text, text, None)
    }

    async fn send_media(
        &self,
        to: &str,
        kind: MessageKind,
        media: &MediaPayload,
        caption: &str,
    ) -> Result<()> {
        if !self.connection.is_connected() {
            return Err(ChannelError::NotConnected(self.backend).into());
        }
        self.record(to, kind, caption, Some(media))
    }
}

#[async_trait]
impl ChannelMembership for FakeChannel {
    async fn fetch_memberships(&self) -> Result<Vec<MembershipEntry>> {
        match self.lock().memberships.clone() {
            Some(entries) => Ok(entries),
            None => Err(ChannelError::Unsupported {
                backend: self.backend,
                what: "membership listing",
            }
            .into()),
        }
    }
}

#[async_trait]
impl ChannelStatus for FakeChannel {
    async fn probe(&self) -> Result<ChannelHealthSnapshot> {
        if let Some(err) = self.lock().probe_error.clone() {
            bail!(err);
        }
        Ok(ChannelHealthSnapshot {
            connected: self.connection.is_connected(),
            account_id: Some(format!("fake-{}", self.backend.id())),
            details: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_times_recovers() {
        let fake = FakeChannel::connected(Backend::Telegram);
        fake.fail_times("1", 1);

        assert!(fake.send_text("1", "hi").await.is_err());
        fake.send_text("1", "hi").await.unwrap();

        assert_eq!(fake.attempts("1"), 2);
        assert_eq!(fake.sent_to("1").len(), 1);
    }

    #[tokio::test]
    async fn disconnected_fake_refuses_sends() {
        let fake = FakeChannel::new(Backend::WhatsApp);
        let err = fake.send_text("g", "hi").await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
        assert_eq!(fake.attempts("g"), 0);
    }

    #[tokio::test]
    async fn membership_listing_is_opt_in() {
        let fake = FakeChannel::connected(Backend::WhatsApp);
        assert!(fake.membership().is_none());

        fake.set_memberships(["g1", "g2"]);
        let entries = fake.membership().unwrap().fetch_memberships().await.unwrap();
        assert_eq!(entries.len(), 2);
    }
}
