//! Per-backend connection lifecycle.
//!
//! `Disconnected → Pending → Connected → Disconnected`, with a terminal
//! `LoggedOut` state entered when the backend reports a logout. Only an
//! explicit re-authorization leaves `LoggedOut`.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    serde::Serialize,
    thiserror::Error,
    tokio::sync::watch,
    tracing::debug,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Waiting for the external auth handshake (QR scan, token check).
    Pending,
    Connected,
    /// Session was logged out remotely; stays down until re-authorized.
    LoggedOut,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::LoggedOut => "logged out",
        }
    }
}

/// What the surrounding system should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    None,
    /// Run one membership reconciliation after the settle delay.
    ScheduleReconcile(Duration),
    /// Re-enter `Pending` after the backoff.
    Reconnect(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} while connection is {state:?}")]
pub struct TransitionError {
    pub state: ConnectionState,
    pub action: &'static str,
}

/// Pure transition logic, no I/O.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    settle_delay: Duration,
    reconnect_delay: Duration,
}

impl ConnectionMachine {
    pub fn new(settle_delay: Duration, reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            settle_delay,
            reconnect_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Start (or restart) the auth handshake. A repeated call while pending
    /// is accepted, since backends re-issue pairing codes.
    pub fn begin_auth(&mut self) -> Result<Directive, TransitionError> {
        self.transition_from_any_of(
            &[ConnectionState::Disconnected, ConnectionState::Pending],
            ConnectionState::Pending,
            "begin auth",
        )?;
        Ok(Directive::None)
    }

    /// Handshake completed. A backend that resumes a stored session may
    /// report open without a visible pending phase.
    pub fn on_open(&mut self) -> Result<Directive, TransitionError> {
        self.transition_from_any_of(
            &[ConnectionState::Pending, ConnectionState::Disconnected],
            ConnectionState::Connected,
            "open",
        )?;
        Ok(Directive::ScheduleReconcile(self.settle_delay))
    }

    /// Connection dropped. Never fails: closing is valid from every state.
    pub fn on_close(&mut self, logged_out: bool) -> Directive {
        if logged_out || self.state == ConnectionState::LoggedOut {
            self.state = ConnectionState::LoggedOut;
            Directive::None
        } else {
            self.state = ConnectionState::Disconnected;
            Directive::Reconnect(self.reconnect_delay)
        }
    }

    /// Manual re-authorization after a logout.
    pub fn authorize(&mut self) -> Result<Directive, TransitionError> {
        self.transition_from_any_of(
            &[ConnectionState::LoggedOut, ConnectionState::Disconnected],
            ConnectionState::Pending,
            "authorize",
        )?;
        Ok(Directive::None)
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[ConnectionState],
        next: ConnectionState,
        action: &'static str,
    ) -> Result<(), TransitionError> {
        if !expected.contains(&self.state) {
            return Err(TransitionError {
                state: self.state,
                action,
            });
        }
        self.state = next;
        Ok(())
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_secs(5))
    }
}

/// Shared, observable connection state owned by a channel adapter.
///
/// Transitions go through the inner machine; every change is published on a
/// watch channel so readers (status, coordinator) never block the adapter.
#[derive(Clone)]
pub struct ConnectionHandle {
    machine: Arc<Mutex<ConnectionMachine>>,
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionHandle {
    pub fn new(machine: ConnectionMachine) -> Self {
        let (tx, _) = watch::channel(machine.state());
        Self {
            machine: Arc::new(Mutex::new(machine)),
            tx: Arc::new(tx),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub fn begin_auth(&self) -> Result<Directive, TransitionError> {
        self.apply(ConnectionMachine::begin_auth)
    }

    pub fn opened(&self) -> Result<Directive, TransitionError> {
        self.apply(ConnectionMachine::on_open)
    }

    pub fn closed(&self, logged_out: bool) -> Directive {
        let mut machine = self.lock();
        let directive = machine.on_close(logged_out);
        self.publish(machine.state());
        directive
    }

    pub fn authorize(&self) -> Result<Directive, TransitionError> {
        self.apply(ConnectionMachine::authorize)
    }

    fn apply(
        &self,
        f: impl FnOnce(&mut ConnectionMachine) -> Result<Directive, TransitionError>,
    ) -> Result<Directive, TransitionError> {
        let mut machine = self.lock();
        let directive = f(&mut *machine)?;
        self.publish(machine.state());
        Ok(directive)
    }

    fn publish(&self, state: ConnectionState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            debug!(from = previous.label(), to = state.label(), "connection state changed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionMachine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new(ConnectionMachine::default())
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new(Duration::from_secs(3), Duration::from_secs(5))
    }

    #[test]
    fn runs_happy_path_transitions() {
        let mut sm = machine();
        assert_eq!(sm.state(), ConnectionState::Disconnected);

        sm.begin_auth().expect("auth should start");
        assert_eq!(sm.state(), ConnectionState::Pending);

        let directive = sm.on_open().expect("open should work");
        assert_eq!(sm.state(), ConnectionState::Connected);
        assert_eq!(
            directive,
            Directive::ScheduleReconcile(Duration::from_secs(3))
        );

        let directive = sm.on_close(false);
        assert_eq!(sm.state(), ConnectionState::Disconnected);
        assert_eq!(directive, Directive::Reconnect(Duration::from_secs(5)));
    }

    #[test]
    fn logout_is_terminal_until_authorized() {
        let mut sm = machine();
        sm.begin_auth().unwrap();
        sm.on_open().unwrap();

        assert_eq!(sm.on_close(true), Directive::None);
        assert_eq!(sm.state(), ConnectionState::LoggedOut);

        // A later ordinary close does not schedule a reconnect.
        assert_eq!(sm.on_close(false), Directive::None);
        assert_eq!(sm.state(), ConnectionState::LoggedOut);

        let err = sm.begin_auth().expect_err("pending needs re-authorization");
        assert_eq!(err.state, ConnectionState::LoggedOut);
        assert!(sm.on_open().is_err());

        sm.authorize().unwrap();
        assert_eq!(sm.state(), ConnectionState::Pending);
    }

    #[test]
    fn rejects_open_while_connected() {
        let mut sm = machine();
        sm.on_open().unwrap();
        let err = sm.on_open().expect_err("double open");
        assert_eq!(err.action, "open");
    }

    #[test]
    fn pending_accepts_repeated_auth() {
        let mut sm = machine();
        sm.begin_auth().unwrap();
        sm.begin_auth().unwrap();
        assert_eq!(sm.state(), ConnectionState::Pending);
    }

    #[tokio::test]
    async fn handle_publishes_changes() {
        let handle = ConnectionHandle::default();
        let mut rx = handle.subscribe();
        assert!(!handle.is_connected());

        handle.begin_auth().unwrap();
        handle.opened().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
        assert!(handle.is_connected());

        handle.closed(false);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }
}
