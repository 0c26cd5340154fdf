//! Connection state machine.
//!
//! ```text
//! Connecting ──► Connected ──► Disconnecting ──► Disconnected
//!      │                            ▲
//!      └────────────────────────────┘
//! ```
//!
//! `Disconnected` is terminal.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Socket is open, connect hook not yet accepted.
    Connecting,
    /// Ready for traffic.
    Connected,
    /// Close requested or fatal error seen; resources being released.
    Disconnecting,
    /// Socket closed and pending requests resolved.
    Disconnected,
}

impl ConnectionState {
    /// Whether frames may still be sent in this state.
    #[inline]
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Observable state cell with atomic transitions.
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Connecting);
        Self { tx }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `to` if the current state is one of `from`.
    ///
    /// Returns the state that was replaced, or `None` if no transition
    /// happened.
    pub(crate) fn transition(
        &self,
        from: &[ConnectionState],
        to: ConnectionState,
    ) -> Option<ConnectionState> {
        let mut previous = None;
        self.tx.send_if_modified(|state| {
            if from.contains(state) {
                previous = Some(*state);
                *state = to;
                true
            } else {
                false
            }
        });
        previous
    }

    /// Wait until the state satisfies `pred`.
    pub(crate) async fn wait_for(&self, pred: impl FnMut(&ConnectionState) -> bool) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(pred).await;
    }
}
