//! Observable connection state for the broker and storage connectors.

use std::fmt;

use tokio::sync::watch;

// ---

/// Lifecycle of a connection to an external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    FailedPermanently,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::FailedPermanently => "failed-permanently",
        };
        f.write_str(s)
    }
}

/// Owned by one connector; everyone else only gets a receiver.
///
/// Transitions are logged so they show up alongside message handling, but
/// setting the same state twice is silent.
#[derive(Debug)]
pub struct StateCell {
    // ---
    name: &'static str,
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    // ---
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { name, tx }
    }

    pub fn set(&self, next: ConnectionState) {
        // ---
        let previous = self.tx.send_replace(next);
        if previous != next {
            tracing::info!(connection = self.name, from = %previous, to = %next, "connection state changed");
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}
