//! Connection state tracking for the persistent transport.
//!
//! The manager owns a [`StateCell`]; the background connection kernel writes
//! into it and the failover controller reads from it. Every write carries the
//! session generation it belongs to, so an event loop from an old session can
//! never overwrite the state of a newer one.
//!
//! # Examples
//!
//! ```ignore
//! let cell = StateCell::new();
//! let generation = cell.next_generation();
//! cell.set_for(generation, ConnectionState::Connected);
//! assert!(cell.get().is_connected());
//! ```

use std::{fmt, sync::Mutex};

use tokio::sync::watch;
use tracing::info;

/// Lifecycle of the persistent connection.
///
/// - `Disconnected` -> `Connecting` (connect requested, budget available)
/// - `Connecting` -> `Connected` (CONNACK accepted)
/// - `Connecting` -> `Failed` (probe, handshake or settle window failed)
/// - `Connected` -> `Disconnected` (publish error, broker close, teardown)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session. Initial state and the result of every teardown.
    #[default]
    Disconnected,

    /// Handshake in progress; publishes are not attempted.
    Connecting,

    /// The only state in which the persistent transport is used.
    Connected,

    /// The last connection attempt failed, with its reason.
    Failed(String),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Failed(_) => "Failed",
        }
    }

    /// Failure reason for `Failed`, empty otherwise.
    pub fn details(&self) -> String {
        match self {
            ConnectionState::Failed(reason) => reason.clone(),
            _ => String::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

/// Shared, generation-guarded connection state.
///
/// Readers get the latest value through [`StateCell::get`] or a watch
/// receiver. Writers either bump the generation (a new session starts) or
/// write on behalf of a specific generation, which is dropped if stale.
#[derive(Debug)]
pub struct StateCell {
    generation: Mutex<u64>,
    tx: watch::Sender<ConnectionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            generation: Mutex::new(0),
            tx,
        }
    }

    /// Current state snapshot.
    pub fn get(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        *self.lock_generation()
    }

    /// Starts a new session and returns its generation.
    ///
    /// Writes tagged with any earlier generation are ignored from now on.
    pub fn next_generation(&self) -> u64 {
        let mut generation = self.lock_generation();
        *generation += 1;
        *generation
    }

    /// Unconditional write for the owner of the cell.
    pub fn set(&self, state: ConnectionState) {
        let _guard = self.lock_generation();
        self.publish(state);
    }

    /// Writes `state` only while `generation` is still the current session.
    ///
    /// Returns false when the write was dropped as stale.
    pub fn set_for(&self, generation: u64, state: ConnectionState) -> bool {
        let guard = self.lock_generation();
        if *guard != generation {
            return false;
        }
        self.publish(state);
        true
    }

    fn publish(&self, state: ConnectionState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state.clone();
            true
        });
        if changed {
            info!("Connection state changed to: {}", state);
        }
    }

    // A poisoned lock still holds a valid counter.
    fn lock_generation(&self) -> std::sync::MutexGuard<'_, u64> {
        self.generation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_as_str() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.as_str(), "Connecting");
        assert_eq!(ConnectionState::Connected.as_str(), "Connected");
        assert_eq!(ConnectionState::Failed("x".into()).as_str(), "Failed");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(
            ConnectionState::Failed("probe timed out".into()).to_string(),
            "Failed (probe timed out)"
        );
    }

    #[test]
    fn test_is_connected_only_when_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Failed("e".into()).is_connected());
    }

    #[test]
    fn test_cell_starts_disconnected() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ConnectionState::Disconnected);
        assert_eq!(cell.generation(), 0);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let cell = StateCell::new();
        let old = cell.next_generation();
        assert!(cell.set_for(old, ConnectionState::Connected));

        let current = cell.next_generation();
        cell.set(ConnectionState::Connecting);

        assert!(!cell.set_for(old, ConnectionState::Disconnected));
        assert_eq!(cell.get(), ConnectionState::Connecting);

        assert!(cell.set_for(current, ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();

        cell.set(ConnectionState::Connecting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);
    }
}
