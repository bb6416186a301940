//! Four-state connection machine: `Disconnected -> Connecting -> Ready`,
//! with `Error` reachable from `Connecting` or `Ready` and a bounded number
//! of retries back into `Connecting`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use mcpup_transport::TransportKind;
use parking_lot::RwLock;

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Error,
}

/// Read-only snapshot of one server's connection state, cheap to clone and
/// safe to hand to observers off the lock.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub server_name: String,
    pub state: ConnectionState,
    pub transport_kind: Option<TransportKind>,
    pub reported_server_name: Option<String>,
    pub reported_server_version: Option<String>,
    pub last_error: Option<String>,
    pub connected_at_unix_ms: Option<u128>,
    pub retry_count: u32,
}

impl ConnectionInfo {
    fn new(server_name: String) -> Self {
        Self {
            server_name,
            state: ConnectionState::Disconnected,
            transport_kind: None,
            reported_server_name: None,
            reported_server_version: None,
            last_error: None,
            connected_at_unix_ms: None,
            retry_count: 0,
        }
    }
}

type Observer = Arc<dyn Fn(ConnectionInfo) + Send + Sync>;

/// One `parking_lot::RwLock<ConnectionInfo>` per upstream, matching the
/// state-snapshot lock placement used across this subsystem. Observers are
/// invoked from a detached task, never inline on the notifying path, so a
/// slow or panicking callback can't block a connect/disconnect in progress.
pub struct StateManager {
    inner: RwLock<ConnectionInfo>,
    observers: RwLock<Vec<Observer>>,
}

impl StateManager {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(ConnectionInfo::new(server_name.into())),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> ConnectionInfo {
        self.inner.read().clone()
    }

    pub fn on_change(&self, observer: Observer) {
        self.observers.write().push(observer);
    }

    pub fn transition_connecting(&self) {
        self.mutate(|info| {
            info.state = ConnectionState::Connecting;
        });
    }

    pub fn transition_ready(&self, kind: TransportKind, server_name: String, server_version: String) {
        self.mutate(|info| {
            info.state = ConnectionState::Ready;
            info.transport_kind = Some(kind);
            info.reported_server_name = Some(server_name.clone());
            info.reported_server_version = Some(server_version.clone());
            info.last_error = None;
            info.connected_at_unix_ms = Some(now_ms());
            info.retry_count = 0;
        });
    }

    pub fn transition_error(&self, message: String) {
        self.mutate(|info| {
            info.state = ConnectionState::Error;
            info.last_error = Some(message);
            info.retry_count += 1;
        });
    }

    pub fn transition_disconnected(&self) {
        self.mutate(|info| {
            *info = ConnectionInfo::new(info.server_name.clone());
        });
    }

    /// Whether a fresh `Connecting` attempt is warranted from the current
    /// `Error` state, bounded to avoid retrying a permanently broken
    /// upstream forever.
    pub fn should_retry(&self) -> bool {
        let info = self.inner.read();
        info.state == ConnectionState::Error && info.retry_count < MAX_RETRIES
    }

    fn mutate(&self, f: impl FnOnce(&mut ConnectionInfo)) {
        let snapshot = {
            let mut guard = self.inner.write();
            f(&mut guard);
            guard.clone()
        };
        let observers = self.observers.read().clone();
        if observers.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for observer in observers {
                observer(snapshot.clone());
            }
        });
    }
}

fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let manager = StateManager::new("srv");
        assert_eq!(manager.snapshot().state, ConnectionState::Disconnected);
    }

    #[test]
    fn ready_clears_error_and_resets_retry_count() {
        let manager = StateManager::new("srv");
        manager.transition_connecting();
        manager.transition_error("boom".to_string());
        assert_eq!(manager.snapshot().retry_count, 1);
        manager.transition_ready(TransportKind::Stdio, "srv".to_string(), "1.0".to_string());
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Ready);
        assert_eq!(snapshot.retry_count, 0);
        assert!(snapshot.last_error.is_none());
    }

    #[test]
    fn should_retry_false_once_max_retries_hit() {
        let manager = StateManager::new("srv");
        for _ in 0..MAX_RETRIES {
            manager.transition_error("boom".to_string());
        }
        assert!(!manager.should_retry());
    }

    #[test]
    fn disconnected_resets_to_fresh_state() {
        let manager = StateManager::new("srv");
        manager.transition_ready(TransportKind::Http, "srv".to_string(), "2.0".to_string());
        manager.transition_disconnected();
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.transport_kind.is_none());
    }
}
