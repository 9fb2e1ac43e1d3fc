//! Completion handle for requests awaiting a reply from the peer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{lock, SharedState};
use crate::error::{OperationKind, Result, SerialWireError};

#[derive(Clone)]
enum RegistrationKey {
    Handshake {
        kind: OperationKind,
        port: String,
        id: u64,
    },
    Transmission {
        port: String,
        txid: u32,
        id: u64,
    },
}

/// A table entry owned by a [`PendingReply`].
///
/// Releasing it times the entry out only if it still carries the same
/// registration id, so a stale handle never touches a newer request.
#[derive(Clone)]
pub(crate) struct Registration {
    state: SharedState,
    key: RegistrationKey,
}

impl Registration {
    pub(crate) fn handshake(state: &SharedState, kind: OperationKind, port: &str, id: u64) -> Self {
        Self {
            state: Arc::clone(state),
            key: RegistrationKey::Handshake {
                kind,
                port: port.to_string(),
                id,
            },
        }
    }

    pub(crate) fn transmission(state: &SharedState, port: &str, txid: u32, id: u64) -> Self {
        Self {
            state: Arc::clone(state),
            key: RegistrationKey::Transmission {
                port: port.to_string(),
                txid,
                id,
            },
        }
    }

    /// Time the entry out. Returns false if a reply or teardown got there first.
    fn release(&self) -> bool {
        let mut state = lock(&self.state);
        match &self.key {
            RegistrationKey::Handshake { kind, port, id } => state.pending.expire(*kind, port, *id),
            RegistrationKey::Transmission { port, txid, id } => {
                state.transmissions.expire(port, *txid, *id)
            }
        }
    }
}

/// Handle to an outstanding request.
///
/// Obtained from the `request_*` methods of a connection. The deadline runs
/// from registration whether or not anyone waits: once it passes the request
/// is forgotten and a late reply has no effect. Dropping the handle
/// withdraws the request early.
pub struct PendingReply<T> {
    rx: Option<oneshot::Receiver<Result<T>>>,
    ready: Option<T>,
    deadline: Instant,
    registration: Option<Registration>,
    expiry: Option<JoinHandle<()>>,
}

impl<T> PendingReply<T> {
    /// Track a registered request that expires `timeout` from now.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn new(
        rx: oneshot::Receiver<Result<T>>,
        timeout: Duration,
        registration: Registration,
    ) -> Self {
        let deadline = Instant::now() + timeout;
        let expiring = registration.clone();
        let expiry = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            expiring.release();
        });
        Self {
            rx: Some(rx),
            ready: None,
            deadline,
            registration: Some(registration),
            expiry: Some(expiry),
        }
    }

    /// A reply that is already known without asking the peer.
    pub(crate) fn resolved(value: T) -> Self {
        Self {
            rx: None,
            ready: Some(value),
            deadline: Instant::now(),
            registration: None,
            expiry: None,
        }
    }

    /// True if the result was known when the request was made.
    pub fn is_resolved(&self) -> bool {
        self.ready.is_some()
    }

    /// Point in time after which the request fails with `Timeout`.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the reply.
    ///
    /// Fails with `Timeout` if nothing arrived before the deadline.
    pub async fn wait(mut self) -> Result<T> {
        if let Some(value) = self.ready.take() {
            return Ok(value);
        }
        let Some(mut rx) = self.rx.take() else {
            return Err(SerialWireError::ConnectionClosed);
        };

        match tokio::time::timeout_at(self.deadline, &mut rx).await {
            Ok(result) => {
                // Whoever sent the result already removed the entry
                self.registration = None;
                result.unwrap_or(Err(SerialWireError::ConnectionClosed))
            }
            Err(_) => {
                let expired = self
                    .registration
                    .take()
                    .map_or(true, |registration| registration.release());
                if expired {
                    return Err(SerialWireError::Timeout);
                }
                // Lost the race: the result was sent while the entry was locked
                rx.try_recv().unwrap_or(Err(SerialWireError::Timeout))
            }
        }
    }
}

impl<T> Drop for PendingReply<T> {
    fn drop(&mut self) {
        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
        if let Some(registration) = self.registration.take() {
            registration.release();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PendingReply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("ready", &self.ready)
            .field("deadline", &self.deadline)
            .field("registered", &self.registration.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::tracking::ConnectionState;

    fn shared() -> SharedState {
        Arc::new(Mutex::new(ConnectionState::new()))
    }

    fn pending_open(state: &SharedState, port: &str, timeout: Duration) -> PendingReply<bool> {
        let mut guard = lock(state);
        let id = guard.next_registration_id();
        let rx = guard.pending.opens.register(port, id).unwrap();
        drop(guard);
        PendingReply::new(
            rx,
            timeout,
            Registration::handshake(state, OperationKind::Open, port, id),
        )
    }

    #[tokio::test]
    async fn test_resolved_reply() {
        let reply = PendingReply::resolved(true);
        assert!(reply.is_resolved());
        assert!(reply.wait().await.unwrap());
    }

    #[tokio::test]
    async fn test_reply_delivered() {
        let state = shared();
        let reply = pending_open(&state, "COM5", Duration::from_secs(1));

        assert!(lock(&state).pending.opens.resolve("COM5", Ok(true)));
        assert!(reply.wait().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let state = shared();
        let reply = pending_open(&state, "COM5", Duration::from_millis(50));

        assert!(matches!(reply.wait().await, Err(SerialWireError::Timeout)));

        let mut guard = lock(&state);
        assert!(!guard.pending.opens.contains("COM5"));
        // Late reply finds nothing
        assert!(!guard.pending.opens.resolve("COM5", Ok(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_runs_without_waiter() {
        let state = shared();
        let reply = pending_open(&state, "COM5", Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;

        {
            let mut guard = lock(&state);
            assert!(!guard.pending.opens.contains("COM5"));
            assert!(!guard.pending.opens.resolve("COM5", Ok(true)));
        }
        assert!(matches!(reply.wait().await, Err(SerialWireError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_set_at_registration() {
        let state = shared();
        let reply = pending_open(&state, "COM5", Duration::from_millis(50));
        let deadline = reply.deadline();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(reply.deadline(), deadline);
        assert!(matches!(reply.wait().await, Err(SerialWireError::Timeout)));
        assert!(Instant::now() < deadline + Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_drop_withdraws_request() {
        let state = shared();
        let reply = pending_open(&state, "COM5", Duration::from_secs(1));
        assert!(lock(&state).pending.opens.contains("COM5"));

        drop(reply);
        assert!(!lock(&state).pending.opens.contains("COM5"));
    }

    #[tokio::test]
    async fn test_stale_handle_leaves_new_registration() {
        let state = shared();
        let old = pending_open(&state, "COM5", Duration::from_secs(1));
        assert!(lock(&state).pending.opens.resolve("COM5", Ok(false)));

        let _new = pending_open(&state, "COM5", Duration::from_secs(1));
        assert!(!old.wait().await.unwrap());
        assert!(lock(&state).pending.opens.contains("COM5"));
    }

    #[tokio::test]
    async fn test_teardown_fails_reply() {
        let state = shared();
        let reply = pending_open(&state, "COM5", Duration::from_secs(1));

        lock(&state).teardown();
        assert!(matches!(
            reply.wait().await,
            Err(SerialWireError::ConnectionClosed)
        ));
    }
}
