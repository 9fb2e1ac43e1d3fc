//! Per-connection tracking tables.
//!
//! Everything the receive loop and the client API share lives in one
//! [`ConnectionState`] behind a `std::sync::Mutex`. The lock is only ever
//! held for table lookups and updates, never across an `.await`.

mod pending;
mod ports;
mod reply;
mod transmissions;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use pending::{HandshakeRegistry, PendingOperations};
pub use ports::PortTable;
pub use reply::PendingReply;
pub(crate) use reply::Registration;
pub use transmissions::{Delivery, Registered, TransmissionTracker};

/// State shared between a connection's tasks and its handles.
pub(crate) type SharedState = Arc<Mutex<ConnectionState>>;

/// All mutable state of one connection.
pub struct ConnectionState {
    /// In-flight OPEN / CLOSE handshakes.
    pub pending: PendingOperations,
    /// Open ports with their error logs and data queues.
    pub ports: PortTable,
    /// Unconfirmed STREAM writes.
    pub transmissions: TransmissionTracker,
    alive: bool,
    next_id: u64,
}

impl ConnectionState {
    /// Fresh state for a live connection.
    pub fn new() -> Self {
        Self {
            pending: PendingOperations::new(),
            ports: PortTable::new(),
            transmissions: TransmissionTracker::new(),
            alive: true,
            next_id: 0,
        }
    }

    /// False once the connection has been torn down.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Unique id for a new registration.
    pub fn next_registration_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Mark the connection dead and fail everything outstanding with
    /// `ConnectionClosed`.
    ///
    /// Returns the number of operations failed. Calling it again is a no-op.
    pub fn teardown(&mut self) -> usize {
        if !self.alive {
            return 0;
        }
        self.alive = false;
        let failed = self.pending.fail_all() + self.transmissions.fail_all();
        self.ports.clear();
        failed
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock the shared state, recovering from a poisoned mutex.
pub(crate) fn lock(state: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
