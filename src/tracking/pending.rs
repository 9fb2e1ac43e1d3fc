//! Pending OPEN / CLOSE handshakes.
//!
//! At most one handshake of each kind may be in flight per port. Every
//! registration gets a unique id so that a timed out handle can only remove
//! its own entry, never a newer one registered under the same port name.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::{OperationKind, Result, SerialWireError};

struct PendingEntry<T> {
    id: u64,
    tx: oneshot::Sender<Result<T>>,
}

/// Registry of one kind of handshake, keyed by port name.
pub struct HandshakeRegistry<T> {
    kind: OperationKind,
    entries: HashMap<String, PendingEntry<T>>,
}

impl<T> HandshakeRegistry<T> {
    /// Create an empty registry for `kind` handshakes.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Register a handshake for `port` under registration id `id`.
    ///
    /// Fails with `OperationAlreadyPending` if one is already in flight.
    pub fn register(&mut self, port: &str, id: u64) -> Result<oneshot::Receiver<Result<T>>> {
        if self.entries.contains_key(port) {
            return Err(SerialWireError::OperationAlreadyPending {
                port: port.to_string(),
                kind: self.kind,
            });
        }
        let (tx, rx) = oneshot::channel();
        self.entries.insert(port.to_string(), PendingEntry { id, tx });
        Ok(rx)
    }

    /// Whether a handshake is pending for `port`.
    pub fn contains(&self, port: &str) -> bool {
        self.entries.contains_key(port)
    }

    /// Resolve and remove the handshake for `port`.
    ///
    /// Returns false if nothing was pending.
    pub fn resolve(&mut self, port: &str, result: Result<T>) -> bool {
        match self.entries.remove(port) {
            Some(entry) => {
                // The waiter may have been dropped already
                let _ = entry.tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Fail the entry for `port` with `Timeout` if it still belongs to
    /// registration `id`.
    pub fn expire(&mut self, port: &str, id: u64) -> bool {
        if !self.entries.get(port).is_some_and(|entry| entry.id == id) {
            return false;
        }
        if let Some(entry) = self.entries.remove(port) {
            let _ = entry.tx.send(Err(SerialWireError::Timeout));
        }
        true
    }

    /// Fail every pending handshake, returning how many were failed.
    pub fn fail_all(&mut self, make_error: impl Fn() -> SerialWireError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.tx.send(Err(make_error()));
        }
        count
    }

    /// Number of pending handshakes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Pending OPEN and CLOSE handshakes of one connection.
pub struct PendingOperations {
    /// Pending OPEN requests, resolved with `true` on OPENED and `false` on ERROR.
    pub opens: HandshakeRegistry<bool>,
    /// Pending CLOSE requests.
    pub closes: HandshakeRegistry<()>,
}

impl PendingOperations {
    /// Create empty registries.
    pub fn new() -> Self {
        Self {
            opens: HandshakeRegistry::new(OperationKind::Open),
            closes: HandshakeRegistry::new(OperationKind::Close),
        }
    }

    /// Time out the entry of registration `id` for `port`.
    pub fn expire(&mut self, kind: OperationKind, port: &str, id: u64) -> bool {
        match kind {
            OperationKind::Open => self.opens.expire(port, id),
            OperationKind::Close => self.closes.expire(port, id),
        }
    }

    /// Fail everything with `ConnectionClosed`.
    pub fn fail_all(&mut self) -> usize {
        self.opens.fail_all(|| SerialWireError::ConnectionClosed)
            + self.closes.fail_all(|| SerialWireError::ConnectionClosed)
    }

    /// Total number of pending handshakes.
    pub fn len(&self) -> usize {
        self.opens.len() + self.closes.len()
    }
}

impl Default for PendingOperations {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_registration_rejected() {
        let mut ops = PendingOperations::new();
        let _rx = ops.opens.register("COM5", 1).unwrap();

        let err = ops.opens.register("COM5", 2).unwrap_err();
        assert!(matches!(
            err,
            SerialWireError::OperationAlreadyPending {
                kind: OperationKind::Open,
                ..
            }
        ));

        // Other kinds and other ports are independent
        assert!(ops.closes.register("COM5", 3).is_ok());
        assert!(ops.opens.register("COM6", 4).is_ok());
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn test_resolve_delivers_result() {
        let mut ops = PendingOperations::new();
        let mut rx = ops.opens.register("COM5", 1).unwrap();

        assert!(ops.opens.resolve("COM5", Ok(true)));
        assert!(matches!(rx.try_recv(), Ok(Ok(true))));
        assert!(!ops.opens.contains("COM5"));

        // Second reply finds nothing
        assert!(!ops.opens.resolve("COM5", Ok(false)));
    }

    #[test]
    fn test_expire_only_removes_own_registration() {
        let mut ops = PendingOperations::new();
        let mut old = ops.closes.register("COM5", 1).unwrap();
        assert!(ops.expire(OperationKind::Close, "COM5", 1));
        assert!(matches!(old.try_recv(), Ok(Err(SerialWireError::Timeout))));

        let _new = ops.closes.register("COM5", 2).unwrap();
        assert!(!ops.expire(OperationKind::Close, "COM5", 1));
        assert!(ops.closes.contains("COM5"));
    }

    #[test]
    fn test_fail_all() {
        let mut ops = PendingOperations::new();
        let mut open = ops.opens.register("COM1", 1).unwrap();
        let mut close = ops.closes.register("COM2", 2).unwrap();

        assert_eq!(ops.fail_all(), 2);
        assert!(matches!(
            open.try_recv(),
            Ok(Err(SerialWireError::ConnectionClosed))
        ));
        assert!(matches!(
            close.try_recv(),
            Ok(Err(SerialWireError::ConnectionClosed))
        ));
        assert_eq!(ops.len(), 0);
    }
}
