//! Stream-confirmation tracker.
//!
//! Every outbound STREAM frame carries a transaction id allocated here. The
//! peer first acknowledges reception with RX_CONFIRM and then reports the
//! data as written to the serial port with TX_CONFIRM, which resolves the
//! pending write.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::{Result, SerialWireError};

/// Outcome of a confirmed STREAM write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Port the data was written to.
    pub port: String,
    /// Transaction id of the STREAM frame.
    pub txid: u32,
    /// Number of data bytes in the frame.
    pub len: usize,
    /// Whether the peer sent RX_CONFIRM before TX_CONFIRM.
    pub rx_confirmed: bool,
}

struct PendingTransmission {
    id: u64,
    len: usize,
    rx_confirmed: bool,
    tx: oneshot::Sender<Result<Delivery>>,
}

#[derive(Default)]
struct PortTransmissions {
    next_txid: u32,
    pending: HashMap<u32, PendingTransmission>,
}

impl PortTransmissions {
    /// Next id not used by an unconfirmed transmission, wrapping at u32::MAX.
    fn allocate(&mut self) -> Option<u32> {
        // Bounded: at most pending.len() ids can be skipped
        for _ in 0..=self.pending.len() {
            let txid = self.next_txid;
            self.next_txid = self.next_txid.wrapping_add(1);
            if !self.pending.contains_key(&txid) {
                return Some(txid);
            }
        }
        None
    }
}

/// A registered transmission waiting for confirmation.
pub struct Registered {
    /// Allocated transaction id.
    pub txid: u32,
    /// Receiver resolved on TX_CONFIRM or failure.
    pub rx: oneshot::Receiver<Result<Delivery>>,
}

/// Pending STREAM writes keyed by port and transaction id.
#[derive(Default)]
pub struct TransmissionTracker {
    ports: HashMap<String, PortTransmissions>,
}

impl TransmissionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a transaction id for `port` and register the write.
    pub fn register(&mut self, port: &str, len: usize, id: u64) -> Result<Registered> {
        let entry = self.ports.entry(port.to_string()).or_default();
        let txid = entry.allocate().ok_or_else(|| {
            SerialWireError::Protocol(format!("No free transaction id for port {}", port))
        })?;

        let (tx, rx) = oneshot::channel();
        entry.pending.insert(
            txid,
            PendingTransmission {
                id,
                len,
                rx_confirmed: false,
                tx,
            },
        );
        Ok(Registered { txid, rx })
    }

    /// Handle TX_CONFIRM: resolve and remove the transmission.
    ///
    /// Returns false for a stray confirmation.
    pub fn confirm_tx(&mut self, port: &str, txid: u32) -> bool {
        let Some(entry) = self.ports.get_mut(port) else {
            return false;
        };
        let Some(pending) = entry.pending.remove(&txid) else {
            return false;
        };
        let _ = pending.tx.send(Ok(Delivery {
            port: port.to_string(),
            txid,
            len: pending.len,
            rx_confirmed: pending.rx_confirmed,
        }));
        true
    }

    /// Handle RX_CONFIRM: mark the transmission as received by the peer.
    ///
    /// Returns false for a stray confirmation.
    pub fn confirm_rx(&mut self, port: &str, txid: u32) -> bool {
        match self
            .ports
            .get_mut(port)
            .and_then(|entry| entry.pending.get_mut(&txid))
        {
            Some(pending) => {
                pending.rx_confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Fail a transmission with `Timeout` if it still belongs to
    /// registration `id`.
    pub fn expire(&mut self, port: &str, txid: u32, id: u64) -> bool {
        let Some(entry) = self.ports.get_mut(port) else {
            return false;
        };
        if !entry.pending.get(&txid).is_some_and(|p| p.id == id) {
            return false;
        }
        if let Some(pending) = entry.pending.remove(&txid) {
            let _ = pending.tx.send(Err(SerialWireError::Timeout));
        }
        true
    }

    /// Fail all transmissions of `port` with `PortClosed` and forget the
    /// port's id counter.
    pub fn fail_port(&mut self, port: &str) -> usize {
        match self.ports.remove(port) {
            Some(mut entry) => {
                let count = entry.pending.len();
                for (_, pending) in entry.pending.drain() {
                    let _ = pending
                        .tx
                        .send(Err(SerialWireError::PortClosed(port.to_string())));
                }
                count
            }
            None => 0,
        }
    }

    /// Fail every transmission with `ConnectionClosed`.
    pub fn fail_all(&mut self) -> usize {
        let mut count = 0;
        for (_, mut entry) in self.ports.drain() {
            count += entry.pending.len();
            for (_, pending) in entry.pending.drain() {
                let _ = pending.tx.send(Err(SerialWireError::ConnectionClosed));
            }
        }
        count
    }

    /// Number of unconfirmed transmissions for `port`.
    pub fn pending_count(&self, port: &str) -> usize {
        self.ports.get(port).map_or(0, |entry| entry.pending.len())
    }

    #[cfg(test)]
    fn set_next_txid(&mut self, port: &str, txid: u32) {
        self.ports.entry(port.to_string()).or_default().next_txid = txid;
    }
}
