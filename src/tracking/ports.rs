//! Open-port set with per-port stream error log and inbound data queue.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::RemoteError;

struct OpenPort {
    errors: Vec<RemoteError>,
    incoming_tx: mpsc::UnboundedSender<Bytes>,
    /// Handed out once through `take_incoming`.
    incoming_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl OpenPort {
    fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            errors: Vec::new(),
            incoming_tx,
            incoming_rx: Some(incoming_rx),
        }
    }
}

/// Ports currently open on one connection.
#[derive(Default)]
pub struct PortTable {
    ports: HashMap<String, OpenPort>,
}

impl PortTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `port` to the open set. No-op if it is already open.
    pub fn mark_open(&mut self, port: &str) {
        self.ports
            .entry(port.to_string())
            .or_insert_with(OpenPort::new);
    }

    /// Remove `port`, dropping its error log and closing its data queue.
    pub fn mark_closed(&mut self, port: &str) -> bool {
        self.ports.remove(port).is_some()
    }

    /// Membership check.
    pub fn is_open(&self, port: &str) -> bool {
        self.ports.contains_key(port)
    }

    /// Sorted snapshot of the open set.
    pub fn open_ports(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ports.keys().cloned().collect();
        names.sort();
        names
    }

    /// Append an asynchronous error to an open port's log.
    ///
    /// Returns false if the port is not open.
    pub fn push_error(&mut self, port: &str, error: RemoteError) -> bool {
        match self.ports.get_mut(port) {
            Some(state) => {
                state.errors.push(error);
                true
            }
            None => false,
        }
    }

    /// Drain the error log of `port`.
    pub fn take_errors(&mut self, port: &str) -> Vec<RemoteError> {
        self.ports
            .get_mut(port)
            .map(|state| std::mem::take(&mut state.errors))
            .unwrap_or_default()
    }

    /// Number of logged errors for `port`.
    pub fn error_count(&self, port: &str) -> usize {
        self.ports.get(port).map_or(0, |state| state.errors.len())
    }

    /// Queue inbound data for an open port.
    ///
    /// Returns false if the port is not open. Data for a port whose receiver
    /// was dropped by the application is discarded but still counts as
    /// delivered.
    pub fn deliver(&mut self, port: &str, data: Bytes) -> bool {
        match self.ports.get(port) {
            Some(state) => {
                if !data.is_empty() {
                    let _ = state.incoming_tx.send(data);
                }
                true
            }
            None => false,
        }
    }

    /// Take the inbound data receiver of an open port (once per session).
    pub fn take_incoming(&mut self, port: &str) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.ports
            .get_mut(port)
            .and_then(|state| state.incoming_rx.take())
    }

    /// Forget every port.
    pub fn clear(&mut self) -> usize {
        let count = self.ports.len();
        self.ports.clear();
        count
    }
}
