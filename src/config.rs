//! Connection configuration.
//!
//! Every field has a default, so a config file only needs to name the
//! values it changes:
//!
//! ```
//! use serialwire_client::ConnectionConfig;
//!
//! let config = ConnectionConfig::from_json_str(r#"{ "reply_timeout_ms": 2500 }"#).unwrap();
//! assert_eq!(config.reply_timeout().as_millis(), 2500);
//! assert!(config.confirm_inbound);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SerialWireError};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_MAX_PENDING_FRAMES,
};

/// Default time to wait for OPENED / CLOSED / ERROR.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Default time to wait for TX_CONFIRM.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables of one connection. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Deadline for OPEN and CLOSE handshakes.
    pub reply_timeout_ms: u64,
    /// Deadline for a STREAM write to be confirmed.
    pub confirm_timeout_ms: u64,
    /// Answer inbound STREAM frames with RX_CONFIRM.
    pub confirm_inbound: bool,
    /// Largest accepted inbound payload.
    pub max_payload_size: u32,
    /// Queued outbound frames before writes wait.
    pub max_pending_frames: usize,
    /// Capacity of the writer channel.
    pub channel_capacity: usize,
    /// How long a write may wait on a full queue.
    pub backpressure_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: millis(DEFAULT_REPLY_TIMEOUT),
            confirm_timeout_ms: millis(DEFAULT_CONFIRM_TIMEOUT),
            confirm_inbound: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: millis(DEFAULT_BACKPRESSURE_TIMEOUT),
        }
    }
}

impl ConnectionConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the connection cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(SerialWireError::InvalidConfig(
                "channel_capacity must be greater than 0".into(),
            ));
        }
        if self.max_pending_frames == 0 {
            return Err(SerialWireError::InvalidConfig(
                "max_pending_frames must be greater than 0".into(),
            ));
        }
        if self.max_payload_size == 0 {
            return Err(SerialWireError::InvalidConfig(
                "max_payload_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Handshake deadline.
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Write confirmation deadline.
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    /// Backpressure deadline.
    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }

    /// Settings for the writer task.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_pending_frames: self.max_pending_frames,
            channel_capacity: self.channel_capacity,
            backpressure_timeout: self.backpressure_timeout(),
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
