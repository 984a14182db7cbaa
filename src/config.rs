//! Link configuration.
//!
//! All values are fixed when a [`Blik`](crate::Blik) link is started. By
//! default a link tracks 32 reassemblies, expires them after one second and
//! accepts the full 118 byte payload.

use std::time::Duration;

/// Largest payload a single message may carry.
///
/// A first frame carries 6 payload bytes and each consecutive frame 7, so
/// 118 bytes needs exactly 16 consecutive frames. That is the most the 4-bit
/// sequence counter can number without repeating inside one message.
pub const MAX_PAYLOAD: usize = 118;

/// Default number of concurrent reassemblies.
pub const DEFAULT_POOL_CAPACITY: usize = 32;

/// Default age after which an incomplete reassembly is discarded.
pub const DEFAULT_EXPIRY_TIMEOUT: Duration = Duration::from_secs(1);

/// Default period of the worker's idle expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Default depth of the receive queue between sink and worker.
pub const DEFAULT_RX_QUEUE_DEPTH: usize = 32;

/// Default number of completed messages the inbox holds for `recv_message`.
pub const DEFAULT_INBOX_CAPACITY: usize = 100;

/// Configuration for a link.
///
/// Note: This is `Copy` for efficient passing to constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlikConfig {
    /// Number of reassembly slots.
    pub pool_capacity: usize,
    /// Maximum age of an incomplete reassembly.
    pub expiry_timeout: Duration,
    /// Largest payload accepted on send and receive (at most [`MAX_PAYLOAD`]).
    pub max_payload: usize,
    /// How often the worker sweeps expired slots while the bus is quiet.
    pub sweep_interval: Duration,
    /// Number of received frames that may wait for the worker.
    pub rx_queue_depth: usize,
    /// Completed messages held until read when no handler is registered.
    /// Further messages are dropped.
    pub inbox_capacity: usize,
}

impl Default for BlikConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            expiry_timeout: DEFAULT_EXPIRY_TIMEOUT,
            max_payload: MAX_PAYLOAD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            rx_queue_depth: DEFAULT_RX_QUEUE_DEPTH,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

impl BlikConfig {
    /// Validate configuration parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `pool_capacity` is 0
    /// - `expiry_timeout` is 0
    /// - `max_payload` is 0 or larger than [`MAX_PAYLOAD`]
    /// - `sweep_interval` is 0
    /// - `rx_queue_depth` is 0
    /// - `inbox_capacity` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "pool_capacity must be greater than 0",
            ));
        }
        if self.expiry_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "expiry_timeout must be greater than 0",
            ));
        }
        if self.max_payload == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_payload must be greater than 0",
            ));
        }
        if self.max_payload > MAX_PAYLOAD {
            return Err(ConfigError::InvalidConfig(
                "max_payload must not exceed 118 bytes",
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "sweep_interval must be greater than 0",
            ));
        }
        if self.rx_queue_depth == 0 {
            return Err(ConfigError::InvalidConfig(
                "rx_queue_depth must be greater than 0",
            ));
        }
        if self.inbox_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "inbox_capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Error type for configuration problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid configuration parameter.
    InvalidConfig(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
