//! Outbound path.
//!
//! A message is encoded up front and then written frame by frame while the
//! transport lock is held, so frames of two messages never interleave on
//! the bus even when several threads send at once.

use crate::config::MAX_PAYLOAD;
use crate::frame::{encode_bounded, EncodeError};
use crate::stats::LinkStats;
use crate::transport::{Transport, TransportError};
use log::{debug, error, warn};
use std::sync::{Arc, Mutex, MutexGuard};

/// Errors from [`SendPath::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Payload longer than the configured maximum. Nothing was sent.
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Identifier does not fit in 29 bits. Nothing was sent.
    InvalidId(u32),
    /// The transport failed part way; the rest of the message was not sent.
    TransportFailure(TransportError),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload of {} bytes exceeds maximum of {}", len, max)
            }
            Self::InvalidId(id) => write!(f, "invalid extended identifier {:#x}", id),
            Self::TransportFailure(e) => write!(f, "transport failure: {}", e),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TransportFailure(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EncodeError> for SendError {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::PayloadTooLarge { len, max } => Self::PayloadTooLarge { len, max },
            EncodeError::InvalidId(id) => Self::InvalidId(id),
        }
    }
}

impl From<TransportError> for SendError {
    fn from(e: TransportError) -> Self {
        Self::TransportFailure(e)
    }
}

/// Cloneable handle that sends messages over a shared transport.
pub struct SendPath<T> {
    transport: Arc<Mutex<T>>,
    stats: Arc<LinkStats>,
    max_payload: usize,
}

impl<T> Clone for SendPath<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            stats: self.stats.clone(),
            max_payload: self.max_payload,
        }
    }
}

impl<T: Transport> SendPath<T> {
    /// Create a send path accepting payloads up to [`MAX_PAYLOAD`].
    pub fn new(transport: T) -> Self {
        Self::with_stats(transport, MAX_PAYLOAD, Arc::new(LinkStats::new()))
    }

    /// Create a send path with a payload limit and shared statistics.
    pub fn with_stats(transport: T, max_payload: usize, stats: Arc<LinkStats>) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            stats,
            max_payload: max_payload.min(MAX_PAYLOAD),
        }
    }

    /// Send `payload` with every frame carrying `source_id`.
    ///
    /// Returns once all frames have been handed to the transport. There is
    /// no retry.
    pub fn send(&self, source_id: u32, payload: &[u8]) -> Result<(), SendError> {
        let frames = encode_bounded(source_id, payload, self.max_payload)?;

        let mut transport = self.lock();
        for (i, frame) in frames.iter().enumerate() {
            if let Err(e) = transport.write_frame(frame) {
                error!(
                    "Failed to send frame {}/{} to {:#x}: {}",
                    i + 1,
                    frames.len(),
                    source_id,
                    e
                );
                return Err(e.into());
            }
            LinkStats::bump(&self.stats.frames_tx);
        }
        drop(transport);

        LinkStats::bump(&self.stats.messages_tx);
        debug!(
            "Sent {} bytes as {} frame(s) on {:#x}",
            payload.len(),
            frames.len(),
            source_id
        );
        Ok(())
    }

    /// Run `f` with exclusive access to the transport.
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut transport = self.lock();
        f(&mut *transport)
    }

    /// Shared statistics.
    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    /// Largest payload this path accepts.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        match self.transport.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Transport mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
