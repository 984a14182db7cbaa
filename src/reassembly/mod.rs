//! Reassembly of segmented messages.
//!
//! This module contains:
//! - [`pool`]: fixed-capacity slot pool tracking one reassembly per sender
//! - [`engine`]: drives inbound frames through the codec and the pool and
//!   hands completed messages to the registered handler

pub mod engine;
pub mod pool;

pub use engine::{Outcome, ReassemblyEngine};
pub use pool::{SlotPool, SlotRef, SlotState};

use crate::frame::DecodeError;

/// Errors reported while processing an inbound frame.
///
/// None of these are fatal: the offending frame (or the partial message it
/// belonged to) is dropped and processing continues with the next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    /// Frame header could not be classified.
    Decode(DecodeError),
    /// First frame announces more than the configured maximum.
    MessageTooLarge {
        /// Sender of the first frame.
        source_id: u32,
        /// Announced length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// First frame arrived while every slot was occupied.
    BufferPoolExhausted {
        /// Sender whose message was dropped.
        source_id: u32,
    },
    /// Consecutive frame from a sender with no reassembly in progress.
    UnknownContinuationId {
        /// Sender of the orphan frame.
        source_id: u32,
    },
    /// Consecutive frame out of order; the reassembly was discarded.
    SequenceGap {
        /// Sender whose reassembly was aborted.
        source_id: u32,
        /// Sequence number that was due.
        expected: u8,
        /// Sequence number that arrived.
        got: u8,
    },
}

impl std::fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "malformed frame: {}", e),
            Self::MessageTooLarge {
                source_id,
                len,
                max,
            } => write!(
                f,
                "message of {} bytes from {:#x} exceeds maximum of {}",
                len, source_id, max
            ),
            Self::BufferPoolExhausted { source_id } => {
                write!(f, "no free reassembly slot for {:#x}", source_id)
            }
            Self::UnknownContinuationId { source_id } => {
                write!(f, "no reassembly in progress for {:#x}", source_id)
            }
            Self::SequenceGap {
                source_id,
                expected,
                got,
            } => write!(
                f,
                "sequence gap from {:#x}: expected {}, got {}",
                source_id, expected, got
            ),
        }
    }
}

impl std::error::Error for ReceiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for ReceiveError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}
