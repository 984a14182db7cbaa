//! Fixed-capacity pool of reassembly slots.
//!
//! Slots live in an arena of fixed size addressed by index. A map from sender
//! id to index is kept alongside, so a continuation finds its slot in O(1)
//! and only allocation scans the arena for a free entry.
//!
//! # Slot Lifecycle
//!
//! ```text
//! Free -> Occupied(last_seq = None) -> Occupied(Some(0)) -> ... -> Free
//! ```
//!
//! A slot returns to `Free` when its message completes, when a consecutive
//! frame arrives out of order, when it expires, or when a newer first frame
//! from the same sender replaces it.
//!
//! The pool does no locking. Every mutating call must come from the single
//! receive worker.

use super::ReceiveError;
use crate::frame::codec::SEQUENCE_MODULUS;
use crate::message::Message;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One in-progress reassembly.
#[derive(Debug)]
struct Slot {
    source_id: u32,
    expected_size: usize,
    accumulated: Vec<u8>,
    last_seq: Option<u8>,
    last_update: Instant,
}

impl Slot {
    /// Sequence number the next consecutive frame must carry.
    fn next_seq(&self) -> u8 {
        self.last_seq.map_or(0, |seq| (seq + 1) % SEQUENCE_MODULUS)
    }

    fn remaining(&self) -> usize {
        self.expected_size - self.accumulated.len()
    }
}

/// Handle to a freshly allocated slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    /// Arena index of the slot.
    pub index: usize,
    /// Whether an in-progress reassembly from the same sender was discarded.
    pub replaced: bool,
}

/// Result of appending a consecutive frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a completed message must be delivered"]
pub enum SlotState {
    /// More frames are needed.
    Pending {
        /// Bytes accumulated so far.
        received: usize,
        /// Total bytes announced by the first frame.
        expected: usize,
    },
    /// The message is complete and its slot has been released.
    Complete(Message),
}

/// Fixed-capacity reassembly slot pool.
///
/// # Example
///
/// ```
/// use blik::reassembly::{SlotPool, SlotState};
/// use std::time::Instant;
///
/// let mut pool = SlotPool::new(4, 118);
/// let now = Instant::now();
///
/// pool.allocate(0x10, 9, &[1, 2, 3, 4, 5, 6], now).unwrap();
/// match pool.append(0x10, 0, &[7, 8, 9], now).unwrap() {
///     SlotState::Complete(msg) => assert_eq!(msg.payload, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]),
///     SlotState::Pending { .. } => unreachable!(),
/// }
/// assert_eq!(pool.occupied(), 0);
/// ```
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<Option<Slot>>,
    index: HashMap<u32, usize>,
    max_payload: usize,
}

impl SlotPool {
    /// Create a pool with `capacity` slots accepting messages up to
    /// `max_payload` bytes.
    pub fn new(capacity: usize, max_payload: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            index: HashMap::with_capacity(capacity),
            max_payload,
        }
    }

    /// Start a reassembly for `source_id`.
    ///
    /// A reassembly already in progress for the same sender is replaced: the
    /// most recent first frame wins and the earlier partial message is lost.
    ///
    /// # Errors
    ///
    /// - [`ReceiveError::MessageTooLarge`] if `total_size` exceeds the pool's
    ///   maximum payload
    /// - [`ReceiveError::BufferPoolExhausted`] if no slot is free; existing
    ///   slots are left untouched
    pub fn allocate(
        &mut self,
        source_id: u32,
        total_size: usize,
        initial: &[u8],
        now: Instant,
    ) -> Result<SlotRef, ReceiveError> {
        if total_size > self.max_payload {
            return Err(ReceiveError::MessageTooLarge {
                source_id,
                len: total_size,
                max: self.max_payload,
            });
        }

        let (index, replaced) = match self.index.get(&source_id) {
            Some(&index) => (index, true),
            None => {
                let index = self
                    .slots
                    .iter()
                    .position(Option::is_none)
                    .ok_or(ReceiveError::BufferPoolExhausted { source_id })?;
                (index, false)
            }
        };

        let mut accumulated = Vec::with_capacity(total_size);
        accumulated.extend_from_slice(&initial[..initial.len().min(total_size)]);

        self.slots[index] = Some(Slot {
            source_id,
            expected_size: total_size,
            accumulated,
            last_seq: None,
            last_update: now,
        });
        self.index.insert(source_id, index);

        Ok(SlotRef { index, replaced })
    }

    /// Append a consecutive frame to the reassembly for `source_id`.
    ///
    /// Payload beyond the announced length (bus padding) is ignored.
    ///
    /// # Errors
    ///
    /// - [`ReceiveError::UnknownContinuationId`] if no reassembly is in
    ///   progress for the sender
    /// - [`ReceiveError::SequenceGap`] if `seq` is not the next expected
    ///   sequence number; the slot is released
    pub fn append(
        &mut self,
        source_id: u32,
        seq: u8,
        payload: &[u8],
        now: Instant,
    ) -> Result<SlotState, ReceiveError> {
        let index = *self
            .index
            .get(&source_id)
            .ok_or(ReceiveError::UnknownContinuationId { source_id })?;
        let slot = self.slots[index]
            .as_mut()
            .ok_or(ReceiveError::UnknownContinuationId { source_id })?;

        let expected = slot.next_seq();
        if seq != expected {
            self.free(index);
            return Err(ReceiveError::SequenceGap {
                source_id,
                expected,
                got: seq,
            });
        }

        let take = payload.len().min(slot.remaining());
        slot.accumulated.extend_from_slice(&payload[..take]);
        slot.last_seq = Some(seq);
        slot.last_update = now;

        if slot.remaining() > 0 {
            return Ok(SlotState::Pending {
                received: slot.accumulated.len(),
                expected: slot.expected_size,
            });
        }

        match self.free(index) {
            Some(slot) => Ok(SlotState::Complete(Message::new(
                slot.source_id,
                slot.accumulated,
            ))),
            None => Err(ReceiveError::UnknownContinuationId { source_id }),
        }
    }

    /// Release every slot not updated for longer than `timeout`.
    ///
    /// Returns the number of slots released. No message is emitted for them.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> usize {
        let stale: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    // Saturate so a timestamp newer than `now` never underflows
                    .filter(|s| now.saturating_duration_since(s.last_update) > timeout)
                    .map(|_| index)
            })
            .collect();

        for &index in &stale {
            self.free(index);
        }
        stale.len()
    }

    /// Discard the reassembly for `source_id`, if any.
    pub fn release(&mut self, source_id: u32) -> bool {
        match self.index.get(&source_id) {
            Some(&index) => self.free(index).is_some(),
            None => false,
        }
    }

    /// Check if a reassembly is in progress for `source_id`.
    pub fn is_assembling(&self, source_id: u32) -> bool {
        self.index.contains_key(&source_id)
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.index.len()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Release all slots.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.index.clear();
    }

    fn free(&mut self, index: usize) -> Option<Slot> {
        let slot = self.slots.get_mut(index)?.take()?;
        self.index.remove(&slot.source_id);
        Some(slot)
    }
}
