//! Inbound frame processing.
//!
//! The engine owns the slot pool and the clock. Each frame is classified,
//! applied to the pool, and every completed message is handed to the
//! registered handler before `handle_frame` returns. An expiry sweep follows
//! every frame, so a stalled reassembly never outlives the timeout by more
//! than the gap to the next frame (the worker's sweep tick bounds that gap
//! on a quiet bus).
//!
//! # Example
//!
//! ```
//! use blik::clock::ManualClock;
//! use blik::frame::encode;
//! use blik::reassembly::ReassemblyEngine;
//! use blik::BlikConfig;
//! use std::sync::{Arc, Mutex};
//!
//! let received = Arc::new(Mutex::new(Vec::new()));
//! let sink = received.clone();
//!
//! let mut engine = ReassemblyEngine::new(&BlikConfig::default(), ManualClock::new());
//! engine.on_message(move |msg| sink.lock().unwrap().push(msg));
//!
//! for frame in encode(0x42, &[5u8; 30]).unwrap() {
//!     engine.handle_frame(&frame).unwrap();
//! }
//! assert_eq!(received.lock().unwrap()[0].payload, vec![5u8; 30]);
//! ```

use super::pool::{SlotPool, SlotRef, SlotState};
use super::ReceiveError;
use crate::clock::Clock;
use crate::config::BlikConfig;
use crate::frame::{classify, Frame, Pdu};
use crate::message::{Message, MessageHandler};
use crate::stats::LinkStats;
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a successfully processed frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A message was completed and handed to the handler.
    Delivered {
        /// Sender of the message.
        source_id: u32,
        /// Message length.
        len: usize,
    },
    /// A first frame opened a reassembly.
    Started {
        /// Sender of the first frame.
        source_id: u32,
        /// Announced message length.
        expected: usize,
    },
    /// A consecutive frame was accepted; more are needed.
    Pending {
        /// Sender of the frame.
        source_id: u32,
        /// Bytes accumulated so far.
        received: usize,
        /// Announced message length.
        expected: usize,
    },
}

/// Reassembles inbound frames into messages.
pub struct ReassemblyEngine {
    pool: SlotPool,
    clock: Box<dyn Clock>,
    timeout: Duration,
    max_payload: usize,
    handler: Option<MessageHandler>,
    stats: Arc<LinkStats>,
}

impl ReassemblyEngine {
    /// Create an engine with its own statistics.
    pub fn new(config: &BlikConfig, clock: impl Clock + 'static) -> Self {
        Self::with_stats(config, Box::new(clock), Arc::new(LinkStats::new()))
    }

    /// Create an engine that records into shared statistics.
    pub fn with_stats(config: &BlikConfig, clock: Box<dyn Clock>, stats: Arc<LinkStats>) -> Self {
        Self {
            pool: SlotPool::new(config.pool_capacity, config.max_payload),
            clock,
            timeout: config.expiry_timeout,
            max_payload: config.max_payload,
            handler: None,
            stats,
        }
    }

    /// Register the handler for completed messages, replacing any previous one.
    pub fn on_message(&mut self, handler: impl FnMut(Message) + Send + 'static) {
        self.handler = Some(Box::new(handler));
    }

    pub(crate) fn set_handler(&mut self, handler: Option<MessageHandler>) {
        self.handler = handler;
    }

    /// Process one inbound frame, then sweep expired reassemblies.
    ///
    /// Errors are logged and counted; the engine stays usable after any of
    /// them.
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<Outcome, ReceiveError> {
        LinkStats::bump(&self.stats.frames_rx);
        let now = self.clock.now();

        let result = self.dispatch(frame, now);
        if let Err(e) = &result {
            self.record_drop(e);
            warn!("Dropped frame {:?}: {}", frame, e);
        }

        self.expire_at(now);
        result
    }

    /// Release reassemblies that exceeded the expiry timeout.
    ///
    /// Returns the number released.
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now();
        self.expire_at(now)
    }

    /// Number of reassemblies in progress.
    pub fn in_progress(&self) -> usize {
        self.pool.occupied()
    }

    /// The underlying slot pool.
    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    /// Shared statistics.
    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    fn dispatch(&mut self, frame: &Frame, now: Instant) -> Result<Outcome, ReceiveError> {
        let source_id = frame.id();

        match classify(frame.data())? {
            Pdu::Single(payload) => {
                if payload.len() > self.max_payload {
                    return Err(ReceiveError::MessageTooLarge {
                        source_id,
                        len: payload.len(),
                        max: self.max_payload,
                    });
                }
                debug!("Single frame of {} bytes from {:#x}", payload.len(), source_id);
                Ok(self.deliver(Message::new(source_id, payload)))
            }
            Pdu::First { total, payload } => {
                let expected = total as usize;
                let slot = self.allocate(source_id, expected, payload, now)?;
                if slot.replaced {
                    LinkStats::bump(&self.stats.slots_replaced);
                    warn!(
                        "First frame from {:#x} replaced an unfinished message",
                        source_id
                    );
                }
                debug!(
                    "First frame from {:#x} ({} bytes total) in slot {}",
                    source_id, expected, slot.index
                );
                Ok(Outcome::Started {
                    source_id,
                    expected,
                })
            }
            Pdu::Consecutive { seq, payload } => {
                match self.pool.append(source_id, seq, payload, now)? {
                    SlotState::Pending { received, expected } => {
                        debug!(
                            "Consecutive frame {} from {:#x} ({}/{} bytes)",
                            seq, source_id, received, expected
                        );
                        Ok(Outcome::Pending {
                            source_id,
                            received,
                            expected,
                        })
                    }
                    SlotState::Complete(message) => Ok(self.deliver(message)),
                }
            }
        }
    }

    /// Allocate a slot, sweeping stale ones first if the pool is full.
    fn allocate(
        &mut self,
        source_id: u32,
        total: usize,
        payload: &[u8],
        now: Instant,
    ) -> Result<SlotRef, ReceiveError> {
        let result = self.pool.allocate(source_id, total, payload, now);
        if let Err(ReceiveError::BufferPoolExhausted { .. }) = result {
            if self.expire_at(now) > 0 {
                return self.pool.allocate(source_id, total, payload, now);
            }
        }
        result
    }

    fn deliver(&mut self, message: Message) -> Outcome {
        let outcome = Outcome::Delivered {
            source_id: message.source_id,
            len: message.len(),
        };
        LinkStats::bump(&self.stats.messages_rx);
        debug!(
            "Received message of {} bytes from {:#x}",
            message.len(),
            message.source_id
        );

        match self.handler.as_mut() {
            Some(handler) => handler(message),
            None => warn!("No message handler registered, message discarded"),
        }
        outcome
    }

    fn expire_at(&mut self, now: Instant) -> usize {
        let expired = self.pool.expire(now, self.timeout);
        if expired > 0 {
            LinkStats::add(&self.stats.slots_expired, expired);
            debug!("Removed {} stale reassemblies", expired);
        }
        expired
    }

    fn record_drop(&self, error: &ReceiveError) {
        let counter = match error {
            ReceiveError::Decode(_) => &self.stats.dropped_malformed,
            ReceiveError::MessageTooLarge { .. } => &self.stats.dropped_too_large,
            ReceiveError::BufferPoolExhausted { .. } => &self.stats.dropped_pool_exhausted,
            ReceiveError::UnknownContinuationId { .. } => {
                &self.stats.dropped_unknown_continuation
            }
            ReceiveError::SequenceGap { .. } => &self.stats.dropped_sequence_gap,
        };
        LinkStats::bump(counter);
    }
}

impl std::fmt::Debug for ReassemblyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReassemblyEngine")
            .field("in_progress", &self.pool.occupied())
            .field("capacity", &self.pool.capacity())
            .field("timeout", &self.timeout)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::frame::{encode, DecodeError};
    use std::sync::Mutex;

    type Inbox = Arc<Mutex<Vec<Message>>>;

    fn engine_with(config: BlikConfig) -> (ReassemblyEngine, ManualClock, Inbox) {
        let clock = ManualClock::new();
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = inbox.clone();
        let mut engine = ReassemblyEngine::new(&config, clock.clone());
        engine.on_message(move |msg| sink.lock().unwrap().push(msg));
        (engine, clock, inbox)
    }

    fn engine() -> (ReassemblyEngine, ManualClock, Inbox) {
        engine_with(BlikConfig::default())
    }

    fn frame(id: u32, data: &[u8]) -> Frame {
        Frame::new(id, data).unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 3) as u8).collect()
    }

    #[test]
    fn test_single_frame_delivered_immediately() {
        let (mut engine, _, inbox) = engine();
        let outcome = engine.handle_frame(&frame(0x10, &[0x03, 1, 2, 3])).unwrap();

        assert_eq!(
            outcome,
            Outcome::Delivered {
                source_id: 0x10,
                len: 3
            }
        );
        assert_eq!(inbox.lock().unwrap().as_slice(), &[Message::new(0x10, vec![1, 2, 3])]);
        assert_eq!(engine.in_progress(), 0);
    }

    #[test]
    fn test_multi_frame_message() {
        let (mut engine, _, inbox) = engine();
        let data = payload(20);
        let frames = encode(0x20, &data).unwrap();

        assert!(matches!(
            engine.handle_frame(&frames[0]).unwrap(),
            Outcome::Started { expected: 20, .. }
        ));
        assert!(matches!(
            engine.handle_frame(&frames[1]).unwrap(),
            Outcome::Pending {
                received: 13,
                expected: 20,
                ..
            }
        ));
        assert!(inbox.lock().unwrap().is_empty());
        assert!(matches!(
            engine.handle_frame(&frames[2]).unwrap(),
            Outcome::Delivered { len: 20, .. }
        ));

        let inbox = inbox.lock().unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0], Message::new(0x20, data));
    }

    #[test]
    fn test_roundtrip_every_length() {
        let (mut engine, _, inbox) = engine();
        for len in 0..=118 {
            for frame in encode(0x1AB, &payload(len)).unwrap() {
                engine.handle_frame(&frame).unwrap();
            }
        }
        let inbox = inbox.lock().unwrap();
        assert_eq!(inbox.len(), 119);
        for (len, msg) in inbox.iter().enumerate() {
            assert_eq!(msg.payload, payload(len));
        }
    }

    #[test]
    fn test_interleaved_senders() {
        let (mut engine, _, inbox) = engine();
        let a = encode(0xA, &payload(40)).unwrap();
        let b = encode(0xB, &vec![0xEE; 25]).unwrap();

        let mut a_iter = a.iter();
        let mut b_iter = b.iter();
        loop {
            let next_a = a_iter.next();
            let next_b = b_iter.next();
            if next_a.is_none() && next_b.is_none() {
                break;
            }
            for f in next_a.into_iter().chain(next_b) {
                engine.handle_frame(f).unwrap();
            }
        }

        let inbox = inbox.lock().unwrap();
        assert_eq!(inbox.len(), 2);
        // b needs fewer frames, so it completes first
        assert_eq!(inbox[0], Message::new(0xB, vec![0xEE; 25]));
        assert_eq!(inbox[1], Message::new(0xA, payload(40)));
    }

    #[test]
    fn test_sequence_gap_then_restart() {
        let (mut engine, _, inbox) = engine();
        let frames = encode(0x30, &payload(30)).unwrap();

        engine.handle_frame(&frames[0]).unwrap();
        let gap = frame(0x30, &[0x22, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            engine.handle_frame(&gap),
            Err(ReceiveError::SequenceGap {
                source_id: 0x30,
                expected: 0,
                got: 2
            })
        );
        assert_eq!(engine.in_progress(), 0);

        for f in &frames {
            engine.handle_frame(f).unwrap();
        }
        assert_eq!(inbox.lock().unwrap().len(), 1);
        assert_eq!(engine.stats().snapshot().dropped_sequence_gap, 1);
    }

    #[test]
    fn test_unknown_frame_type_changes_nothing() {
        let (mut engine, _, inbox) = engine();
        let frames = encode(0x40, &payload(20)).unwrap();
        engine.handle_frame(&frames[0]).unwrap();

        assert_eq!(
            engine.handle_frame(&frame(0x40, &[0x35, 1, 2])),
            Err(ReceiveError::Decode(DecodeError::UnknownFrameType(0x35)))
        );
        assert_eq!(engine.in_progress(), 1);

        engine.handle_frame(&frames[1]).unwrap();
        engine.handle_frame(&frames[2]).unwrap();
        assert_eq!(inbox.lock().unwrap()[0].payload, payload(20));
        assert_eq!(engine.stats().snapshot().dropped_malformed, 1);
    }

    #[test]
    fn test_orphan_continuation() {
        let (mut engine, _, _) = engine();
        assert_eq!(
            engine.handle_frame(&frame(0x50, &[0x20, 1, 2, 3])),
            Err(ReceiveError::UnknownContinuationId { source_id: 0x50 })
        );
        assert_eq!(engine.stats().snapshot().dropped_unknown_continuation, 1);
    }

    #[test]
    fn test_expiry_on_next_frame() {
        let (mut engine, clock, _) = engine();
        let stalled = encode(0x60, &payload(30)).unwrap();
        engine.handle_frame(&stalled[0]).unwrap();

        clock.advance(Duration::from_millis(1500));
        // Any frame triggers the sweep
        engine.handle_frame(&frame(0x61, &[0x01, 9])).unwrap();
        assert_eq!(engine.in_progress(), 0);
        assert_eq!(engine.stats().snapshot().slots_expired, 1);

        // The late continuation is now an orphan
        assert!(matches!(
            engine.handle_frame(&stalled[1]),
            Err(ReceiveError::UnknownContinuationId { .. })
        ));
    }

    #[test]
    fn test_sweep_frees_slot_for_same_sender() {
        let (mut engine, clock, inbox) = engine();
        let first = encode(0x70, &payload(30)).unwrap();
        engine.handle_frame(&first[0]).unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(engine.sweep(), 1);

        let again = encode(0x70, &payload(9)).unwrap();
        assert!(matches!(
            engine.handle_frame(&again[0]).unwrap(),
            Outcome::Started { .. }
        ));
        engine.handle_frame(&again[1]).unwrap();
        assert_eq!(inbox.lock().unwrap()[0].payload, payload(9));
        assert_eq!(engine.stats().snapshot().slots_replaced, 0);
    }

    #[test]
    fn test_sweep_keeps_fresh_slots() {
        let (mut engine, clock, _) = engine();
        engine.handle_frame(&encode(1, &payload(30)).unwrap()[0]).unwrap();
        clock.advance(Duration::from_millis(999));
        assert_eq!(engine.sweep(), 0);
        assert_eq!(engine.in_progress(), 1);
    }

    #[test]
    fn test_pool_exhaustion() {
        let config = BlikConfig {
            pool_capacity: 2,
            ..Default::default()
        };
        let (mut engine, _, inbox) = engine_with(config);
        let a = encode(1, &payload(9)).unwrap();
        let b = encode(2, &payload(10)).unwrap();
        let c = encode(3, &payload(11)).unwrap();

        engine.handle_frame(&a[0]).unwrap();
        engine.handle_frame(&b[0]).unwrap();
        assert_eq!(
            engine.handle_frame(&c[0]),
            Err(ReceiveError::BufferPoolExhausted { source_id: 3 })
        );

        // Existing reassemblies are intact and completable
        engine.handle_frame(&a[1]).unwrap();
        engine.handle_frame(&b[1]).unwrap();
        let inbox = inbox.lock().unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].payload, payload(9));
        assert_eq!(inbox[1].payload, payload(10));
        assert_eq!(engine.stats().snapshot().dropped_pool_exhausted, 1);
    }

    #[test]
    fn test_exhausted_pool_reclaims_stale_slot() {
        let config = BlikConfig {
            pool_capacity: 1,
            ..Default::default()
        };
        let (mut engine, clock, _) = engine_with(config);
        engine.handle_frame(&encode(1, &payload(20)).unwrap()[0]).unwrap();

        clock.advance(Duration::from_secs(3));
        assert!(matches!(
            engine.handle_frame(&encode(2, &payload(20)).unwrap()[0]),
            Ok(Outcome::Started { source_id: 2, .. })
        ));
    }

    #[test]
    fn test_replaced_reassembly_is_counted() {
        let (mut engine, _, inbox) = engine();
        let old = encode(0x80, &payload(30)).unwrap();
        let new = encode(0x80, &payload(12)).unwrap();

        engine.handle_frame(&old[0]).unwrap();
        engine.handle_frame(&old[1]).unwrap();
        engine.handle_frame(&new[0]).unwrap();
        engine.handle_frame(&new[1]).unwrap();

        assert_eq!(inbox.lock().unwrap().as_slice(), &[Message::new(0x80, payload(12))]);
        assert_eq!(engine.stats().snapshot().slots_replaced, 1);
    }

    #[test]
    fn test_configured_max_payload() {
        let config = BlikConfig {
            max_payload: 16,
            ..Default::default()
        };
        let (mut engine, _, _) = engine_with(config);
        assert!(matches!(
            engine.handle_frame(&encode(1, &payload(17)).unwrap()[0]),
            Err(ReceiveError::MessageTooLarge { len: 17, max: 16, .. })
        ));
        assert_eq!(engine.stats().snapshot().dropped_too_large, 1);
    }

    #[test]
    fn test_handler_called_once_per_message() {
        let (mut engine, _, inbox) = engine();
        for frame in encode(5, &payload(50)).unwrap() {
            engine.handle_frame(&frame).unwrap();
        }
        // Stray continuation after completion does not redeliver
        assert!(engine.handle_frame(&frame(5, &[0x27, 1])).is_err());
        assert_eq!(inbox.lock().unwrap().len(), 1);
        assert_eq!(engine.stats().snapshot().messages_rx, 1);
    }

    #[test]
    fn test_no_handler_discards() {
        let mut engine = ReassemblyEngine::new(&BlikConfig::default(), ManualClock::new());
        assert!(engine.handle_frame(&frame(1, &[0x01, 7])).is_ok());
        assert_eq!(engine.stats().snapshot().messages_rx, 1);
    }
}
