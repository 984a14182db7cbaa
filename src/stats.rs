//! Link statistics.
//!
//! Counters are shared between the frame sink, the receive worker and the
//! send path. All fields are atomic so they can be updated from any context
//! without locking.
//!
//! # Example JSON
//!
//! ```json
//! {
//!   "frames": { "tx": 34, "rx": 51, "overruns": 0 },
//!   "messages": { "tx": 4, "rx": 6 },
//!   "dropped": { "malformed": 1, "pool_exhausted": 0, "unknown_continuation": 2,
//!                "sequence_gap": 1, "too_large": 0, "inbox_full": 0 },
//!   "slots": { "expired": 3, "replaced": 0 }
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for one link.
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Frames handed to the transport.
    pub frames_tx: AtomicUsize,
    /// Frames taken off the receive queue by the worker.
    pub frames_rx: AtomicUsize,
    /// Frames lost because the receive queue was full.
    pub rx_overruns: AtomicUsize,
    /// Messages fully sent.
    pub messages_tx: AtomicUsize,
    /// Messages delivered to the handler.
    pub messages_rx: AtomicUsize,
    /// Frames with a header that could not be classified.
    pub dropped_malformed: AtomicUsize,
    /// First frames dropped because every slot was busy.
    pub dropped_pool_exhausted: AtomicUsize,
    /// Consecutive frames with no matching reassembly.
    pub dropped_unknown_continuation: AtomicUsize,
    /// Reassemblies aborted on an out-of-order sequence number.
    pub dropped_sequence_gap: AtomicUsize,
    /// First frames announcing more than the configured maximum.
    pub dropped_too_large: AtomicUsize,
    /// Completed messages dropped because the inbox was full.
    pub dropped_inbox_full: AtomicUsize,
    /// Reassemblies discarded by expiry.
    pub slots_expired: AtomicUsize,
    /// Reassemblies discarded by a newer first frame from the same sender.
    pub slots_replaced: AtomicUsize,
}

impl LinkStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a consistent-enough copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_tx: load(&self.frames_tx),
            frames_rx: load(&self.frames_rx),
            rx_overruns: load(&self.rx_overruns),
            messages_tx: load(&self.messages_tx),
            messages_rx: load(&self.messages_rx),
            dropped_malformed: load(&self.dropped_malformed),
            dropped_pool_exhausted: load(&self.dropped_pool_exhausted),
            dropped_unknown_continuation: load(&self.dropped_unknown_continuation),
            dropped_sequence_gap: load(&self.dropped_sequence_gap),
            dropped_too_large: load(&self.dropped_too_large),
            dropped_inbox_full: load(&self.dropped_inbox_full),
            slots_expired: load(&self.slots_expired),
            slots_replaced: load(&self.slots_replaced),
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

/// Plain copy of [`LinkStats`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_tx: usize,
    pub frames_rx: usize,
    pub rx_overruns: usize,
    pub messages_tx: usize,
    pub messages_rx: usize,
    pub dropped_malformed: usize,
    pub dropped_pool_exhausted: usize,
    pub dropped_unknown_continuation: usize,
    pub dropped_sequence_gap: usize,
    pub dropped_too_large: usize,
    pub dropped_inbox_full: usize,
    pub slots_expired: usize,
    pub slots_replaced: usize,
}

impl StatsSnapshot {
    /// Serialize to JSON.
    pub fn to_json(&self) -> String {
        format!(
            concat!(
                r#"{{"frames":{{"tx":{},"rx":{},"overruns":{}}},"#,
                r#""messages":{{"tx":{},"rx":{}}},"#,
                r#""dropped":{{"malformed":{},"pool_exhausted":{},"unknown_continuation":{},"sequence_gap":{},"too_large":{},"inbox_full":{}}},"#,
                r#""slots":{{"expired":{},"replaced":{}}}}}"#
            ),
            self.frames_tx,
            self.frames_rx,
            self.rx_overruns,
            self.messages_tx,
            self.messages_rx,
            self.dropped_malformed,
            self.dropped_pool_exhausted,
            self.dropped_unknown_continuation,
            self.dropped_sequence_gap,
            self.dropped_too_large,
            self.dropped_inbox_full,
            self.slots_expired,
            self.slots_replaced
        )
    }
}
