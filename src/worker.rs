//! Receive worker.
//!
//! A single task owns the [`ReassemblyEngine`]. It waits on three sources:
//! 1. Cancellation: stop immediately
//! 2. The frame queue: process one frame with notifications suspended
//! 3. The sweep tick: expire stale reassemblies on a quiet bus
//!
//! The worker also stops once every [`FrameSink`](crate::transport::FrameSink)
//! is dropped and the queue is drained.

use crate::reassembly::ReassemblyEngine;
use crate::transport::{FrameReceiver, NotificationPause};
use log::{debug, info};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run the receive loop until cancelled or the queue closes.
///
/// Returns the engine so callers can inspect it after shutdown.
pub async fn run(
    mut engine: ReassemblyEngine,
    mut frames: FrameReceiver,
    sweep_interval: Duration,
    cancel: CancellationToken,
) -> ReassemblyEngine {
    let notifications = frames.notifications();
    let mut sweep = tokio::time::interval(sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Receive worker started");

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Receive worker shutting down");
                break;
            }

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    info!("Frame queue closed, receive worker stopping");
                    break;
                };
                let _pause = NotificationPause::new(notifications.as_ref());
                // Errors are already logged and counted by the engine
                let _ = engine.handle_frame(&frame);
            }

            _ = sweep.tick() => {
                let expired = engine.sweep();
                if expired > 0 {
                    debug!("Sweep tick expired {} reassemblies", expired);
                }
            }
        }
    }

    info!("Receive worker stopped");
    engine
}
