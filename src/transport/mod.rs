//! Bus access.
//!
//! The core talks to the bus through three seams:
//! - [`Transport`]: writes one frame, used by the send path
//! - [`FrameSink`]: non-blocking enqueue of received frames, called from the
//!   driver's receive context
//! - [`RxNotifications`]: lets the receive worker mask new-frame
//!   notifications while it processes a frame
//!
//! Implementations:
//! - [`loopback`]: in-memory bus for host use and tests
//! - `twai`: ESP32 TWAI controller (feature `esp32`)

pub mod loopback;
#[cfg(feature = "esp32")]
pub mod twai;

use crate::frame::Frame;
use crate::stats::LinkStats;
use log::error;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Something that can put a frame on the bus.
pub trait Transport: Send {
    /// Write a single frame. Blocks until the driver has accepted it.
    fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        (**self).write_frame(frame)
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The bus or port is closed.
    Closed,
    /// The driver could not accept the frame in time.
    Busy,
    /// Driver-specific failure.
    Driver(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Busy => write!(f, "transport busy"),
            Self::Driver(msg) => write!(f, "driver error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Receive-notification masking exposed by a transport.
///
/// While suspended, the transport must hold (not drop) frames it receives
/// and hand them over once resumed.
pub trait RxNotifications: Send + Sync {
    /// Stop notifying about new frames.
    fn suspend(&self);
    /// Resume notifications.
    fn resume(&self);
}

/// No masking.
impl RxNotifications for () {
    fn suspend(&self) {}
    fn resume(&self) {}
}

/// RAII guard that keeps receive notifications suspended while alive.
pub struct NotificationPause<'a> {
    notifications: &'a dyn RxNotifications,
}

impl<'a> NotificationPause<'a> {
    /// Suspend notifications until the guard is dropped.
    pub fn new(notifications: &'a dyn RxNotifications) -> Self {
        notifications.suspend();
        Self { notifications }
    }
}

impl Drop for NotificationPause<'_> {
    fn drop(&mut self) {
        self.notifications.resume();
    }
}

/// Why a frame could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverError {
    /// The receive queue is full; the frame was dropped.
    Overrun,
    /// The receiving side is gone.
    Closed,
}

impl std::fmt::Display for DeliverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overrun => write!(f, "receive queue full"),
            Self::Closed => write!(f, "receive queue closed"),
        }
    }
}

impl std::error::Error for DeliverError {}

/// Producer half of the receive queue.
///
/// Cheap to clone and never blocks, so it can be called from a driver
/// callback or a dedicated receive thread.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Frame>,
    stats: Arc<LinkStats>,
}

impl FrameSink {
    /// Enqueue a received frame.
    pub fn deliver(&self, frame: Frame) -> Result<(), DeliverError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.record_overrun();
                Err(DeliverError::Overrun)
            }
            Err(TrySendError::Closed(_)) => Err(DeliverError::Closed),
        }
    }

    /// Check if the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Count a frame lost before it reached the queue.
    pub(crate) fn record_overrun(&self) {
        LinkStats::bump(&self.stats.rx_overruns);
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Consumer half of the receive queue.
pub struct FrameReceiver {
    rx: mpsc::Receiver<Frame>,
    stats: Arc<LinkStats>,
    notifications: Arc<dyn RxNotifications>,
}

impl FrameReceiver {
    /// Attach the transport's notification control.
    pub fn with_notifications(mut self, notifications: Arc<dyn RxNotifications>) -> Self {
        self.notifications = notifications;
        self
    }

    /// Statistics shared with the sink.
    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    /// Wait for the next frame. Returns `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Take the next frame if one is queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn notifications(&self) -> Arc<dyn RxNotifications> {
        self.notifications.clone()
    }
}

/// Join a driver thread, logging a panic instead of dropping it.
///
/// Returns `true` if the thread exited normally.
#[cfg_attr(not(feature = "esp32"), allow(dead_code))]
pub(crate) fn join_thread(handle: std::thread::JoinHandle<()>, name: &str) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(e) => {
            let reason = e
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| e.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            error!("{} thread panicked: {}", name, reason);
            false
        }
    }
}

/// Create a receive queue holding up to `depth` frames.
pub fn frame_channel(depth: usize) -> (FrameSink, FrameReceiver) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let stats = Arc::new(LinkStats::new());
    (
        FrameSink {
            tx,
            stats: stats.clone(),
        },
        FrameReceiver {
            rx,
            stats,
            notifications: Arc::new(()),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifications {
        suspended: AtomicUsize,
        resumed: AtomicUsize,
    }

    impl RxNotifications for CountingNotifications {
        fn suspend(&self) {
            self.suspended.fetch_add(1, Ordering::SeqCst);
        }
        fn resume(&self) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(byte: u8) -> Frame {
        Frame::new(0x100, &[0x01, byte]).unwrap()
    }

    #[test]
    fn test_deliver_in_order() {
        let (sink, mut rx) = frame_channel(4);
        sink.deliver(frame(1)).unwrap();
        sink.deliver(frame(2)).unwrap();

        assert_eq!(rx.try_recv(), Some(frame(1)));
        assert_eq!(rx.try_recv(), Some(frame(2)));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_overrun_is_counted() {
        let (sink, rx) = frame_channel(2);
        sink.deliver(frame(1)).unwrap();
        sink.deliver(frame(2)).unwrap();
        assert_eq!(sink.deliver(frame(3)), Err(DeliverError::Overrun));
        assert_eq!(rx.stats().snapshot().rx_overruns, 1);
    }

    #[test]
    fn test_closed_receiver() {
        let (sink, rx) = frame_channel(2);
        drop(rx);
        assert!(sink.is_closed());
        assert_eq!(sink.deliver(frame(1)), Err(DeliverError::Closed));
    }

    #[test]
    fn test_zero_depth_still_holds_one_frame() {
        let (sink, mut rx) = frame_channel(0);
        sink.deliver(frame(9)).unwrap();
        assert_eq!(rx.try_recv(), Some(frame(9)));
    }

    #[test]
    fn test_notification_pause_guard() {
        let notifications = CountingNotifications::default();
        {
            let _pause = NotificationPause::new(&notifications);
            assert_eq!(notifications.suspended.load(Ordering::SeqCst), 1);
            assert_eq!(notifications.resumed.load(Ordering::SeqCst), 0);
        }
        assert_eq!(notifications.resumed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notification_pause_released_on_early_return() {
        fn process(n: &dyn RxNotifications, fail: bool) -> Result<(), ()> {
            let _pause = NotificationPause::new(n);
            if fail {
                return Err(());
            }
            Ok(())
        }

        let notifications = CountingNotifications::default();
        assert!(process(&notifications, true).is_err());
        assert!(process(&notifications, false).is_ok());
        assert_eq!(notifications.suspended.load(Ordering::SeqCst), 2);
        assert_eq!(notifications.resumed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_join_thread_reports_panic() {
        let clean = std::thread::spawn(|| {});
        assert!(join_thread(clean, "clean"));

        let panicking = std::thread::spawn(|| panic!("driver fault"));
        assert!(!join_thread(panicking, "panicking"));
    }

    #[tokio::test]
    async fn test_recv_ends_when_sinks_dropped() {
        let (sink, mut rx) = frame_channel(4);
        let clone = sink.clone();
        clone.deliver(frame(4)).unwrap();
        drop(sink);
        drop(clone);

        assert_eq!(rx.recv().await, Some(frame(4)));
        assert_eq!(rx.recv().await, None);
    }
}
