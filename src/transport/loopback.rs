//! In-memory broadcast bus.
//!
//! Every frame written by one port is delivered to every other attached
//! port, like a shared CAN bus without arbitration. A port whose receive
//! notifications are suspended parks incoming frames in a small FIFO, the
//! way a controller's hardware mailbox holds frames while its interrupt is
//! masked, and hands them to its sink on resume.
//!
//! # Example
//!
//! ```
//! use blik::frame::Frame;
//! use blik::transport::loopback::LoopbackBus;
//! use blik::transport::{frame_channel, Transport};
//!
//! let bus = LoopbackBus::new();
//! let (sink_a, _rx_a) = frame_channel(8);
//! let (sink_b, mut rx_b) = frame_channel(8);
//! let mut a = bus.attach(sink_a);
//! let _b = bus.attach(sink_b);
//!
//! let frame = Frame::new(0x10, &[0x01, 0xAA]).unwrap();
//! a.write_frame(&frame).unwrap();
//! assert_eq!(rx_b.try_recv(), Some(frame));
//! ```

use super::{DeliverError, FrameSink, RxNotifications, Transport, TransportError};
use crate::frame::Frame;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Frames a suspended port holds before dropping.
pub const PENDING_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Loopback bus mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[derive(Default)]
struct BusInner {
    ports: Vec<(usize, Arc<PortRx>)>,
    next_id: usize,
    closed: bool,
}

struct RxState {
    suspended: bool,
    pending: VecDeque<Frame>,
}

/// Receive side of one port.
struct PortRx {
    sink: FrameSink,
    state: Mutex<RxState>,
}

impl PortRx {
    fn receive(&self, frame: Frame) {
        let mut state = lock(&self.state);
        if state.suspended {
            if state.pending.len() >= PENDING_CAPACITY {
                warn!("Loopback port pending queue full, dropping {:?}", frame);
                self.sink.record_overrun();
                return;
            }
            state.pending.push_back(frame);
            return;
        }
        forward(&self.sink, frame);
    }
}

impl RxNotifications for PortRx {
    fn suspend(&self) {
        lock(&self.state).suspended = true;
    }

    fn resume(&self) {
        let mut state = lock(&self.state);
        state.suspended = false;
        while let Some(frame) = state.pending.pop_front() {
            forward(&self.sink, frame);
        }
    }
}

fn forward(sink: &FrameSink, frame: Frame) {
    match sink.deliver(frame) {
        Ok(()) => {}
        Err(DeliverError::Overrun) => warn!("Receive queue overrun, dropped {:?}", frame),
        Err(DeliverError::Closed) => debug!("Receiver gone, dropped {:?}", frame),
    }
}

/// Shared in-memory bus.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct LoopbackBus {
    inner: Arc<Mutex<BusInner>>,
}

impl LoopbackBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a port that receives into `sink`.
    pub fn attach(&self, sink: FrameSink) -> LoopbackPort {
        let rx = Arc::new(PortRx {
            sink,
            state: Mutex::new(RxState {
                suspended: false,
                pending: VecDeque::new(),
            }),
        });

        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.ports.push((id, rx.clone()));
        debug!("Loopback port {} attached", id);

        LoopbackPort {
            id,
            bus: self.inner.clone(),
            rx,
        }
    }

    /// Number of attached ports.
    pub fn port_count(&self) -> usize {
        lock(&self.inner).ports.len()
    }

    /// Close the bus. Later writes fail with [`TransportError::Closed`].
    pub fn close(&self) {
        lock(&self.inner).closed = true;
    }

    /// Check if the bus has been closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }
}

/// One node's connection to a [`LoopbackBus`].
///
/// Detaches itself when dropped.
pub struct LoopbackPort {
    id: usize,
    bus: Arc<Mutex<BusInner>>,
    rx: Arc<PortRx>,
}

impl LoopbackPort {
    /// Port identifier, unique per bus.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Notification control for this port's receive side.
    pub fn notifications(&self) -> Arc<dyn RxNotifications> {
        self.rx.clone()
    }

    /// Stop receiving and reject further writes.
    pub fn detach(&self) {
        let mut inner = lock(&self.bus);
        let before = inner.ports.len();
        inner.ports.retain(|(id, _)| *id != self.id);
        if inner.ports.len() != before {
            debug!("Loopback port {} detached", self.id);
        }
    }
}

impl Transport for LoopbackPort {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let inner = lock(&self.bus);
        if inner.closed || !inner.ports.iter().any(|(id, _)| *id == self.id) {
            return Err(TransportError::Closed);
        }
        for (_, peer) in inner.ports.iter().filter(|(id, _)| *id != self.id) {
            peer.receive(*frame);
        }
        Ok(())
    }
}

impl Drop for LoopbackPort {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for LoopbackPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackPort").field("id", &self.id).finish()
    }
}
