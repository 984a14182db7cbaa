//! Link facade.
//!
//! [`Blik`] ties the pieces together: a receive worker owning the
//! reassembly engine, a send path over the transport, and shared
//! statistics. Multiple links can run in the same process, which is how the
//! loopback tests exercise two nodes talking to each other.
//!
//! # Example
//!
//! ```
//! use blik::transport::loopback::LoopbackBus;
//! use blik::{Blik, BlikConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = LoopbackBus::new();
//!
//! let builder_a = Blik::builder(BlikConfig::default());
//! let (sink_a, frames_a) = builder_a.frame_channel();
//! let port_a = bus.attach(sink_a);
//! let frames_a = frames_a.with_notifications(port_a.notifications());
//! let node_a = builder_a.start(port_a, frames_a)?;
//!
//! let builder_b = Blik::builder(BlikConfig::default());
//! let (sink_b, frames_b) = builder_b.frame_channel();
//! let node_b = builder_b.start(bus.attach(sink_b), frames_b)?;
//!
//! node_a.send(0x1A0, b"hello over a bus of 8-byte frames")?;
//! let msg = node_b.recv_message(Duration::from_secs(1)).await?;
//! assert_eq!(msg.source_id, 0x1A0);
//!
//! node_a.shutdown().await;
//! node_b.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::clock::{Clock, MonotonicClock};
use crate::config::{BlikConfig, ConfigError};
use crate::message::{Message, MessageHandler};
use crate::reassembly::ReassemblyEngine;
use crate::send::{SendError, SendPath};
use crate::stats::LinkStats;
use crate::transport::{frame_channel, FrameReceiver, FrameSink, Transport};
use crate::worker;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Error type for link operations.
#[derive(Debug)]
pub enum BlikError {
    /// Configuration rejected at start.
    Config(ConfigError),
    /// Timeout waiting for a message.
    Timeout,
    /// The receive worker has stopped.
    ChannelClosed,
    /// A message handler was registered, so there is no inbox to read.
    InboxUnavailable,
    /// Sending failed.
    Send(SendError),
}

impl std::fmt::Display for BlikError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlikError::Config(e) => write!(f, "{}", e),
            BlikError::Timeout => write!(f, "operation timed out"),
            BlikError::ChannelClosed => write!(f, "channel closed"),
            BlikError::InboxUnavailable => {
                write!(f, "messages are delivered to the registered handler")
            }
            BlikError::Send(e) => write!(f, "send failed: {}", e),
        }
    }
}

impl std::error::Error for BlikError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlikError::Config(e) => Some(e),
            BlikError::Send(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for BlikError {
    fn from(e: ConfigError) -> Self {
        BlikError::Config(e)
    }
}

impl From<SendError> for BlikError {
    fn from(e: SendError) -> Self {
        BlikError::Send(e)
    }
}

/// Builder for [`Blik`].
pub struct BlikBuilder {
    config: BlikConfig,
    clock: Box<dyn Clock>,
    handler: Option<MessageHandler>,
}

impl BlikBuilder {
    /// Use a different time source for expiry.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Deliver completed messages to `handler` instead of the inbox.
    ///
    /// The handler runs on the receive worker, once per message, in
    /// completion order.
    pub fn on_message(mut self, handler: impl FnMut(Message) + Send + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Receive queue sized by the configured `rx_queue_depth`.
    pub fn frame_channel(&self) -> (FrameSink, FrameReceiver) {
        frame_channel(self.config.rx_queue_depth)
    }

    /// Validate the config and spawn the receive worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<T: Transport + 'static>(
        self,
        transport: T,
        frames: FrameReceiver,
    ) -> Result<Blik<T>, BlikError> {
        self.config.validate()?;

        let stats = frames.stats().clone();
        let mut engine = ReassemblyEngine::with_stats(&self.config, self.clock, stats.clone());

        let inbox = match self.handler {
            Some(handler) => {
                engine.set_handler(Some(handler));
                None
            }
            None => {
                let (tx, rx) = mpsc::channel(self.config.inbox_capacity);
                let inbox_stats = stats.clone();
                engine.on_message(move |msg| match tx.try_send(msg) {
                    Ok(()) => {}
                    Err(TrySendError::Full(msg)) => {
                        LinkStats::bump(&inbox_stats.dropped_inbox_full);
                        warn!(
                            "Inbox full, dropped {} byte message from {:#x}",
                            msg.len(),
                            msg.source_id
                        );
                    }
                    // Receiver dropped means the link is going away
                    Err(TrySendError::Closed(_)) => {}
                });
                Some(Mutex::new(rx))
            }
        };

        let sender = SendPath::with_stats(transport, self.config.max_payload, stats.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(worker::run(
            engine,
            frames,
            self.config.sweep_interval,
            cancel.clone(),
        ));

        info!(
            "Link started: {} slots, {:?} expiry, {} byte max payload",
            self.config.pool_capacity, self.config.expiry_timeout, self.config.max_payload
        );

        Ok(Blik {
            sender,
            stats,
            config: self.config,
            inbox,
            cancel,
            task: Some(task),
        })
    }
}

/// A running link.
///
/// Dropping the link cancels its worker; [`Blik::shutdown`] also waits for
/// it to finish.
pub struct Blik<T> {
    sender: SendPath<T>,
    stats: Arc<LinkStats>,
    config: BlikConfig,
    inbox: Option<Mutex<mpsc::Receiver<Message>>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<ReassemblyEngine>>,
}

impl Blik<()> {
    /// Start configuring a link.
    pub fn builder(config: BlikConfig) -> BlikBuilder {
        BlikBuilder {
            config,
            clock: Box::new(MonotonicClock),
            handler: None,
        }
    }
}

impl<T: Transport> Blik<T> {
    /// Send a message. Blocks until every frame is on the transport.
    pub fn send(&self, source_id: u32, payload: &[u8]) -> Result<(), SendError> {
        self.sender.send(source_id, payload)
    }

    /// Cloneable send handle for other threads or tasks.
    pub fn sender(&self) -> SendPath<T> {
        self.sender.clone()
    }

    /// Link statistics.
    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    /// Configuration the link was started with.
    pub fn config(&self) -> &BlikConfig {
        &self.config
    }

    /// Wait for the next message when no handler was registered.
    ///
    /// The inbox holds up to `inbox_capacity` messages; while it is full,
    /// newly completed messages are dropped and counted in
    /// `dropped_inbox_full`.
    pub async fn recv_message(&self, wait: Duration) -> Result<Message, BlikError> {
        let inbox = self.inbox.as_ref().ok_or(BlikError::InboxUnavailable)?;
        let mut rx = inbox.lock().await;
        match timeout(wait, rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(BlikError::ChannelClosed),
            Err(_) => Err(BlikError::Timeout),
        }
    }

    /// Check if the receive worker is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the receive worker and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Receive worker failed: {}", e);
            }
        }
        info!("Link stopped");
    }
}

impl<T> Drop for Blik<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
