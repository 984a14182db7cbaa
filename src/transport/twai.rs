//! ESP32 TWAI (CAN) transport.
//!
//! Frames go out with 29-bit extended identifiers. Reception runs on a
//! dedicated thread that polls the controller with a short timeout and hands
//! every frame to a [`FrameSink`]. The driver is shared behind a mutex so the
//! receive thread and the send path never touch the controller at the same
//! time.
//!
//! # Hardware Setup
//!
//! The TWAI controller needs an external transceiver (SN65HVD230 or similar)
//! on the TX/RX pins chosen by the caller.

use super::{join_thread, DeliverError, FrameSink, RxNotifications, Transport, TransportError};
use crate::frame::Frame;
use esp_idf_hal::can::{CanDriver, Flags, Frame as CanFrame};
use esp_idf_hal::delay::TickType;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long a transmit may wait for a free TX buffer.
const TX_TIMEOUT_MS: u64 = 50;

/// Receive poll interval. Bounds how long a send waits for the driver lock.
const RX_POLL_MS: u64 = 5;

/// Backoff after a driver error on the receive side.
const ERROR_BACKOFF_MS: u64 = 100;

/// Stack size for the receive thread.
const RX_THREAD_STACK: usize = 4096;

type SharedDriver = Arc<Mutex<CanDriver<'static>>>;

fn lock(driver: &SharedDriver) -> MutexGuard<'_, CanDriver<'static>> {
    match driver.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("TWAI driver mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn ticks(ms: u64) -> u32 {
    TickType::new_millis(ms).ticks()
}

fn is_timeout(e: &esp_idf_sys::EspError) -> bool {
    e.code() == esp_idf_sys::ESP_ERR_TIMEOUT as i32
}

/// Mask shared between the receive thread and the worker.
///
/// While suspended, the thread stops reading, so frames stay in the
/// controller's RX queue until resume.
#[derive(Default)]
struct RxMask {
    suspended: AtomicBool,
}

impl RxNotifications for RxMask {
    fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }
}

/// TWAI-backed transport.
pub struct TwaiTransport {
    driver: SharedDriver,
    mask: Arc<RxMask>,
    running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl TwaiTransport {
    /// Start the controller and a receive thread feeding `sink`.
    ///
    /// The driver must be configured (pins, timing, filter) but not started.
    pub fn start(mut driver: CanDriver<'static>, sink: FrameSink) -> Result<Self, TransportError> {
        driver
            .start()
            .map_err(|e| TransportError::Driver(e.to_string()))?;
        info!("TWAI controller started");

        let driver = Arc::new(Mutex::new(driver));
        let mask = Arc::new(RxMask::default());
        let running = Arc::new(AtomicBool::new(true));

        let rx_thread = {
            let driver = driver.clone();
            let mask = mask.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("twai-rx".into())
                .stack_size(RX_THREAD_STACK)
                .spawn(move || rx_loop(driver, mask, running, sink))
                .map_err(|e| TransportError::Driver(e.to_string()))?
        };

        Ok(Self {
            driver,
            mask,
            running,
            rx_thread: Some(rx_thread),
        })
    }

    /// Notification control for the receive thread.
    pub fn notifications(&self) -> Arc<dyn RxNotifications> {
        self.mask.clone()
    }
}

impl Transport for TwaiTransport {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let can_frame = CanFrame::new(frame.id(), Flags::Extended.into(), frame.data())
            .ok_or_else(|| TransportError::Driver("frame rejected by driver".into()))?;

        let driver = lock(&self.driver);
        driver
            .transmit(&can_frame, ticks(TX_TIMEOUT_MS))
            .map_err(|e| {
                if is_timeout(&e) {
                    TransportError::Busy
                } else {
                    error!("TWAI transmit failed: {}", e);
                    TransportError::Driver(e.to_string())
                }
            })
    }
}

impl Drop for TwaiTransport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.rx_thread.take() {
            join_thread(handle, "TWAI receive");
        }
        if let Err(e) = lock(&self.driver).stop() {
            warn!("TWAI stop failed: {}", e);
        }
    }
}

fn rx_loop(driver: SharedDriver, mask: Arc<RxMask>, running: Arc<AtomicBool>, sink: FrameSink) {
    info!("TWAI receive thread started");

    while running.load(Ordering::Acquire) {
        if mask.suspended.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }

        let received = lock(&driver).receive(ticks(RX_POLL_MS));
        let can_frame = match received {
            Ok(f) => f,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                warn!("TWAI receive error: {}", e);
                std::thread::sleep(Duration::from_millis(ERROR_BACKOFF_MS));
                continue;
            }
        };

        let frame = match Frame::new(can_frame.identifier(), can_frame.data()) {
            Ok(f) => f,
            Err(e) => {
                debug!("Ignoring bus frame: {}", e);
                continue;
            }
        };

        match sink.deliver(frame) {
            Ok(()) => {}
            Err(DeliverError::Overrun) => warn!("Receive queue overrun, dropped {:?}", frame),
            Err(DeliverError::Closed) => {
                info!("Receive queue closed, stopping TWAI receive thread");
                break;
            }
        }
    }

    info!("TWAI receive thread stopped");
}
