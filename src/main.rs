//! Blik ESP32 firmware binary.
//!
//! Brings up the TWAI controller and a link, then echoes every received
//! message on the node's own identifier. Stats are logged while the bus is
//! quiet.

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    // Initialize ESP-IDF logger for log crate integration
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("=== Blik ESP32 starting ===");

    if let Err(e) = firmware::run() {
        log::error!("Firmware stopped: {}", e);
    }

    // Keep the task alive so the log stays readable on the monitor
    loop {
        std::thread::sleep(std::time::Duration::from_secs(10));
    }
}

#[cfg(feature = "esp32")]
mod firmware {
    use blik::transport::twai::TwaiTransport;
    use blik::{Blik, BlikConfig, BlikError};
    use esp_idf_hal::can::{self, CanDriver};
    use esp_idf_hal::peripherals::Peripherals;
    use log::{info, warn};
    use std::error::Error;
    use std::time::Duration;

    /// Identifier this node sends with.
    const NODE_ID: u32 = 0x0E5;

    /// Quiet period after which stats are logged.
    const STATS_INTERVAL: Duration = Duration::from_secs(30);

    pub fn run() -> Result<(), Box<dyn Error>> {
        let peripherals = Peripherals::take()?;

        // TX on GPIO5, RX on GPIO4, 500 kbit/s
        let config = can::config::Config::new().timing(can::config::Timing::B500K);
        let driver = CanDriver::new(
            peripherals.can,
            peripherals.pins.gpio5,
            peripherals.pins.gpio4,
            &config,
        )?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(echo(driver))
    }

    async fn echo(driver: CanDriver<'static>) -> Result<(), Box<dyn Error>> {
        let builder = Blik::builder(BlikConfig::default());
        let (sink, frames) = builder.frame_channel();
        let transport = TwaiTransport::start(driver, sink)?;
        let frames = frames.with_notifications(transport.notifications());
        let link = builder.start(transport, frames)?;

        info!("Echoing messages on {:#x}", NODE_ID);

        loop {
            match link.recv_message(STATS_INTERVAL).await {
                Ok(msg) => {
                    info!(
                        "Received {} bytes from {:#x}",
                        msg.len(),
                        msg.source_id
                    );
                    if let Err(e) = link.send(NODE_ID, &msg.payload) {
                        warn!("Echo failed: {}", e);
                    }
                }
                Err(BlikError::Timeout) => info!("Stats: {}", link.stats().to_json()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin loopback' for a host demo.");
}
