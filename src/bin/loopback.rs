//! Host demo: two links on an in-memory bus.
//!
//! Node A sends messages of several sizes, node B echoes each one back on
//! its own identifier. Both sides check what they get and the stats are
//! printed as JSON at the end.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin loopback
//! RUST_LOG=debug cargo run --bin loopback   # per-frame logging
//! ```

use blik::transport::loopback::{LoopbackBus, LoopbackPort};
use blik::{Blik, BlikConfig, BlikError};
use log::{error, info};
use std::time::Duration;

const NODE_A_ID: u32 = 0x0A0;
const NODE_B_ID: u32 = 0x0B0;
const SIZES: [usize; 8] = [0, 1, 7, 8, 13, 50, 100, 118];
const WAIT: Duration = Duration::from_secs(1);

fn start(bus: &LoopbackBus) -> Result<Blik<LoopbackPort>, BlikError> {
    let builder = Blik::builder(BlikConfig::default());
    let (sink, frames) = builder.frame_channel();
    let port = bus.attach(sink);
    let frames = frames.with_notifications(port.notifications());
    builder.start(port, frames)
}

async fn run(bus: &LoopbackBus) -> Result<(), BlikError> {
    let node_a = start(bus)?;
    let node_b = start(bus)?;

    for len in SIZES {
        let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
        node_a.send(NODE_A_ID, &payload)?;

        let request = node_b.recv_message(WAIT).await?;
        info!(
            "B received {} bytes from {:#x}",
            request.len(),
            request.source_id
        );
        node_b.send(NODE_B_ID, &request.payload)?;

        let reply = node_a.recv_message(WAIT).await?;
        if reply.payload != payload {
            error!("Echo mismatch for {} byte message", len);
        } else {
            info!("A got {} byte echo from {:#x}", reply.len(), reply.source_id);
        }
    }

    println!("node A: {}", node_a.stats().to_json());
    println!("node B: {}", node_b.stats().to_json());

    node_a.shutdown().await;
    node_b.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== Blik loopback demo starting ===");

    let bus = LoopbackBus::new();
    if let Err(e) = run(&bus).await {
        error!("Demo failed: {}", e);
        std::process::exit(1);
    }

    info!("=== Blik loopback demo finished ===");
}
