//! Blik: messages up to 118 bytes over a bus of 8-byte frames.
//!
//! A message is split into a first frame and up to 16 consecutive frames on
//! send, and reassembled per sender identifier on receive. Reassemblies that
//! stall longer than the expiry timeout are discarded.
//!
//! Everything except the `twai` transport is platform independent and can be
//! tested on the host machine without ESP32 hardware.

pub mod clock;
pub mod config;
pub mod frame;
pub mod message;
pub mod node;
pub mod reassembly;
pub mod send;
pub mod stats;
pub mod transport;
pub mod worker;

// Re-export commonly used items
pub use config::{BlikConfig, ConfigError, MAX_PAYLOAD};
pub use frame::{Frame, FrameError};
pub use message::Message;
pub use node::{Blik, BlikBuilder, BlikError};
pub use reassembly::{Outcome, ReassemblyEngine, ReceiveError};
pub use send::{SendError, SendPath};
pub use stats::{LinkStats, StatsSnapshot};
pub use transport::{frame_channel, FrameReceiver, FrameSink, Transport, TransportError};
