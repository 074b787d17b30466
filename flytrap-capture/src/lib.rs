//! Packet capture library for flytrap
//!
//! This crate wraps pcap for live capture and trace replay, and provides the
//! injectors that put forged replies back on the wire.
//!
//! ## Example
//!
//! ```no_run
//! use flytrap_capture::{filters, PacketCapture};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut capture = PacketCapture::new("eth0")?;
//! capture.set_filter(&filters::arp_filter())?;
//!
//! capture.start(|packet| {
//!     println!("{} bytes at {}", packet.len(), packet.timestamp_ms);
//! })?;
//!
//! // Later, stop the capture
//! capture.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod filters;
pub mod inject;
pub mod stats;

// Re-export main types
pub use capture::{replay_file, CaptureConfig, CaptureState, PacketCapture};
pub use inject::{DryRunInjector, LinkInjector};
pub use stats::{CaptureStats, StatsAccumulator};
