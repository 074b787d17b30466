//! Protocol analysis for flytrap
//!
//! - [`arp`]: the ARP analyzer, which learns bindings, counts unanswered
//!   requests and forges replies for claimed addresses
//! - [`frame`]: Ethernet dispatch in front of it, including suppression of
//!   our own frames and periodic expiry of idle hosts
//!
//! ## Example
//!
//! ```rust
//! use flytrap_core::{HostTable, MacAddr, Packet, RecordingInjector, Scope};
//! use flytrap_protocols::{ArpAnalyzer, FrameAnalyzer};
//!
//! let arp = ArpAnalyzer::new(HostTable::new(), Scope::unrestricted());
//! let mut analyzer = FrameAnalyzer::with_link("eth0", MacAddr([2, 0, 0, 0, 0, 1]), arp);
//! let mut injector = RecordingInjector::new();
//!
//! let packet = Packet::new("eth0".to_string(), 0, vec![0u8; 60]);
//! analyzer.handle_packet(&packet, &mut injector);
//! assert!(injector.sent.is_empty());
//! ```

pub mod arp;
pub mod frame;

pub use arp::{Action, ArpAnalyzer, ArpStats};
pub use frame::{ExpiryPolicy, FrameAnalyzer};
