//! Packet construction and parsing library for flytrap
//!
//! This crate provides the two codecs the daemon needs:
//!
//! - [`ethernet`] - Ethernet II frame construction and parsing
//! - [`arp`] - ARP payload construction and parsing
//!
//! # Example
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use flytrap_core::MacAddr;
//! use flytrap_packet::{ArpPacket, EtherType, EthernetFrame};
//!
//! let ours = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
//! let peer = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
//!
//! let reply = ArpPacket::new_reply(
//!     ours,
//!     Ipv4Addr::new(192, 168, 1, 77),
//!     peer,
//!     Ipv4Addr::new(192, 168, 1, 10),
//! );
//! let frame = EthernetFrame::new(peer, ours, EtherType::ARP, reply.serialize());
//! assert_eq!(frame.to_bytes().len(), EthernetFrame::MIN_FRAME_SIZE);
//! ```

pub mod arp;
pub mod ethernet;

// Re-export commonly used types for convenience
pub use arp::{ArpOpcode, ArpPacket};
pub use ethernet::{EtherType, EthernetFrame};
