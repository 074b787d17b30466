//! ARP (Address Resolution Protocol) tarpit
//!
//! Requests for in-scope addresses are counted per target in the host
//! table. Once an address has been asked for often enough, over a long
//! enough window, without anybody answering, it is claimed and every further
//! request for it gets a forged reply pointing at our interface. Replies
//! seen on the wire only teach the table who is where.

pub mod protocol;


pub use protocol::{Action, ArpAnalyzer, ArpStats};
