//! Flytrap Core Library
//!
//! This crate provides the host table, the address-set trie, and the shared
//! types and error handling for the flytrap ARP tarpit.

pub mod addrset;
pub mod error;
pub mod flow;
pub mod hosts;
pub mod interface;
pub mod packet;
pub mod scope;
pub mod types;

// Re-export commonly used types
pub use addrset::{AddressSet, AggregationParams};
pub use error::{Error, Result};
pub use flow::{Flow, Injector, RecordingInjector};
pub use hosts::{ClaimPolicy, HostNode, HostTable, LeafState, Verdict};
pub use interface::Interface;
pub use packet::Packet;
pub use scope::Scope;
pub use types::*;

/// Allocate an empty child table for a trie node
///
/// Fails instead of aborting when the allocator cannot satisfy the request.
pub(crate) fn child_slots<T>(n: usize) -> Result<Vec<Option<Box<T>>>> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(n)
        .map_err(|e| Error::ResourceExhausted(format!("{} child slots: {}", n, e)))?;
    slots.resize_with(n, || None);
    Ok(slots)
}
