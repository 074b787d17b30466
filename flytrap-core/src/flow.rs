//! Reply flow context and the injection capability

use crate::{MacAddr, Result};

/// Everything a forged reply needs to know about the frame it answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    /// Timestamp of the triggering packet, in milliseconds
    pub timestamp_ms: u64,
    /// Name of the interface the packet arrived on
    pub interface: String,
    /// Link-layer address of that interface; forged replies claim it
    pub interface_mac: MacAddr,
    /// Source link-layer address of the triggering frame
    pub peer_mac: MacAddr,
}

impl Flow {
    /// Create a new flow
    pub fn new(
        interface: impl Into<String>,
        interface_mac: MacAddr,
        peer_mac: MacAddr,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            timestamp_ms,
            interface: interface.into(),
            interface_mac,
            peer_mac,
        }
    }
}

/// Transmits forged protocol payloads back towards the peer of a flow
pub trait Injector {
    /// Send `payload` (a link-layer payload, without the Ethernet header)
    /// in reply to `flow`
    fn reply(&mut self, flow: &Flow, payload: &[u8]) -> Result<()>;
}

impl<T: Injector + ?Sized> Injector for Box<T> {
    fn reply(&mut self, flow: &Flow, payload: &[u8]) -> Result<()> {
        (**self).reply(flow, payload)
    }
}

/// Collects replies in memory instead of sending them
#[derive(Debug, Default)]
pub struct RecordingInjector {
    pub sent: Vec<(Flow, Vec<u8>)>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Injector for RecordingInjector {
    fn reply(&mut self, flow: &Flow, payload: &[u8]) -> Result<()> {
        self.sent.push((flow.clone(), payload.to_vec()));
        Ok(())
    }
}
