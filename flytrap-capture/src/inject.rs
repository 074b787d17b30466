//! Reply injection
//!
//! The analyzer hands over bare ARP payloads; the injectors here frame them
//! for the wire.

use flytrap_core::{Error, Flow, Injector, Interface, Result};
use flytrap_packet::{EtherType, EthernetFrame};
use pnet_datalink::DataLinkSender;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace};

/// Build the frame that carries `payload` back to the peer of `flow`
pub fn reply_frame(flow: &Flow, payload: &[u8]) -> EthernetFrame {
    EthernetFrame::new(
        flow.peer_mac,
        flow.interface_mac,
        EtherType::ARP,
        payload.to_vec(),
    )
}

/// Sends replies through a persistent datalink sender
pub struct LinkInjector {
    sender: Arc<Mutex<Box<dyn DataLinkSender>>>,
}

impl LinkInjector {
    /// Open a sender on `interface`
    pub fn open(interface: &Interface) -> Result<Self> {
        let sender = interface.create_sender()?;
        debug!("Opened injector on {}", interface.name);
        Ok(Self::new(sender))
    }

    pub fn new(sender: Arc<Mutex<Box<dyn DataLinkSender>>>) -> Self {
        Self { sender }
    }
}

impl Injector for LinkInjector {
    fn reply(&mut self, flow: &Flow, payload: &[u8]) -> Result<()> {
        let bytes = reply_frame(flow, payload).to_bytes();
        let mut sender = self
            .sender
            .lock()
            .map_err(|e| Error::Interface(format!("Failed to lock sender: {}", e)))?;

        match sender.send_to(&bytes, None) {
            Some(Ok(())) => {
                trace!(
                    "sent {} bytes to {} on {}",
                    bytes.len(),
                    flow.peer_mac,
                    flow.interface
                );
                Ok(())
            }
            Some(Err(e)) => Err(Error::Io(e)),
            None => Err(Error::Interface(format!(
                "Failed to send on {}: no buffer",
                flow.interface
            ))),
        }
    }
}

/// Logs replies instead of sending them
#[derive(Debug, Default)]
pub struct DryRunInjector {
    pub suppressed: u64,
}

impl DryRunInjector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Injector for DryRunInjector {
    fn reply(&mut self, flow: &Flow, payload: &[u8]) -> Result<()> {
        let frame = reply_frame(flow, payload);
        self.suppressed += 1;
        info!(
            "dry run: not sending {} byte reply from {} to {} on {}",
            frame.wire_len(),
            frame.source,
            frame.destination,
            flow.interface
        );
        Ok(())
    }
}
