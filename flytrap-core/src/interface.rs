//! Network interface types

use crate::{Error, MacAddr};
use pnet_datalink::{self, Channel, DataLinkSender, NetworkInterface};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

/// Network interface the daemon listens and replies on
#[derive(Debug, Clone)]
pub struct Interface {
    /// Interface name (e.g., "eth0", "em0")
    pub name: String,
    /// Interface index
    pub index: u32,
    /// MAC address
    pub mac_address: MacAddr,
    /// IPv4 addresses assigned to the interface
    pub ipv4: Vec<Ipv4Addr>,
    /// Is interface up?
    pub is_up: bool,
}

impl Interface {
    /// Create a new interface
    pub fn new(name: String, index: u32, mac_address: MacAddr) -> Self {
        Self {
            name,
            index,
            mac_address,
            ipv4: Vec::new(),
            is_up: true,
        }
    }

    /// Get interface by name
    pub fn by_name(name: &str) -> Result<Self, Error> {
        find_datalink(name)
            .map(|iface| Self::from(&iface))
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))
    }

    /// Create a persistent sender for this interface
    ///
    /// The sender is shared behind a mutex so it can move into the capture
    /// thread together with the analyzer.
    pub fn create_sender(&self) -> Result<Arc<Mutex<Box<dyn DataLinkSender>>>, Error> {
        let interface = find_datalink(&self.name)
            .ok_or_else(|| Error::Interface(format!("Interface {} not found", self.name)))?;

        let (tx, _) = match pnet_datalink::channel(&interface, Default::default()) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err(Error::Interface("Unsupported channel type".to_string())),
            Err(e) => return Err(Error::Interface(format!("Failed to create channel: {}", e))),
        };

        Ok(Arc::new(Mutex::new(tx)))
    }
}

impl From<&NetworkInterface> for Interface {
    fn from(iface: &NetworkInterface) -> Self {
        let mac_address = iface
            .mac
            .map(|mac| MacAddr([mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]))
            .unwrap_or(MacAddr::ZERO);

        let ipv4 = iface
            .ips
            .iter()
            .filter_map(|network| match network {
                ipnetwork::IpNetwork::V4(net) => Some(net.ip()),
                ipnetwork::IpNetwork::V6(_) => None,
            })
            .collect();

        Self {
            name: iface.name.clone(),
            index: iface.index,
            mac_address,
            ipv4,
            is_up: iface.is_up(),
        }
    }
}

fn find_datalink(name: &str) -> Option<NetworkInterface> {
    pnet_datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mac_address)?;
        for ip in &self.ipv4 {
            write!(f, " {}", ip)?;
        }
        Ok(())
    }
}
