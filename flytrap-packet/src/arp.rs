//! ARP Packet Structure and Parsing
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Hardware Type (HTYPE)    |       Protocol Type (PTYPE)   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  HW Addr Len  |Proto Addr Len |         Operation (OPER)      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Sender Hardware Address (SHA)               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |       SHA (cont.)             |  Sender Protocol Address (SPA)|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |       SPA (cont.)             |  Target Hardware Address (THA)|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        THA (cont.)                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Target Protocol Address (TPA)               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Parsing only checks the length; whether the header describes
//! Ethernet/IPv4 is left to the caller (see [`ArpPacket::is_ethernet_ipv4`]).

use bytes::{BufMut, BytesMut};
use flytrap_core::{ethertypes, Error, MacAddr, Result};
use std::fmt;
use std::net::Ipv4Addr;

/// Hardware types
pub const HTYPE_ETHERNET: u16 = 1;

/// Protocol types
pub const PTYPE_IPV4: u16 = ethertypes::IPV4;

/// ARP Operation Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOpcode {
    /// ARP Request (who-has)
    Request,
    /// ARP Reply (is-at)
    Reply,
    /// Anything else, including RARP
    Unknown(u16),
}

impl ArpOpcode {
    pub fn from_u16(val: u16) -> Self {
        match val {
            1 => Self::Request,
            2 => Self::Reply,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::Request => 1,
            Self::Reply => 2,
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ArpOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "who-has"),
            Self::Reply => write!(f, "is-at"),
            Self::Unknown(op) => write!(f, "0x{:04x}", op),
        }
    }
}

/// ARP Packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    /// Hardware type (1 for Ethernet)
    pub htype: u16,
    /// Protocol type (0x0800 for IPv4)
    pub ptype: u16,
    /// Hardware address length (6 for MAC)
    pub hlen: u8,
    /// Protocol address length (4 for IPv4)
    pub plen: u8,
    /// Operation
    pub operation: ArpOpcode,
    /// Sender hardware address
    pub sender_hw_addr: MacAddr,
    /// Sender protocol address
    pub sender_proto_addr: Ipv4Addr,
    /// Target hardware address
    pub target_hw_addr: MacAddr,
    /// Target protocol address
    pub target_proto_addr: Ipv4Addr,
}

impl ArpPacket {
    /// Size of an Ethernet/IPv4 ARP payload
    pub const SIZE: usize = 28;

    /// Create new ARP request
    pub fn new_request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            htype: HTYPE_ETHERNET,
            ptype: PTYPE_IPV4,
            hlen: 6,
            plen: 4,
            operation: ArpOpcode::Request,
            sender_hw_addr: sender_mac,
            sender_proto_addr: sender_ip,
            target_hw_addr: MacAddr::ZERO,
            target_proto_addr: target_ip,
        }
    }

    /// Create new ARP reply
    pub fn new_reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            htype: HTYPE_ETHERNET,
            ptype: PTYPE_IPV4,
            hlen: 6,
            plen: 4,
            operation: ArpOpcode::Reply,
            sender_hw_addr: sender_mac,
            sender_proto_addr: sender_ip,
            target_hw_addr: target_mac,
            target_proto_addr: target_ip,
        }
    }

    /// Parse ARP packet from bytes; trailing bytes are ignored
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::PacketParsing(format!(
                "short ARP packet ({} < {})",
                data.len(),
                Self::SIZE
            )));
        }

        let mac_at = |offset: usize| {
            MacAddr::from_slice(&data[offset..offset + 6])
                .ok_or_else(|| Error::PacketParsing("bad hardware address".to_string()))
        };
        let ip_at = |offset: usize| {
            Ipv4Addr::new(data[offset], data[offset + 1], data[offset + 2], data[offset + 3])
        };

        Ok(Self {
            htype: u16::from_be_bytes([data[0], data[1]]),
            ptype: u16::from_be_bytes([data[2], data[3]]),
            hlen: data[4],
            plen: data[5],
            operation: ArpOpcode::from_u16(u16::from_be_bytes([data[6], data[7]])),
            sender_hw_addr: mac_at(8)?,
            sender_proto_addr: ip_at(14),
            target_hw_addr: mac_at(18)?,
            target_proto_addr: ip_at(24),
        })
    }

    /// Serialize ARP packet to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);

        buf.put_u16(self.htype);
        buf.put_u16(self.ptype);
        buf.put_u8(self.hlen);
        buf.put_u8(self.plen);
        buf.put_u16(self.operation.to_u16());
        buf.put_slice(self.sender_hw_addr.as_bytes());
        buf.put_slice(&self.sender_proto_addr.octets());
        buf.put_slice(self.target_hw_addr.as_bytes());
        buf.put_slice(&self.target_proto_addr.octets());

        buf.to_vec()
    }

    /// True when the header describes Ethernet hardware and IPv4 protocol
    /// addresses
    pub fn is_ethernet_ipv4(&self) -> bool {
        self.htype == HTYPE_ETHERNET && self.ptype == PTYPE_IPV4 && self.hlen == 6 && self.plen == 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER_MAC: MacAddr = MacAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    #[test]
    fn test_arp_request_creation() {
        let sender_ip = Ipv4Addr::new(192, 168, 1, 1);
        let target_ip = Ipv4Addr::new(192, 168, 1, 2);

        let packet = ArpPacket::new_request(SENDER_MAC, sender_ip, target_ip);

        assert_eq!(packet.operation, ArpOpcode::Request);
        assert_eq!(packet.sender_hw_addr, SENDER_MAC);
        assert_eq!(packet.target_hw_addr, MacAddr::ZERO);
        assert!(packet.is_ethernet_ipv4());
    }

    #[test]
    fn test_arp_reply_layout() {
        let ours = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
        let packet = ArpPacket::new_reply(
            ours,
            Ipv4Addr::new(10, 0, 0, 77),
            SENDER_MAC,
            Ipv4Addr::new(10, 0, 0, 1),
        );
        let bytes = packet.serialize();

        assert_eq!(bytes.len(), ArpPacket::SIZE);
        assert_eq!(&bytes[0..8], &[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x02]);
        assert_eq!(&bytes[8..14], ours.as_bytes());
        assert_eq!(&bytes[14..18], &[10, 0, 0, 77]);
        assert_eq!(&bytes[18..24], SENDER_MAC.as_bytes());
        assert_eq!(&bytes[24..28], &[10, 0, 0, 1]);
    }

    #[test]
    fn test_arp_parse_with_padding() {
        let packet = ArpPacket::new_request(
            SENDER_MAC,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        );
        let mut bytes = packet.serialize();
        bytes.extend_from_slice(&[0u8; 18]);

        assert_eq!(ArpPacket::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_arp_parse_short() {
        assert!(matches!(
            ArpPacket::parse(&[0u8; 27]),
            Err(Error::PacketParsing(_))
        ));
    }

    #[test]
    fn test_arp_parse_foreign_header() {
        let mut bytes = ArpPacket::new_request(
            SENDER_MAC,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        )
        .serialize();
        bytes[1] = 6; // IEEE 802 hardware type
        bytes[6..8].copy_from_slice(&3u16.to_be_bytes());

        let parsed = ArpPacket::parse(&bytes).unwrap();
        assert!(!parsed.is_ethernet_ipv4());
        assert_eq!(parsed.operation, ArpOpcode::Unknown(3));
    }
}
