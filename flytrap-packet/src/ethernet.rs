//! Ethernet frame construction and parsing
//!
//! Only Ethernet II framing is understood; 802.3 length-framed packets are
//! reported as [`EtherType::Length`] so callers can skip them.

use bytes::{BufMut, BytesMut};
use flytrap_core::{ethertypes, Error, MacAddr, Result};
use std::fmt;

/// EtherType values the daemon distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    /// IPv4 (0x0800)
    IPv4,
    /// ARP (0x0806)
    ARP,
    /// VLAN-tagged frame (0x8100)
    VLAN,
    /// IPv6 (0x86DD)
    IPv6,
    /// 802.3 frame; the field carries the payload length
    Length(u16),
    /// Anything else
    Custom(u16),
}

impl EtherType {
    /// Convert EtherType to u16 value
    pub fn to_u16(self) -> u16 {
        match self {
            EtherType::IPv4 => ethertypes::IPV4,
            EtherType::ARP => ethertypes::ARP,
            EtherType::VLAN => 0x8100,
            EtherType::IPv6 => 0x86DD,
            EtherType::Length(len) => len,
            EtherType::Custom(val) => val,
        }
    }

    /// Create EtherType from u16 value
    pub fn from_u16(value: u16) -> Self {
        match value {
            ethertypes::IPV4 => EtherType::IPv4,
            ethertypes::ARP => EtherType::ARP,
            0x8100 => EtherType::VLAN,
            0x86DD => EtherType::IPv6,
            // values up to 1500 are lengths, not types
            len if len <= 1500 => EtherType::Length(len),
            val => EtherType::Custom(val),
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::IPv4 => write!(f, "IPv4"),
            EtherType::ARP => write!(f, "ARP"),
            EtherType::VLAN => write!(f, "VLAN"),
            EtherType::IPv6 => write!(f, "IPv6"),
            EtherType::Length(len) => write!(f, "802.3 length {}", len),
            EtherType::Custom(val) => write!(f, "0x{:04x}", val),
        }
    }
}

/// Ethernet II frame
#[derive(Debug, Clone)]
pub struct EthernetFrame {
    /// Destination MAC address
    pub destination: MacAddr,
    /// Source MAC address
    pub source: MacAddr,
    /// EtherType or length field
    pub ethertype: EtherType,
    /// Payload data
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    /// Minimum Ethernet frame size (without FCS)
    pub const MIN_FRAME_SIZE: usize = 60;

    /// Ethernet header size (dst + src + type/length)
    pub const HEADER_SIZE: usize = 14;

    /// Create a new Ethernet frame
    pub fn new(
        destination: MacAddr,
        source: MacAddr,
        ethertype: EtherType,
        payload: Vec<u8>,
    ) -> Self {
        EthernetFrame {
            destination,
            source,
            ethertype,
            payload,
        }
    }

    /// Convert the frame to bytes, padding to the minimum frame size
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = BytesMut::with_capacity(Self::HEADER_SIZE + self.payload.len());

        buffer.put_slice(self.destination.as_bytes());
        buffer.put_slice(self.source.as_bytes());
        buffer.put_u16(self.ethertype.to_u16());
        buffer.put_slice(&self.payload);

        let mut result = buffer.to_vec();
        if result.len() < Self::MIN_FRAME_SIZE {
            result.resize(Self::MIN_FRAME_SIZE, 0);
        }

        result
    }

    /// Parse an Ethernet frame from bytes
    ///
    /// The payload keeps any trailing padding; upper layers know their own
    /// lengths.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::PacketParsing(format!(
                "short Ethernet frame ({} < {})",
                data.len(),
                Self::HEADER_SIZE
            )));
        }

        let (header, payload) = data.split_at(Self::HEADER_SIZE);
        let destination = MacAddr::from_slice(&header[0..6])
            .ok_or_else(|| Error::PacketParsing("bad destination address".to_string()))?;
        let source = MacAddr::from_slice(&header[6..12])
            .ok_or_else(|| Error::PacketParsing("bad source address".to_string()))?;
        let ethertype = EtherType::from_u16(u16::from_be_bytes([header[12], header[13]]));

        let payload = match ethertype {
            EtherType::Length(len) => payload.iter().take(len as usize).copied().collect(),
            _ => payload.to_vec(),
        };

        Ok(EthernetFrame {
            destination,
            source,
            ethertype,
            payload,
        })
    }

    /// Size on the wire, padding included
    pub fn wire_len(&self) -> usize {
        let raw_len = Self::HEADER_SIZE + self.payload.len();
        raw_len.max(Self::MIN_FRAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    const DST: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

    #[test]
    fn test_ethertype_conversion() {
        assert_eq!(EtherType::ARP.to_u16(), 0x0806);
        assert_eq!(EtherType::from_u16(0x0806), EtherType::ARP);
        assert_eq!(EtherType::from_u16(0x0800), EtherType::IPv4);
        assert_eq!(EtherType::from_u16(46), EtherType::Length(46));
        assert_eq!(EtherType::from_u16(0x88cc), EtherType::Custom(0x88cc));
    }

    #[test]
    fn test_ethernet_frame_to_bytes_pads() {
        let frame = EthernetFrame::new(DST, SRC, EtherType::ARP, vec![0x01; 28]);
        let bytes = frame.to_bytes();

        assert_eq!(bytes.len(), EthernetFrame::MIN_FRAME_SIZE);
        assert_eq!(frame.wire_len(), EthernetFrame::MIN_FRAME_SIZE);
        assert_eq!(&bytes[0..6], DST.as_bytes());
        assert_eq!(&bytes[6..12], SRC.as_bytes());
        assert_eq!(u16::from_be_bytes([bytes[12], bytes[13]]), 0x0806);
        assert!(bytes[42..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_ethernet_frame_from_bytes() {
        let data = vec![
            0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, // dst
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src
            0x08, 0x06, // ARP
            0x01, 0x02, 0x03, 0x04, // payload
        ];

        let frame = EthernetFrame::from_bytes(&data).unwrap();
        assert_eq!(frame.destination, DST);
        assert_eq!(frame.source, SRC);
        assert_eq!(frame.ethertype, EtherType::ARP);
        assert_eq!(frame.payload, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_ethernet_frame_length_field() {
        let mut data = vec![0u8; 20];
        data[12..14].copy_from_slice(&3u16.to_be_bytes());
        let frame = EthernetFrame::from_bytes(&data).unwrap();
        assert_eq!(frame.ethertype, EtherType::Length(3));
        assert_eq!(frame.payload.len(), 3);
    }

    #[test]
    fn test_ethernet_frame_too_short() {
        assert!(matches!(
            EthernetFrame::from_bytes(&[0u8; 13]),
            Err(Error::PacketParsing(_))
        ));
    }
}
