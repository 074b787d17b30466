//! Ethernet dispatch in front of the ARP analyzer

use tracing::{debug, trace, warn};
use flytrap_core::{Error, Flow, HostTable, Injector, MacAddr, Packet, Result};
use flytrap_packet::{EtherType, EthernetFrame};

use crate::arp::{Action, ArpAnalyzer};

/// How long idle hosts are kept, and how often the table is swept
///
/// Both are measured on packet timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub ttl_ms: u64,
    pub interval_ms: u64,
}

/// Decodes captured frames and feeds ARP payloads to the analyzer
#[derive(Debug)]
pub struct FrameAnalyzer {
    interface: String,
    interface_mac: MacAddr,
    arp: ArpAnalyzer,
    expiry: Option<ExpiryPolicy>,
    next_expiry: Option<u64>,
    own_frames: u64,
    other_frames: u64,
}

impl FrameAnalyzer {
    /// Analyzer for an interface known only by name and link address
    pub fn with_link(interface: impl Into<String>, interface_mac: MacAddr, arp: ArpAnalyzer) -> Self {
        Self {
            interface: interface.into(),
            interface_mac,
            arp,
            expiry: None,
            next_expiry: None,
            own_frames: 0,
            other_frames: 0,
        }
    }

    /// Enable periodic expiry of idle hosts
    pub fn with_expiry(mut self, policy: ExpiryPolicy) -> Self {
        self.expiry = Some(policy);
        self
    }

    pub fn arp(&self) -> &ArpAnalyzer {
        &self.arp
    }

    pub fn hosts(&self) -> &HostTable {
        self.arp.hosts()
    }

    /// Frames dropped because we sent them
    pub fn own_frames(&self) -> u64 {
        self.own_frames
    }

    /// Frames that were not ARP
    pub fn other_frames(&self) -> u64 {
        self.other_frames
    }

    /// Analyze one captured frame
    pub fn analyze<I>(&mut self, packet: &Packet, injector: &mut I) -> Result<Action>
    where
        I: Injector + ?Sized,
    {
        self.run_expiry(packet.timestamp_ms);

        let frame = EthernetFrame::from_bytes(packet.data())?;
        if !self.interface_mac.is_zero() && frame.source == self.interface_mac {
            trace!("ignoring frame from our own address");
            self.own_frames += 1;
            return Ok(Action::Ignored);
        }

        match frame.ethertype {
            EtherType::ARP => {
                let flow = Flow::new(
                    self.interface.as_str(),
                    self.interface_mac,
                    frame.source,
                    packet.timestamp_ms,
                );
                self.arp.analyze(&flow, &frame.payload, injector)
            }
            other => {
                trace!("ignoring {} frame", other);
                self.other_frames += 1;
                Ok(Action::Ignored)
            }
        }
    }

    /// Analyze a frame, logging instead of returning errors
    pub fn handle_packet<I>(&mut self, packet: &Packet, injector: &mut I)
    where
        I: Injector + ?Sized,
    {
        match self.analyze(packet, injector) {
            Ok(_) => {}
            Err(Error::PacketParsing(e)) => debug!("dropping packet: {}", e),
            Err(e) => warn!("{}", e),
        }
    }

    fn run_expiry(&mut self, now: u64) {
        let Some(policy) = self.expiry else {
            return;
        };
        match self.next_expiry {
            Some(due) if now < due => {}
            Some(_) => {
                let cutoff = now.saturating_sub(policy.ttl_ms);
                let expired = self.arp.hosts_mut().expire(cutoff);
                if expired > 0 {
                    debug!("expired {} hosts", expired);
                }
                self.next_expiry = Some(now.saturating_add(policy.interval_ms));
            }
            None => self.next_expiry = Some(now.saturating_add(policy.interval_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flytrap_core::{RecordingInjector, Scope};
    use flytrap_packet::ArpPacket;
    use std::net::Ipv4Addr;

    const OURS: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    const PEER: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn analyzer() -> FrameAnalyzer {
        FrameAnalyzer::with_link(
            "eth0",
            OURS,
            ArpAnalyzer::new(HostTable::new(), Scope::unrestricted()),
        )
    }

    fn frame(src: MacAddr, ethertype: EtherType, payload: Vec<u8>, when: u64) -> Packet {
        let bytes = EthernetFrame::new(MacAddr::BROADCAST, src, ethertype, payload).to_bytes();
        Packet::new("trace.pcap".to_string(), when, bytes)
    }

    fn who_has(target: Ipv4Addr, when: u64) -> Packet {
        let arp = ArpPacket::new_request(PEER, Ipv4Addr::new(10, 0, 0, 1), target);
        frame(PEER, EtherType::ARP, arp.serialize(), when)
    }

    #[test]
    fn test_arp_frame_reaches_analyzer() {
        let mut analyzer = analyzer();
        let mut injector = RecordingInjector::new();
        let target = Ipv4Addr::new(10, 0, 0, 77);

        for t in [0, 1_000, 2_000] {
            let action = analyzer.analyze(&who_has(target, t), &mut injector).unwrap();
            assert_eq!(action, Action::Observed);
        }
        let action = analyzer.analyze(&who_has(target, 3_000), &mut injector).unwrap();
        assert_eq!(action, Action::Replied);

        let (flow, _) = &injector.sent[0];
        assert_eq!(flow.interface, "eth0");
        assert_eq!(flow.interface_mac, OURS);
        assert_eq!(flow.peer_mac, PEER);
        assert_eq!(flow.timestamp_ms, 3_000);
    }

    #[test]
    fn test_padded_arp_frame() {
        let mut analyzer = analyzer();
        let mut injector = RecordingInjector::new();

        // to_bytes pads to 60 bytes; the trailer must not confuse the parser
        let packet = who_has(Ipv4Addr::new(10, 0, 0, 77), 0);
        assert_eq!(packet.data.len(), 60);
        assert_eq!(
            analyzer.analyze(&packet, &mut injector).unwrap(),
            Action::Observed
        );
    }

    #[test]
    fn test_own_frames_are_dropped() {
        let mut analyzer = analyzer();
        let mut injector = RecordingInjector::new();

        let arp = ArpPacket::new_reply(OURS, Ipv4Addr::new(10, 0, 0, 77), PEER, Ipv4Addr::new(10, 0, 0, 1));
        let packet = frame(OURS, EtherType::ARP, arp.serialize(), 0);

        assert_eq!(analyzer.analyze(&packet, &mut injector).unwrap(), Action::Ignored);
        assert_eq!(analyzer.own_frames(), 1);
        assert!(analyzer.hosts().is_empty());
    }

    #[test]
    fn test_other_ethertypes_are_ignored() {
        let mut analyzer = analyzer();
        let mut injector = RecordingInjector::new();

        let packet = frame(PEER, EtherType::IPv4, vec![0x45; 40], 0);
        assert_eq!(analyzer.analyze(&packet, &mut injector).unwrap(), Action::Ignored);
        assert_eq!(analyzer.other_frames(), 1);
        assert_eq!(analyzer.arp().stats().packets, 0);
    }

    #[test]
    fn test_truncated_frame() {
        let mut analyzer = analyzer();
        let mut injector = RecordingInjector::new();

        let packet = Packet::new("eth0".to_string(), 0, vec![0xff; 10]);
        assert!(matches!(
            analyzer.analyze(&packet, &mut injector),
            Err(Error::PacketParsing(_))
        ));
        // logged and swallowed
        analyzer.handle_packet(&packet, &mut injector);
    }

    #[test]
    fn test_short_arp_payload_in_frame() {
        let mut analyzer = analyzer();
        let mut injector = RecordingInjector::new();

        // a 14 byte header plus 20 bytes of ARP, without padding
        let mut bytes = EthernetFrame::new(MacAddr::BROADCAST, PEER, EtherType::ARP, vec![]).to_bytes();
        bytes.truncate(EthernetFrame::HEADER_SIZE);
        bytes.extend_from_slice(&[0u8; 20]);
        let packet = Packet::new("eth0".to_string(), 0, bytes);

        assert!(matches!(
            analyzer.analyze(&packet, &mut injector),
            Err(Error::PacketParsing(_))
        ));
        assert_eq!(analyzer.arp().stats().malformed, 1);
    }

    #[test]
    fn test_periodic_expiry() {
        let mut analyzer = analyzer().with_expiry(ExpiryPolicy {
            ttl_ms: 10_000,
            interval_ms: 5_000,
        });
        let mut injector = RecordingInjector::new();
        let old = Ipv4Addr::new(10, 0, 0, 50);

        // first packet only schedules the sweep
        analyzer.analyze(&who_has(old, 0), &mut injector).unwrap();
        assert!(analyzer.hosts().get(old).is_some());

        // sweep due at 5000, nothing older than -5000
        analyzer
            .analyze(&who_has(Ipv4Addr::new(10, 0, 0, 51), 5_000), &mut injector)
            .unwrap();
        assert!(analyzer.hosts().get(old).is_some());

        // sweep due at 10000 is still early at 9999
        analyzer
            .analyze(&who_has(Ipv4Addr::new(10, 0, 0, 52), 9_999), &mut injector)
            .unwrap();

        // sweep at 20000 drops everything last seen before 10000
        analyzer
            .analyze(&who_has(Ipv4Addr::new(10, 0, 0, 53), 20_000), &mut injector)
            .unwrap();
        assert!(analyzer.hosts().get(old).is_none());
        assert!(analyzer.hosts().get(Ipv4Addr::new(10, 0, 0, 53)).is_some());
    }

    #[test]
    fn test_expiry_keeps_active_sender() {
        let mut analyzer = analyzer().with_expiry(ExpiryPolicy {
            ttl_ms: 10_000,
            interval_ms: 1_000,
        });
        let mut injector = RecordingInjector::new();
        let asker = Ipv4Addr::new(10, 0, 0, 1);

        // one request a second, well past ttl + interval
        for t in (0..=15_000).step_by(1_000) {
            analyzer
                .analyze(&who_has(Ipv4Addr::new(10, 0, 0, 77), t), &mut injector)
                .unwrap();
        }

        let node = analyzer.hosts().get(asker).unwrap();
        assert_eq!(node.first_seen(), 0);
        assert_eq!(node.last_seen(), 15_000);
        assert_eq!(analyzer.hosts().lookup(asker), Some(PEER));
    }

    #[test]
    fn test_expiry_disabled_by_default() {
        let mut analyzer = analyzer();
        let mut injector = RecordingInjector::new();
        let old = Ipv4Addr::new(10, 0, 0, 50);

        analyzer.analyze(&who_has(old, 0), &mut injector).unwrap();
        analyzer
            .analyze(&who_has(Ipv4Addr::new(10, 0, 0, 51), 10_000_000), &mut injector)
            .unwrap();
        assert!(analyzer.hosts().get(old).is_some());
    }
}
