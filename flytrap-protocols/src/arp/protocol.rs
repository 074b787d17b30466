//! ARP analyzer
//!
//! Learns address bindings from the traffic it sees and answers, on behalf
//! of nobody, for in-scope addresses that keep being asked for.

use std::fmt;
use tracing::{debug, info, trace};
use flytrap_core::{format_millis, Flow, HostTable, Injector, Result, Scope, Verdict};
use flytrap_packet::{ArpOpcode, ArpPacket};

/// What the analyzer did with a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Not an Ethernet/IPv4 ARP packet we act on, or out of scope
    Ignored,
    /// Request accounted for; no reply sent
    Observed,
    /// Request answered with a forged reply
    Replied,
    /// Reply seen; bindings recorded
    Learned,
}

/// ARP Statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArpStats {
    pub packets: u64,
    pub malformed: u64,
    pub ignored: u64,
    pub requests: u64,
    pub replies: u64,
    pub out_of_scope: u64,
    pub claims: u64,
    pub refreshes: u64,
    pub forged: u64,
    pub inject_errors: u64,
}

impl fmt::Display for ArpStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packets ({} malformed, {} ignored), {} requests ({} out of scope), \
             {} replies, {} claims, {} refreshes, {} forged ({} failed)",
            self.packets,
            self.malformed,
            self.ignored,
            self.requests,
            self.out_of_scope,
            self.replies,
            self.claims,
            self.refreshes,
            self.forged,
            self.inject_errors
        )
    }
}

/// Address Resolution Protocol analyzer
#[derive(Debug)]
pub struct ArpAnalyzer {
    hosts: HostTable,
    scope: Scope,
    stats: ArpStats,
}

impl ArpAnalyzer {
    pub fn new(hosts: HostTable, scope: Scope) -> Self {
        Self {
            hosts,
            scope,
            stats: ArpStats::default(),
        }
    }

    pub fn hosts(&self) -> &HostTable {
        &self.hosts
    }

    pub fn hosts_mut(&mut self) -> &mut HostTable {
        &mut self.hosts
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn stats(&self) -> &ArpStats {
        &self.stats
    }

    /// Process one ARP payload
    ///
    /// Short payloads are an error the caller is expected to log and move
    /// past; everything else that is not actionable comes back as
    /// [`Action::Ignored`].
    pub fn analyze<I>(&mut self, flow: &Flow, payload: &[u8], injector: &mut I) -> Result<Action>
    where
        I: Injector + ?Sized,
    {
        self.stats.packets += 1;

        let arp = match ArpPacket::parse(payload) {
            Ok(arp) => arp,
            Err(e) => {
                self.stats.malformed += 1;
                info!(
                    "{} short ARP packet ({} < {})",
                    format_millis(flow.timestamp_ms),
                    payload.len(),
                    ArpPacket::SIZE
                );
                return Err(e);
            }
        };

        if !arp.is_ethernet_ipv4() {
            trace!("ARP packet ignored");
            self.stats.ignored += 1;
            return Ok(Action::Ignored);
        }

        match arp.operation {
            ArpOpcode::Request => {
                trace!(
                    "who-has {} tell {}",
                    arp.target_proto_addr,
                    arp.sender_proto_addr
                );
                self.stats.requests += 1;
                self.handle_request(flow, &arp, injector)
            }
            ArpOpcode::Reply => {
                trace!("{} is-at {}", arp.sender_proto_addr, arp.sender_hw_addr);
                self.stats.replies += 1;
                let when = flow.timestamp_ms;
                self.hosts
                    .register(arp.sender_proto_addr, arp.sender_hw_addr, when)?;
                self.hosts
                    .register(arp.target_proto_addr, arp.target_hw_addr, when)?;
                Ok(Action::Learned)
            }
            ArpOpcode::Unknown(op) => {
                info!(
                    "{} unknown ARP operation 0x{:04x}",
                    format_millis(flow.timestamp_ms),
                    op
                );
                self.stats.ignored += 1;
                Ok(Action::Ignored)
            }
        }
    }

    fn handle_request<I>(&mut self, flow: &Flow, arp: &ArpPacket, injector: &mut I) -> Result<Action>
    where
        I: Injector + ?Sized,
    {
        let when = flow.timestamp_ms;
        let target = arp.target_proto_addr;

        if !self.scope.contains(target) {
            trace!("target address {} is out of bounds", target);
            self.stats.out_of_scope += 1;
            return Ok(Action::Ignored);
        }

        self.hosts
            .register(arp.sender_proto_addr, arp.sender_hw_addr, when)?;

        let verdict = self.hosts.solicit(target, when)?;
        match verdict {
            Verdict::Claimed => self.stats.claims += 1,
            Verdict::Refreshed => self.stats.refreshes += 1,
            Verdict::Reserved | Verdict::Watching { .. } => {}
        }
        if !verdict.wants_reply() {
            return Ok(Action::Observed);
        }

        // we are `target`, answering the original asker
        let reply = ArpPacket::new_reply(
            flow.interface_mac,
            target,
            arp.sender_hw_addr,
            arp.sender_proto_addr,
        );
        if let Err(e) = injector.reply(flow, &reply.serialize()) {
            self.stats.inject_errors += 1;
            return Err(e);
        }

        self.stats.forged += 1;
        debug!(
            ip = %target,
            "{} is-at {} (told {})",
            target,
            flow.interface_mac,
            arp.sender_proto_addr
        );
        Ok(Action::Replied)
    }
}
