//! Per-address observation state and the claiming state machine
//!
//! Every IPv4 address the daemon hears about gets a leaf in a 16-ary trie
//! keyed by the eight nibbles of the address. Leaves remember the link-layer
//! address the host last announced and how many unanswered requests have
//! targeted it in the current burst. An address that keeps being asked for
//! without anybody answering is claimed, and from then on the daemon answers
//! for it.
//!
//! All times are packet timestamps in milliseconds, so a replayed trace makes
//! the same decisions as live traffic.

use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, trace};

use crate::{child_slots, format_millis, format_timestamp, Error, MacAddr, Result};

/// Address bits consumed per trie level
const NIBBLE: u8 = 4;

/// Children per internal node
const FANOUT: usize = 1 << NIBBLE;

/// Requests needed before an address may be claimed
pub const DEFAULT_BURST_REQUESTS: u32 = 3;

/// Minimum span of a burst before claiming, in milliseconds
pub const DEFAULT_BURST_WINDOW_MS: u64 = 3_000;

/// Silence after which a burst is forgotten, in milliseconds
pub const DEFAULT_STALE_AFTER_MS: u64 = 30_000;

/// Thresholds of the claiming state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimPolicy {
    pub burst_requests: u32,
    pub burst_window_ms: u64,
    pub stale_after_ms: u64,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            burst_requests: DEFAULT_BURST_REQUESTS,
            burst_window_ms: DEFAULT_BURST_WINDOW_MS,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
        }
    }
}

/// State kept for an exact address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeafState {
    /// Last announced link-layer address, zero when unknown
    pub link_addr: MacAddr,
    /// Requests seen in the current burst
    pub pending_requests: u32,
}

#[derive(Debug)]
enum HostKind {
    Internal { children: Vec<Option<Box<HostNode>>> },
    Leaf(LeafState),
}

/// A node of the host table
#[derive(Debug)]
pub struct HostNode {
    prefix_address: u32,
    prefix_length: u8,
    first_seen: u64,
    last_seen: u64,
    claimed: bool,
    reserved: bool,
    kind: HostKind,
}

/// Outcome of a request for a target address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The address is reserved and is never answered for
    Reserved,
    /// The address was already claimed; answer again
    Refreshed,
    /// The address has just been claimed; answer
    Claimed,
    /// Still counting requests in the current burst
    Watching { pending: u32 },
}

impl Verdict {
    /// Whether the caller should forge a reply
    pub fn wants_reply(&self) -> bool {
        matches!(self, Verdict::Refreshed | Verdict::Claimed)
    }
}

impl HostNode {
    fn root() -> Self {
        Self {
            prefix_address: 0,
            prefix_length: 0,
            first_seen: 0,
            last_seen: 0,
            claimed: false,
            reserved: false,
            kind: HostKind::Internal {
                children: (0..FANOUT).map(|_| None).collect(),
            },
        }
    }

    fn new(prefix_address: u32, prefix_length: u8, when: u64) -> Result<Self> {
        let kind = if prefix_length == 32 {
            HostKind::Leaf(LeafState::default())
        } else {
            HostKind::Internal {
                children: child_slots(FANOUT)?,
            }
        };
        Ok(Self {
            prefix_address,
            prefix_length,
            first_seen: when,
            last_seen: when,
            claimed: false,
            reserved: false,
            kind,
        })
    }

    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.prefix_address)
    }

    pub fn prefix_length(&self) -> u8 {
        self.prefix_length
    }

    pub fn first_seen(&self) -> u64 {
        self.first_seen
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, HostKind::Leaf(_))
    }

    /// Leaf state, `None` for internal nodes
    pub fn leaf(&self) -> Option<&LeafState> {
        match &self.kind {
            HostKind::Leaf(state) => Some(state),
            HostKind::Internal { .. } => None,
        }
    }

    /// Requests counted in the current burst (0 for internal nodes)
    pub fn pending_requests(&self) -> u32 {
        self.leaf().map_or(0, |state| state.pending_requests)
    }

    fn child(&self, index: usize) -> Option<&HostNode> {
        match &self.kind {
            HostKind::Internal { children } => children[index].as_deref(),
            HostKind::Leaf(_) => None,
        }
    }

    /// Find or create the leaf for `addr` below this node
    fn descend(&mut self, addr: u32, when: u64) -> Result<&mut HostNode> {
        let base = self.prefix_address;
        let child_len = self.prefix_length + NIBBLE;
        match self.kind {
            HostKind::Leaf(_) => Ok(self),
            HostKind::Internal { ref mut children } => {
                let shift = 32 - u32::from(child_len);
                let sub = (addr >> shift) as usize % FANOUT;
                let slot = &mut children[sub];
                let child = match slot.take() {
                    Some(child) => child,
                    None => {
                        let child = HostNode::new(base | ((sub as u32) << shift), child_len, when)?;
                        trace!("added node {:08x}/{}", child.prefix_address, child.prefix_length);
                        if child.is_leaf() {
                            debug!("inserted {}", child.address());
                        }
                        Box::new(child)
                    }
                };
                slot.insert(child).descend(addr, when)
            }
        }
    }

    /// Run one request for this address through the claiming state machine
    fn observe_request(&mut self, when: u64, policy: &ClaimPolicy) -> Result<Verdict> {
        let addr = Ipv4Addr::from(self.prefix_address);
        let state = match &mut self.kind {
            HostKind::Leaf(state) => state,
            HostKind::Internal { .. } => {
                return Err(Error::protocol(format!("{} is not a host entry", addr)));
            }
        };

        if self.reserved {
            trace!("target address {} is reserved", addr);
            state.pending_requests = 0;
            return Ok(Verdict::Reserved);
        }

        if self.claimed {
            trace!("refreshing {}", addr);
            state.pending_requests = 0;
            self.last_seen = when;
            return Ok(Verdict::Refreshed);
        }

        // new or stale burst, start over
        if state.pending_requests == 0
            || when.saturating_sub(self.last_seen) >= policy.stale_after_ms
        {
            state.pending_requests = 1;
            self.first_seen = when;
            self.last_seen = when;
            return Ok(Verdict::Watching { pending: 1 });
        }

        if state.pending_requests >= policy.burst_requests
            && when.saturating_sub(self.first_seen) >= policy.burst_window_ms
        {
            debug!(ip = %addr, "claiming {} nreq = {}", addr, state.pending_requests);
            self.claimed = true;
            state.pending_requests = 0;
            self.last_seen = when;
            return Ok(Verdict::Claimed);
        }

        state.pending_requests = state.pending_requests.saturating_add(1);
        self.last_seen = when;
        Ok(Verdict::Watching {
            pending: state.pending_requests,
        })
    }

    /// Remove stale, non-reserved leaves below this node
    fn expire(&mut self, cutoff: u64) -> usize {
        let HostKind::Internal { children } = &mut self.kind else {
            return 0;
        };
        let mut removed = 0;
        for slot in children.iter_mut() {
            let expired = match slot.as_deref_mut() {
                Some(child) if child.is_leaf() => !child.reserved && child.last_seen < cutoff,
                Some(child) => {
                    removed += child.expire(cutoff);
                    false
                }
                None => false,
            };
            if expired {
                if let Some(child) = slot.take() {
                    debug!(
                        "expiring {} (last seen {})",
                        child.address(),
                        format_millis(child.last_seen)
                    );
                    removed += 1;
                }
            }
        }
        removed
    }

    fn count_leaves(&self, keep: &dyn Fn(&HostNode) -> bool) -> usize {
        match &self.kind {
            HostKind::Leaf(_) => usize::from(keep(self)),
            HostKind::Internal { children } => children
                .iter()
                .flatten()
                .map(|child| child.count_leaves(keep))
                .sum(),
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a HostNode>) {
        match &self.kind {
            HostKind::Leaf(_) => out.push(self),
            HostKind::Internal { children } => {
                for child in children.iter().flatten() {
                    child.collect_leaves(out);
                }
            }
        }
    }
}

impl fmt::Display for HostNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_leaf() {
            return write!(f, "{}/{}", self.address(), self.prefix_length);
        }
        write!(f, "{}", self.address())?;
        match self.leaf().map(|state| state.link_addr) {
            Some(mac) if !mac.is_zero() => write!(f, " at {}", mac)?,
            _ => write!(f, " at unknown")?,
        }
        if self.claimed {
            write!(f, " claimed")?;
        }
        if self.reserved {
            write!(f, " reserved")?;
        }
        if self.last_seen != 0 {
            write!(f, " last seen {}", format_timestamp(self.last_seen))?;
        }
        Ok(())
    }
}

/// Table of every address seen on the monitored segment
///
/// Created once at startup and owned by the analyzer; dropping it frees the
/// whole tree.
#[derive(Debug)]
pub struct HostTable {
    root: HostNode,
    policy: ClaimPolicy,
}

impl HostTable {
    pub fn new() -> Self {
        Self::with_policy(ClaimPolicy::default())
    }

    pub fn with_policy(policy: ClaimPolicy) -> Self {
        Self {
            root: HostNode::root(),
            policy,
        }
    }

    pub fn policy(&self) -> &ClaimPolicy {
        &self.policy
    }

    /// Find or create the leaf for `addr`; new nodes are stamped with `when`
    pub fn insert(&mut self, addr: Ipv4Addr, when: u64) -> Result<&mut HostNode> {
        self.root.descend(u32::from(addr), when)
    }

    /// Record that `ip` currently resolves to `mac`
    pub fn register(&mut self, ip: Ipv4Addr, mac: MacAddr, when: u64) -> Result<()> {
        let node = self.insert(ip, when)?;
        node.last_seen = node.last_seen.max(when);
        if let HostKind::Leaf(state) = &mut node.kind {
            if state.link_addr != mac {
                if state.link_addr.is_zero() {
                    debug!(ip = %ip, "{} registered at {}", ip, mac);
                } else {
                    debug!(ip = %ip, "{} moved from {} to {}", ip, state.link_addr, mac);
                }
                state.link_addr = mac;
            }
            state.pending_requests = 0;
        }
        Ok(())
    }

    /// Leaf for `ip`, if the address has been seen
    pub fn get(&self, ip: Ipv4Addr) -> Option<&HostNode> {
        let o = ip.octets();
        let path = [
            o[0] >> 4,
            o[0] & 0xf,
            o[1] >> 4,
            o[1] & 0xf,
            o[2] >> 4,
            o[2] & 0xf,
            o[3] >> 4,
            o[3] & 0xf,
        ];
        path.iter()
            .try_fold(&self.root, |node, &nibble| node.child(usize::from(nibble)))
    }

    /// Link-layer address `ip` resolves to, if known
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        trace!("lookup {}", ip);
        let mac = self
            .get(ip)
            .and_then(HostNode::leaf)
            .map(|state| state.link_addr)
            .filter(|mac| !mac.is_zero())?;
        trace!("{} is at {}", ip, mac);
        Some(mac)
    }

    /// Mark `ip` as never to be claimed
    pub fn reserve(&mut self, ip: Ipv4Addr) -> Result<()> {
        trace!("reserving {}", ip);
        self.insert(ip, 0)?.reserved = true;
        Ok(())
    }

    /// Account for a request targeting `target` at time `when`
    pub fn solicit(&mut self, target: Ipv4Addr, when: u64) -> Result<Verdict> {
        let policy = self.policy;
        let node = self.insert(target, when)?;
        if node.last_seen != 0 {
            debug!("{}: last seen {}", target, format_millis(node.last_seen));
        }
        node.observe_request(when, &policy)
    }

    /// Drop every non-reserved leaf last seen before `cutoff`
    pub fn expire(&mut self, cutoff: u64) -> usize {
        self.root.expire(cutoff)
    }

    /// Leaves in address order
    pub fn leaves(&self) -> Vec<&HostNode> {
        let mut out = Vec::new();
        self.root.collect_leaves(&mut out);
        out
    }

    /// Number of addresses in the table
    pub fn len(&self) -> usize {
        self.root.count_leaves(&|_| true)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of addresses currently claimed
    pub fn claimed_count(&self) -> usize {
        self.root.count_leaves(&|node| node.claimed)
    }
}

impl Default for HostTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HostTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for leaf in self.leaves() {
            writeln!(f, "{}", leaf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

    fn solicit_all(table: &mut HostTable, times: &[u64]) -> Vec<Verdict> {
        times
            .iter()
            .map(|&t| table.solicit(TARGET, t).unwrap())
            .collect()
    }

    #[test]
    fn test_insert_reaches_exact_leaf() {
        let mut table = HostTable::new();
        for addr in [
            Ipv4Addr::new(0, 0, 0, 0),
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(255, 255, 255, 255),
            Ipv4Addr::new(172, 31, 240, 17),
        ] {
            let node = table.insert(addr, 42).unwrap();
            assert_eq!(node.prefix_length(), 32);
            assert_eq!(node.address(), addr);

            let node = table.get(addr).unwrap();
            assert!(node.is_leaf());
            assert_eq!(node.address(), addr);
            assert_eq!(node.first_seen(), 42);
        }
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_insert_existing_keeps_timestamps() {
        let mut table = HostTable::new();
        table.insert(TARGET, 100).unwrap();
        let node = table.insert(TARGET, 900).unwrap();
        assert_eq!(node.first_seen(), 100);
        assert_eq!(node.last_seen(), 100);
    }

    #[test]
    fn test_lookup_unknown() {
        let mut table = HostTable::new();
        assert_eq!(table.lookup(TARGET), None);

        // present but never announced
        table.insert(TARGET, 1).unwrap();
        assert!(table.get(TARGET).is_some());
        assert_eq!(table.lookup(TARGET), None);
        assert_eq!(table.lookup(Ipv4Addr::new(192, 168, 1, 2)), None);
    }

    #[test]
    fn test_register_and_move() {
        let mut table = HostTable::new();
        let first = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let second = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

        table.register(TARGET, first, 10).unwrap();
        assert_eq!(table.lookup(TARGET), Some(first));

        table.register(TARGET, second, 20).unwrap();
        assert_eq!(table.lookup(TARGET), Some(second));
    }

    #[test]
    fn test_register_refreshes_last_seen() {
        let mut table = HostTable::new();
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        table.register(TARGET, mac, 1_000).unwrap();
        table.register(TARGET, mac, 50_000).unwrap();
        let node = table.get(TARGET).unwrap();
        assert_eq!(node.first_seen(), 1_000);
        assert_eq!(node.last_seen(), 50_000);

        // a late packet does not move it backwards
        table.register(TARGET, mac, 40_000).unwrap();
        assert_eq!(table.get(TARGET).unwrap().last_seen(), 50_000);

        assert_eq!(table.expire(10_000), 0);
        assert!(table.get(TARGET).is_some());
    }

    #[test]
    fn test_register_resets_pending() {
        let mut table = HostTable::new();
        solicit_all(&mut table, &[0, 100]);
        assert_eq!(table.get(TARGET).unwrap().pending_requests(), 2);

        table
            .register(TARGET, MacAddr([2, 0, 0, 0, 0, 1]), 200)
            .unwrap();
        assert_eq!(table.get(TARGET).unwrap().pending_requests(), 0);
    }

    #[test]
    fn test_two_requests_never_claim() {
        let mut table = HostTable::new();
        let verdicts = solicit_all(&mut table, &[0, 2_999]);
        assert_eq!(
            verdicts,
            vec![
                Verdict::Watching { pending: 1 },
                Verdict::Watching { pending: 2 }
            ]
        );
        assert!(!table.get(TARGET).unwrap().is_claimed());
    }

    #[test]
    fn test_burst_claims_on_fourth_request() {
        let mut table = HostTable::new();
        let verdicts = solicit_all(&mut table, &[0, 1_000, 2_000, 3_000]);
        assert_eq!(
            verdicts,
            vec![
                Verdict::Watching { pending: 1 },
                Verdict::Watching { pending: 2 },
                Verdict::Watching { pending: 3 },
                Verdict::Claimed,
            ]
        );
        let node = table.get(TARGET).unwrap();
        assert!(node.is_claimed());
        assert_eq!(node.pending_requests(), 0);
        assert_eq!(node.last_seen(), 3_000);
    }

    #[test]
    fn test_fast_burst_waits_for_window() {
        let mut table = HostTable::new();
        let verdicts = solicit_all(&mut table, &[0, 100, 200, 300, 2_999]);
        assert!(verdicts.iter().all(|v| !v.wants_reply()));
        assert!(!table.get(TARGET).unwrap().is_claimed());

        assert_eq!(table.solicit(TARGET, 3_000).unwrap(), Verdict::Claimed);
    }

    #[test]
    fn test_stale_burst_restarts() {
        let mut table = HostTable::new();
        solicit_all(&mut table, &[0, 1_000]);

        let verdict = table.solicit(TARGET, 31_000).unwrap();
        assert_eq!(verdict, Verdict::Watching { pending: 1 });
        let node = table.get(TARGET).unwrap();
        assert_eq!(node.pending_requests(), 1);
        assert_eq!(node.first_seen(), 31_000);
    }

    #[test]
    fn test_stale_gap_is_inclusive() {
        let mut table = HostTable::new();
        solicit_all(&mut table, &[0]);
        assert_eq!(
            table.solicit(TARGET, 30_000).unwrap(),
            Verdict::Watching { pending: 1 }
        );
    }

    #[test]
    fn test_claimed_address_refreshes() {
        let mut table = HostTable::new();
        solicit_all(&mut table, &[0, 1_000, 2_000, 3_000]);

        assert_eq!(table.solicit(TARGET, 100_000).unwrap(), Verdict::Refreshed);
        let node = table.get(TARGET).unwrap();
        assert_eq!(node.last_seen(), 100_000);
        assert!(node.is_claimed());

        table.insert(Ipv4Addr::new(192, 168, 7, 1), 0).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.claimed_count(), 1);
    }

    #[test]
    fn test_reserved_never_claims() {
        let mut table = HostTable::new();
        table.reserve(TARGET).unwrap();

        let times: Vec<u64> = (0..20).map(|i| i * 1_000).collect();
        let verdicts = solicit_all(&mut table, &times);
        assert!(verdicts.iter().all(|v| *v == Verdict::Reserved));

        let node = table.get(TARGET).unwrap();
        assert!(node.is_reserved());
        assert!(!node.is_claimed());
        assert_eq!(node.pending_requests(), 0);
    }

    #[test]
    fn test_out_of_order_timestamps_do_not_underflow() {
        let mut table = HostTable::new();
        solicit_all(&mut table, &[5_000]);
        assert_eq!(
            table.solicit(TARGET, 1_000).unwrap(),
            Verdict::Watching { pending: 2 }
        );
    }

    #[test]
    fn test_custom_policy() {
        let mut table = HostTable::with_policy(ClaimPolicy {
            burst_requests: 1,
            burst_window_ms: 0,
            stale_after_ms: 30_000,
        });
        let verdicts = solicit_all(&mut table, &[0, 1]);
        assert_eq!(verdicts, vec![Verdict::Watching { pending: 1 }, Verdict::Claimed]);
    }

    #[test]
    fn test_expire_removes_old_leaves() {
        let mut table = HostTable::new();
        let old = Ipv4Addr::new(10, 0, 0, 1);
        let fresh = Ipv4Addr::new(10, 0, 0, 2);
        let kept = Ipv4Addr::new(10, 0, 0, 3);
        table.insert(old, 1_000).unwrap();
        table.insert(fresh, 50_000).unwrap();
        table.reserve(kept).unwrap();

        assert_eq!(table.expire(10_000), 1);
        assert!(table.get(old).is_none());
        assert!(table.get(fresh).is_some());
        assert!(table.get(kept).is_some());
        assert_eq!(table.len(), 2);

        // the slot can be reused afterwards
        table.insert(old, 60_000).unwrap();
        assert_eq!(table.get(old).unwrap().first_seen(), 60_000);
    }

    #[test]
    fn test_leaves_are_ordered() {
        let mut table = HostTable::new();
        for addr in [
            Ipv4Addr::new(10, 0, 0, 9),
            Ipv4Addr::new(9, 255, 0, 1),
            Ipv4Addr::new(10, 0, 0, 1),
        ] {
            table.insert(addr, 1).unwrap();
        }
        let order: Vec<Ipv4Addr> = table.leaves().iter().map(|n| n.address()).collect();
        assert_eq!(
            order,
            vec![
                Ipv4Addr::new(9, 255, 0, 1),
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 9),
            ]
        );
    }

    #[test]
    fn test_display() {
        let mut table = HostTable::new();
        table
            .register(TARGET, MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]), 1_000)
            .unwrap();
        table.reserve(Ipv4Addr::new(192, 168, 1, 254)).unwrap();

        let text = table.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "192.168.1.1 at aa:bb:cc:dd:ee:ff last seen 1970-01-01 00:00:01.000"
        );
        assert_eq!(lines[1], "192.168.1.254 at unknown reserved");
        assert_eq!(table.claimed_count(), 0);
    }
}
