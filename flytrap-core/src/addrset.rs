//! Range-aggregating IPv4 address set
//!
//! Ranges are inserted into a radix trie that consumes `bits` address bits
//! per level. Whenever a subtree covers its whole subnet it is collapsed into
//! a single leaf, so contiguous ranges merge into the smallest number of
//! covering prefixes as they are inserted.
//!
//! Two limits trade lookup precision against memory:
//!
//! - nodes shorter than `min_prefix` are never collapsed, which splits very
//!   large ranges into several leaves;
//! - nodes are collapsed unconditionally once descending would exceed
//!   `max_prefix`, which rounds small ranges up.
//!
//! The root is never aggregated by the bottom-up pass.

use std::fmt;
use std::net::Ipv4Addr;
use tracing::trace;

use crate::{child_slots, Error, Result};

/// Default number of address bits consumed per trie level
pub const DEFAULT_BITS: u8 = 4;

/// Default minimum prefix length of an aggregated leaf
pub const DEFAULT_MIN_PREFIX: u8 = 8;

/// Default maximum prefix length before ranges are rounded up
pub const DEFAULT_MAX_PREFIX: u8 = 32;

/// Shape of an address-set trie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationParams {
    /// Address bits consumed per level (branching factor is `2^bits`)
    pub bits: u8,
    /// Nodes with a shorter prefix are never collapsed
    pub min_prefix: u8,
    /// Nodes are force-collapsed once `prefix + bits` exceeds this
    pub max_prefix: u8,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            bits: DEFAULT_BITS,
            min_prefix: DEFAULT_MIN_PREFIX,
            max_prefix: DEFAULT_MAX_PREFIX,
        }
    }
}

impl AggregationParams {
    /// Check that every insertion terminates at a prefix length <= 32
    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.bits) {
            return Err(Error::invalid_parameter("bits", "must be between 1 and 8"));
        }
        if self.max_prefix > 32 {
            return Err(Error::invalid_parameter("max_prefix", "must not exceed 32"));
        }
        if self.min_prefix > self.max_prefix {
            return Err(Error::invalid_parameter(
                "min_prefix",
                "must not exceed max_prefix",
            ));
        }
        // first trie depth at which a node may be collapsed
        let bits = u32::from(self.bits);
        let first_stop = (u32::from(self.min_prefix) + bits - 1) / bits * bits;
        if first_stop > 32 {
            return Err(Error::invalid_parameter(
                "min_prefix",
                "is not reachable with this branching factor",
            ));
        }
        Ok(())
    }

    fn fanout(&self) -> usize {
        1 << self.bits
    }

    fn index_mask(&self) -> u32 {
        (1u32 << self.bits) - 1
    }
}

#[derive(Debug)]
struct Node {
    base: u32,
    prefix_len: u8,
    /// Addresses subsumed by this subtree
    coverage: u64,
    /// Empty for leaves
    children: Vec<Option<Box<Node>>>,
}

impl Node {
    fn new(base: u32, prefix_len: u8) -> Self {
        Self {
            base,
            prefix_len,
            coverage: 0,
            children: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of addresses in this node's subnet
    fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// Last address of this node's subnet
    fn last(&self) -> u32 {
        self.base | host_mask(self.prefix_len)
    }

    fn is_full(&self) -> bool {
        self.coverage >= self.size()
    }

    /// Turn the node into a leaf covering its whole subnet
    fn collapse(&mut self) {
        if !self.is_leaf() {
            trace!(
                "aggregating {}/{}",
                Ipv4Addr::from(self.base),
                self.prefix_len
            );
        }
        self.children = Vec::new();
        self.coverage = self.size();
    }

    fn insert(&mut self, first: u32, last: u32, params: &AggregationParams) -> Result<()> {
        // clip to our subnet so the caller doesn't have to
        let first = first.max(self.base);
        let last = last.min(self.last());
        if first > last || self.is_full() {
            return Ok(());
        }

        if self.prefix_len >= params.min_prefix
            && ((first == self.base && last == self.last())
                || u32::from(self.prefix_len) + u32::from(params.bits)
                    > u32::from(params.max_prefix))
        {
            self.collapse();
            return Ok(());
        }

        let child_len = self.prefix_len + params.bits;
        let shift = 32 - u32::from(child_len);
        let fsub = (first >> shift) & params.index_mask();
        let lsub = (last >> shift) & params.index_mask();

        if self.is_leaf() {
            self.children = child_slots(params.fanout())?;
        }

        let base = self.base;
        let mut coverage = self.coverage;
        for i in fsub..=lsub {
            let slot = &mut self.children[i as usize];
            let child =
                slot.get_or_insert_with(|| Box::new(Node::new(base | (i << shift), child_len)));
            let before = child.coverage;
            let result = child.insert(first, last, params);
            coverage = coverage - before + child.coverage;
            if let Err(e) = result {
                self.coverage = coverage;
                return Err(e);
            }
        }
        self.coverage = coverage;

        if self.prefix_len > 0 && self.prefix_len >= params.min_prefix && self.is_full() {
            self.collapse();
        }

        Ok(())
    }

    fn contains(&self, addr: u32, params: &AggregationParams) -> bool {
        if addr < self.base || addr > self.last() {
            return false;
        }
        if self.is_full() {
            return true;
        }
        if self.is_leaf() {
            return false;
        }
        let shift = 32 - u32::from(self.prefix_len + params.bits);
        let sub = ((addr >> shift) & params.index_mask()) as usize;
        self.children[sub]
            .as_deref()
            .map_or(false, |child| child.contains(addr, params))
    }

    fn collect_prefixes(&self, out: &mut Vec<(Ipv4Addr, u8)>) {
        if self.is_leaf() {
            if self.is_full() {
                out.push((Ipv4Addr::from(self.base), self.prefix_len));
            }
            return;
        }
        for child in self.children.iter().flatten() {
            child.collect_prefixes(out);
        }
    }
}

/// Host mask (inverse netmask) for a prefix length
fn host_mask(prefix_len: u8) -> u32 {
    u32::MAX.checked_shr(u32::from(prefix_len)).unwrap_or(0)
}

/// A set of IPv4 addresses built from ranges
#[derive(Debug)]
pub struct AddressSet {
    root: Node,
    params: AggregationParams,
}

impl AddressSet {
    /// Create an empty set with the default aggregation parameters
    pub fn new() -> Self {
        Self {
            root: Node::new(0, 0),
            params: AggregationParams::default(),
        }
    }

    /// Create an empty set with custom aggregation parameters
    pub fn with_params(params: AggregationParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            root: Node::new(0, 0),
            params,
        })
    }

    pub fn params(&self) -> &AggregationParams {
        &self.params
    }

    /// Insert the inclusive range `[first, last]`
    pub fn insert(&mut self, first: impl Into<u32>, last: impl Into<u32>) -> Result<()> {
        let (first, last) = (first.into(), last.into());
        if first > last {
            return Err(Error::invalid_parameter(
                "range".to_string(),
                format!(
                    "{} is greater than {}",
                    Ipv4Addr::from(first),
                    Ipv4Addr::from(last)
                ),
            ));
        }
        trace!(
            "inserting {}-{}",
            Ipv4Addr::from(first),
            Ipv4Addr::from(last)
        );
        self.root.insert(first, last, &self.params)
    }

    /// Insert a CIDR block
    pub fn insert_net(&mut self, addr: Ipv4Addr, prefix_len: u8) -> Result<()> {
        if prefix_len > 32 {
            return Err(Error::invalid_parameter(
                "prefix_len".to_string(),
                format!("{} exceeds 32", prefix_len),
            ));
        }
        let first = u32::from(addr) & !host_mask(prefix_len);
        self.insert(first, first | host_mask(prefix_len))
    }

    /// Remove a range of addresses.
    ///
    /// Splitting aggregated leaves is not supported; this always fails.
    pub fn remove(&mut self, first: impl Into<u32>, last: impl Into<u32>) -> Result<()> {
        let (first, last) = (first.into(), last.into());
        Err(Error::NotImplemented(format!(
            "removing {}-{} from an address set",
            Ipv4Addr::from(first),
            Ipv4Addr::from(last)
        )))
    }

    /// Check whether an address is a member of the set
    pub fn contains(&self, addr: impl Into<u32>) -> bool {
        self.root.contains(addr.into(), &self.params)
    }

    /// Number of addresses in the set
    pub fn count(&self) -> u64 {
        self.root.coverage
    }

    pub fn is_empty(&self) -> bool {
        self.root.coverage == 0
    }

    /// Aggregated prefixes in address order
    pub fn prefixes(&self) -> Vec<(Ipv4Addr, u8)> {
        let mut out = Vec::new();
        self.root.collect_prefixes(&mut out);
        out
    }
}

impl Default for AddressSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AddressSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (addr, plen) in self.prefixes() {
            if plen < 32 {
                writeln!(f, "{}/{}", addr, plen)?;
            } else {
                writeln!(f, "{}", addr)?;
            }
        }
        Ok(())
    }
}
