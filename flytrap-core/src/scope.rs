//! Target scope built from include and exclude address sets

use std::net::Ipv4Addr;

use crate::AddressSet;

/// Decides which target addresses the daemon may claim
///
/// An address is in scope when it is in the include set (or there is no
/// include set) and not in the exclude set.
#[derive(Debug, Default)]
pub struct Scope {
    include: Option<AddressSet>,
    exclude: Option<AddressSet>,
}

impl Scope {
    /// A scope that filters nothing
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn new(include: Option<AddressSet>, exclude: Option<AddressSet>) -> Self {
        Self { include, exclude }
    }

    pub fn include(&self) -> Option<&AddressSet> {
        self.include.as_ref()
    }

    pub fn exclude(&self) -> Option<&AddressSet> {
        self.exclude.as_ref()
    }

    /// True when no filtering is configured
    pub fn is_unrestricted(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let included = self.include.as_ref().map_or(true, |set| set.contains(addr));
        let excluded = self.exclude.as_ref().map_or(false, |set| set.contains(addr));
        included && !excluded
    }
}
