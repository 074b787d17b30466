//! Address range syntax
//!
//! Accepted forms: `a.b.c.d`, `a.b.c.d/len` and `a.b.c.d-e.f.g.h`.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use flytrap_core::{AddressSet, Error, Result};
use serde::Deserialize;

/// Inclusive range of IPv4 addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct AddressRange {
    pub first: Ipv4Addr,
    pub last: Ipv4Addr,
}

impl AddressRange {
    pub fn new(first: Ipv4Addr, last: Ipv4Addr) -> Result<Self> {
        if first > last {
            return Err(invalid(
                &format!("{}-{}", first, last),
                "first address is above last",
            ));
        }
        Ok(Self { first, last })
    }

    pub fn single(addr: Ipv4Addr) -> Self {
        Self {
            first: addr,
            last: addr,
        }
    }

    /// Number of addresses in the range
    pub fn size(&self) -> u64 {
        u64::from(u32::from(self.last)) - u64::from(u32::from(self.first)) + 1
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.first <= addr && addr <= self.last
    }

    /// Add the range to an address set
    pub fn insert_into(&self, set: &mut AddressSet) -> Result<()> {
        set.insert(self.first, self.last)
    }
}

fn invalid(input: &str, reason: &str) -> Error {
    Error::InvalidParameter {
        name: format!("range '{}'", input),
        reason: reason.to_string(),
    }
}

fn parse_addr(input: &str, part: &str) -> Result<Ipv4Addr> {
    part.trim()
        .parse()
        .map_err(|_| invalid(input, &format!("'{}' is not an IPv4 address", part.trim())))
}

impl FromStr for AddressRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some((first, last)) = s.split_once('-') {
            let first = parse_addr(s, first)?;
            let last = parse_addr(s, last)?;
            if first > last {
                return Err(invalid(s, "first address is above last"));
            }
            return Ok(Self { first, last });
        }

        if let Some((addr, len)) = s.split_once('/') {
            let addr = u32::from(parse_addr(s, addr)?);
            let len: u8 = len
                .trim()
                .parse()
                .ok()
                .filter(|len| *len <= 32)
                .ok_or_else(|| invalid(s, "prefix length must be 0-32"))?;
            let host_bits = u32::MAX.checked_shr(u32::from(len)).unwrap_or(0);
            let first = addr & !host_bits;
            return Ok(Self {
                first: Ipv4Addr::from(first),
                last: Ipv4Addr::from(first | host_bits),
            });
        }

        parse_addr(s, s).map(Self::single)
    }
}

impl TryFrom<String> for AddressRange {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(a: [u8; 4], b: [u8; 4]) -> AddressRange {
        AddressRange::new(Ipv4Addr::from(a), Ipv4Addr::from(b)).unwrap()
    }

    #[test]
    fn test_single_address() {
        let r: AddressRange = "192.168.1.7".parse().unwrap();
        assert_eq!(r, range([192, 168, 1, 7], [192, 168, 1, 7]));
        assert_eq!(r.size(), 1);
        assert_eq!(r.to_string(), "192.168.1.7");
    }

    #[test]
    fn test_cidr() {
        let r: AddressRange = "10.1.2.3/24".parse().unwrap();
        assert_eq!(r, range([10, 1, 2, 0], [10, 1, 2, 255]));

        let r: AddressRange = "0.0.0.0/0".parse().unwrap();
        assert_eq!(r.size(), 1 << 32);

        let r: AddressRange = "10.0.0.9/32".parse().unwrap();
        assert_eq!(r.size(), 1);
    }

    #[test]
    fn test_dash_range() {
        let r: AddressRange = "10.0.0.10 - 10.0.0.20".parse().unwrap();
        assert_eq!(r, range([10, 0, 0, 10], [10, 0, 0, 20]));
        assert!(r.contains(Ipv4Addr::new(10, 0, 0, 15)));
        assert!(!r.contains(Ipv4Addr::new(10, 0, 0, 21)));
        assert_eq!(r.to_string(), "10.0.0.10-10.0.0.20");
    }

    #[test]
    fn test_rejects_garbage() {
        for input in [
            "",
            "10.0.0",
            "10.0.0.1/33",
            "10.0.0.1/x",
            "10.0.0.9-10.0.0.1",
            "host.example",
        ] {
            assert!(
                matches!(
                    input.parse::<AddressRange>(),
                    Err(Error::InvalidParameter { .. })
                ),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_insert_into_set() {
        let mut set = AddressSet::new();
        "10.0.0.0-10.0.0.255"
            .parse::<AddressRange>()
            .unwrap()
            .insert_into(&mut set)
            .unwrap();
        assert_eq!(set.count(), 256);
        assert!(set.contains(Ipv4Addr::new(10, 0, 0, 128)));
    }
}
