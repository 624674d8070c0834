//! DHCP pool carving.

use super::cidr::{addr_to_u128, u128_to_addr};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// An inclusive range of addresses of one family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddressRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl AddressRange {
    pub fn len(&self) -> u128 {
        addr_to_u128(self.end) - addr_to_u128(self.start) + 1
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        addr.is_ipv4() == self.start.is_ipv4() && self.start <= addr && addr <= self.end
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The free addresses of a DHCP pool as disjoint, ascending ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DhcpPool {
    pub ranges: Vec<AddressRange>,
}

impl DhcpPool {
    /// Carve `[start, end]` minus every excluded address.
    ///
    /// `excluded` may be in any order and may hold addresses outside the range.
    pub fn carve<I>(start: IpAddr, end: IpAddr, excluded: I) -> Self
    where
        I: IntoIterator<Item = IpAddr>,
    {
        let lo = addr_to_u128(start);
        let hi = addr_to_u128(end);
        if lo > hi {
            return Self::default();
        }

        let mut holes: Vec<u128> = excluded
            .into_iter()
            .filter(|addr| addr.is_ipv4() == start.is_ipv4())
            .map(addr_to_u128)
            .filter(|value| (lo..=hi).contains(value))
            .collect();
        holes.sort_unstable();
        holes.dedup();

        let mut ranges = Vec::new();
        let mut next = lo;
        for hole in holes {
            if hole > next {
                ranges.push((next, hole - 1));
            }
            // a hole at u128::MAX can only be the last value of the range
            next = hole.saturating_add(1);
            if hole == u128::MAX {
                return Self::from_bounds(ranges, start);
            }
        }
        if next <= hi {
            ranges.push((next, hi));
        }
        Self::from_bounds(ranges, start)
    }

    fn from_bounds(bounds: Vec<(u128, u128)>, like: IpAddr) -> Self {
        Self {
            ranges: bounds
                .into_iter()
                .map(|(s, e)| AddressRange {
                    start: u128_to_addr(s, like),
                    end: u128_to_addr(e, like),
                })
                .collect(),
        }
    }

    /// Number of free addresses
    pub fn len(&self) -> u128 {
        self.ranges.iter().map(AddressRange::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_full_range() {
        let pool = DhcpPool::carve(ip("192.168.220.16"), ip("192.168.220.128"), Vec::new());
        assert_eq!(pool.len(), 113);
        assert_eq!(pool.ranges.len(), 1);
        assert_eq!(pool.ranges[0].to_string(), "192.168.220.16-192.168.220.128");
    }

    #[test]
    fn test_holes_split_the_range() {
        let excluded = vec![ip("192.168.1.20"), ip("192.168.1.16"), ip("192.168.1.21"), ip("10.0.0.1"), ip("fd00::1")];
        let pool = DhcpPool::carve(ip("192.168.1.16"), ip("192.168.1.30"), excluded);
        let ranges: Vec<String> = pool.ranges.iter().map(|r| r.to_string()).collect();
        assert_eq!(ranges, vec!["192.168.1.17-192.168.1.19", "192.168.1.22-192.168.1.30"]);
        assert_eq!(pool.len(), 12);
        assert!(!pool.contains(ip("192.168.1.20")));
        assert!(pool.contains(ip("192.168.1.30")));
    }

    #[test]
    fn test_fully_claimed_range_is_empty() {
        let pool = DhcpPool::carve(ip("fd00::10"), ip("fd00::11"), vec![ip("fd00::10"), ip("fd00::11")]);
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_inverted_bounds() {
        assert!(DhcpPool::carve(ip("10.0.0.9"), ip("10.0.0.3"), Vec::new()).is_empty());
    }
}
