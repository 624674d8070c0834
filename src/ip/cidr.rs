//! IPv4 and IPv6 network arithmetic.
//!
//! Networks are kept as an integer base address plus a prefix length so that
//! offsets, containment and overlap checks are plain integer operations.

use serde::{Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Errors from parsing or subdividing a network
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CidrError {
    #[error("'{0}' is not in address/prefix form")]
    MissingPrefix(String),
    #[error("invalid address in '{0}'")]
    InvalidAddress(String),
    #[error("invalid prefix length in '{0}'")]
    InvalidPrefix(String),
    #[error("'{0}' has host bits set")]
    HostBitsSet(String),
    #[error("cannot carve a /{target} out of a /{prefix}")]
    InvalidSubdivision { prefix: u8, target: u8 },
    #[error("subnet index {index} exceeds the {available} /{target} subnets available in a /{prefix}")]
    IndexOverflow { index: u64, available: u128, prefix: u8, target: u8 },
}

fn split_cidr(text: &str) -> Result<(&str, u8), CidrError> {
    let (addr, len) = text
        .trim()
        .split_once('/')
        .ok_or_else(|| CidrError::MissingPrefix(text.to_string()))?;
    let len = len
        .parse::<u8>()
        .map_err(|_| CidrError::InvalidPrefix(text.to_string()))?;
    Ok((addr, len))
}

/// An IPv4 network such as `192.168.1.0/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Cidr {
    base: u32,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Create a network; the address must not have host bits set
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self, CidrError> {
        if prefix_len > 32 {
            return Err(CidrError::InvalidPrefix(format!("{}/{}", network, prefix_len)));
        }
        let base = u32::from(network);
        let cidr = Self { base, prefix_len };
        if base & !cidr.mask() != 0 {
            return Err(CidrError::HostBitsSet(format!("{}/{}", network, prefix_len)));
        }
        Ok(cidr)
    }

    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix_len)
        }
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base | !self.mask())
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask())
    }

    /// Number of addresses in the network, including network and broadcast
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// First usable address, conventionally the router
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        if self.size() > 2 {
            self.nth(1)
        } else {
            None
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == self.base
    }

    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.contains(other.network()) || other.contains(self.network())
    }

    /// Address at `offset` from the network address, if inside the network
    pub fn nth(&self, offset: u64) -> Option<Ipv4Addr> {
        if offset < self.size() {
            Some(Ipv4Addr::from(self.base + offset as u32))
        } else {
            None
        }
    }

    /// Offset of `addr` from the network address, if inside the network
    pub fn offset_of(&self, addr: Ipv4Addr) -> Option<u64> {
        if self.contains(addr) {
            Some(u64::from(u32::from(addr) - self.base))
        } else {
            None
        }
    }

    /// Reverse DNS zone covering this network, e.g. `1.168.192.in-addr.arpa`
    pub fn reverse_zone(&self) -> String {
        let octets = self.network().octets();
        let count = usize::from(self.prefix_len / 8);
        let mut parts: Vec<String> = octets[..count].iter().rev().map(|o| o.to_string()).collect();
        parts.push("in-addr.arpa".to_string());
        parts.join(".")
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CidrError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (addr, len) = split_cidr(text)?;
        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| CidrError::InvalidAddress(text.to_string()))?;
        Self::new(addr, len).map_err(|e| match e {
            CidrError::InvalidPrefix(_) => CidrError::InvalidPrefix(text.to_string()),
            CidrError::HostBitsSet(_) => CidrError::HostBitsSet(text.to_string()),
            other => other,
        })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix_len)
    }
}

impl Serialize for Ipv4Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An IPv6 network such as `fd00:1:2:3::/64`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv6Cidr {
    base: u128,
    prefix_len: u8,
}

impl Ipv6Cidr {
    pub fn new(network: Ipv6Addr, prefix_len: u8) -> Result<Self, CidrError> {
        if prefix_len > 128 {
            return Err(CidrError::InvalidPrefix(format!("{}/{}", network, prefix_len)));
        }
        let base = u128::from(network);
        let cidr = Self { base, prefix_len };
        if base & cidr.host_mask() != 0 {
            return Err(CidrError::HostBitsSet(format!("{}/{}", network, prefix_len)));
        }
        Ok(cidr)
    }

    fn mask(&self) -> u128 {
        if self.prefix_len == 0 {
            0
        } else {
            u128::MAX << (128 - self.prefix_len)
        }
    }

    /// Largest valid offset inside the network
    fn host_mask(&self) -> u128 {
        !self.mask()
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn network(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.base)
    }

    pub fn last(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.base | self.host_mask())
    }

    pub fn gateway(&self) -> Option<Ipv6Addr> {
        self.nth(1)
    }

    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        u128::from(addr) & self.mask() == self.base
    }

    pub fn overlaps(&self, other: &Ipv6Cidr) -> bool {
        self.contains(other.network()) || other.contains(self.network())
    }

    pub fn nth(&self, offset: u128) -> Option<Ipv6Addr> {
        if offset <= self.host_mask() {
            Some(Ipv6Addr::from(self.base + offset))
        } else {
            None
        }
    }

    pub fn offset_of(&self, addr: Ipv6Addr) -> Option<u128> {
        if self.contains(addr) {
            Some(u128::from(addr) - self.base)
        } else {
            None
        }
    }

    /// Number of `/target` subnets inside this network
    pub fn subnet_count(&self, target: u8) -> Result<u128, CidrError> {
        if target < self.prefix_len || target > 128 {
            return Err(CidrError::InvalidSubdivision { prefix: self.prefix_len, target });
        }
        let bits = u32::from(target - self.prefix_len);
        Ok(if bits >= 128 { u128::MAX } else { 1u128 << bits })
    }

    /// The `index`th `/target` subnet; the index occupies bits `[prefix_len, target)`
    pub fn subnet(&self, index: u64, target: u8) -> Result<Ipv6Cidr, CidrError> {
        let available = self.subnet_count(target)?;
        if u128::from(index) >= available {
            return Err(CidrError::IndexOverflow { index, available, prefix: self.prefix_len, target });
        }
        let shift = 128 - u32::from(target);
        let offset = if shift >= 128 { 0 } else { u128::from(index) << shift };
        Ok(Ipv6Cidr { base: self.base | offset, prefix_len: target })
    }

    /// Reverse DNS zone covering this network, nibble aligned
    pub fn reverse_zone(&self) -> String {
        let nibbles = usize::from(self.prefix_len / 4);
        let hex = format!("{:032x}", self.base);
        let mut parts: Vec<String> = hex[..nibbles].chars().rev().map(|c| c.to_string()).collect();
        parts.push("ip6.arpa".to_string());
        parts.join(".")
    }
}

impl FromStr for Ipv6Cidr {
    type Err = CidrError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (addr, len) = split_cidr(text)?;
        let addr = addr
            .parse::<Ipv6Addr>()
            .map_err(|_| CidrError::InvalidAddress(text.to_string()))?;
        Self::new(addr, len).map_err(|e| match e {
            CidrError::InvalidPrefix(_) => CidrError::InvalidPrefix(text.to_string()),
            CidrError::HostBitsSet(_) => CidrError::HostBitsSet(text.to_string()),
            other => other,
        })
    }
}

impl fmt::Display for Ipv6Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix_len)
    }
}

impl Serialize for Ipv6Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Address as an integer in a common space; IPv4 maps to its 32-bit value
pub(crate) fn addr_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Inverse of [`addr_to_u128`] for the family of `like`
pub(crate) fn u128_to_addr(value: u128, like: IpAddr) -> IpAddr {
    match like {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(value as u32)),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

/// Reverse pointer name for a single address
pub fn reverse_pointer(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let hex = format!("{:032x}", u128::from(v6));
            let mut parts: Vec<String> = hex.chars().rev().map(|c| c.to_string()).collect();
            parts.push("ip6.arpa".to_string());
            parts.join(".")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_parse_and_bounds() {
        let net: Ipv4Cidr = "192.168.220.0/24".parse().unwrap();
        assert_eq!(net.network(), Ipv4Addr::new(192, 168, 220, 0));
        assert_eq!(net.broadcast(), Ipv4Addr::new(192, 168, 220, 255));
        assert_eq!(net.gateway(), Some(Ipv4Addr::new(192, 168, 220, 1)));
        assert_eq!(net.netmask(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(net.size(), 256);
        assert_eq!(net.nth(16), Some(Ipv4Addr::new(192, 168, 220, 16)));
        assert_eq!(net.nth(256), None);
        assert_eq!(net.offset_of(Ipv4Addr::new(192, 168, 220, 128)), Some(128));
        assert_eq!(net.offset_of(Ipv4Addr::new(192, 168, 221, 1)), None);
        assert_eq!(net.to_string(), "192.168.220.0/24");
    }

    #[test]
    fn test_ipv4_parse_errors() {
        assert_eq!(
            "192.168.1.5/24".parse::<Ipv4Cidr>(),
            Err(CidrError::HostBitsSet("192.168.1.5/24".into()))
        );
        assert!(matches!("192.168.1.0".parse::<Ipv4Cidr>(), Err(CidrError::MissingPrefix(_))));
        assert!(matches!("192.168.1.0/33".parse::<Ipv4Cidr>(), Err(CidrError::InvalidPrefix(_))));
        assert!(matches!("192.168.1/24".parse::<Ipv4Cidr>(), Err(CidrError::InvalidAddress(_))));
    }

    #[test]
    fn test_ipv4_overlap() {
        let a: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        let b: Ipv4Cidr = "10.0.5.0/24".parse().unwrap();
        let c: Ipv4Cidr = "10.1.0.0/24".parse().unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_reverse_zones() {
        let net: Ipv4Cidr = "172.16.251.0/24".parse().unwrap();
        assert_eq!(net.reverse_zone(), "251.16.172.in-addr.arpa");
        let net6: Ipv6Cidr = "fd24:87e8:6c7:2::/64".parse().unwrap();
        assert_eq!(net6.reverse_zone(), "2.0.0.0.7.c.6.0.8.e.7.8.4.2.d.f.ip6.arpa");
        assert_eq!(
            reverse_pointer("192.168.1.20".parse().unwrap()),
            "20.1.168.192.in-addr.arpa"
        );
    }

    #[test]
    fn test_ipv6_subnet_encoding() {
        let prefix: Ipv6Cidr = "2001:db8:aa00::/56".parse().unwrap();
        assert_eq!(prefix.subnet_count(64).unwrap(), 256);
        assert_eq!(prefix.subnet(0, 64).unwrap().to_string(), "2001:db8:aa00::/64");
        assert_eq!(prefix.subnet(5, 64).unwrap().to_string(), "2001:db8:aa00:5::/64");
        assert_eq!(prefix.subnet(255, 64).unwrap().to_string(), "2001:db8:aa00:ff::/64");
        assert!(matches!(prefix.subnet(256, 64), Err(CidrError::IndexOverflow { available: 256, .. })));
        assert!(matches!(prefix.subnet(0, 48), Err(CidrError::InvalidSubdivision { .. })));
    }

    #[test]
    fn test_ipv6_offsets() {
        let net: Ipv6Cidr = "fd00:1::/64".parse().unwrap();
        assert_eq!(net.gateway(), Some("fd00:1::1".parse().unwrap()));
        assert_eq!(net.nth(0xffff), Some("fd00:1::ffff".parse().unwrap()));
        assert!(net.contains("fd00:1::abcd".parse().unwrap()));
        assert!(!net.contains("fd00:2::1".parse().unwrap()));
        assert_eq!(net.last(), "fd00:1::ffff:ffff:ffff:ffff".parse::<Ipv6Addr>().unwrap());
    }
}
