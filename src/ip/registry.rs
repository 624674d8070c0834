//! Claimed address registry.
//!
//! Tracks which owner holds each address so that every static address,
//! reservation and gateway in a site is handed out at most once.

use std::collections::BTreeMap;
use std::net::IpAddr;

/// Central record of claimed addresses, ordered by address
#[derive(Debug, Default, Clone)]
pub struct AddressRegistry {
    /// address -> owner
    assigned: BTreeMap<IpAddr, String>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `addr` for `owner`.
    ///
    /// Claiming an address the same owner already holds is a no-op; otherwise
    /// the current owner is returned as the error.
    pub fn register(&mut self, addr: IpAddr, owner: &str) -> Result<(), String> {
        match self.assigned.get(&addr) {
            Some(existing) if existing != owner => Err(existing.clone()),
            Some(_) => Ok(()),
            None => {
                self.assigned.insert(addr, owner.to_string());
                Ok(())
            }
        }
    }

    pub fn is_assigned(&self, addr: &IpAddr) -> bool {
        self.assigned.contains_key(addr)
    }

    pub fn owner_of(&self, addr: &IpAddr) -> Option<&str> {
        self.assigned.get(addr).map(String::as_str)
    }

    /// Claimed addresses within the inclusive range, in address order
    pub fn claimed_between(&self, start: IpAddr, end: IpAddr) -> impl Iterator<Item = (&IpAddr, &str)> {
        self.assigned
            .range(start..=end)
            .map(|(addr, owner)| (addr, owner.as_str()))
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_register_and_conflict() {
        let mut registry = AddressRegistry::new();
        assert!(registry.register(ip("192.168.1.10"), "nas").is_ok());
        assert!(registry.register(ip("192.168.1.10"), "nas").is_ok());
        assert_eq!(registry.register(ip("192.168.1.10"), "printer"), Err("nas".to_string()));
        assert_eq!(registry.owner_of(&ip("192.168.1.10")), Some("nas"));
        assert!(!registry.is_assigned(&ip("192.168.1.11")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_claimed_between_keeps_families_apart() {
        let mut registry = AddressRegistry::new();
        registry.register(ip("192.168.1.20"), "a").unwrap();
        registry.register(ip("192.168.1.5"), "b").unwrap();
        registry.register(ip("192.168.2.5"), "c").unwrap();
        registry.register(ip("fd00::5"), "d").unwrap();

        let claimed: Vec<_> = registry
            .claimed_between(ip("192.168.1.0"), ip("192.168.1.255"))
            .map(|(addr, owner)| (addr.to_string(), owner.to_string()))
            .collect();
        assert_eq!(
            claimed,
            vec![("192.168.1.5".to_string(), "b".to_string()), ("192.168.1.20".to_string(), "a".to_string())]
        );
        assert_eq!(registry.claimed_between(ip("fd00::"), ip("fd00::ffff")).count(), 1);
    }
}
