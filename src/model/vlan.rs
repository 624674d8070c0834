//! VSwitch and vlan definitions.

use super::{default_true, one_or_many};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A virtual layer-2 switch grouping one or more vlans
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VSwitch {
    pub name: String,
    /// Physical interface bridged into the switch, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uplink: Option<String>,
    pub vlans: Vec<Vlan>,
}

impl VSwitch {
    /// Find a vlan on this switch by id or name
    pub fn find_vlan(&self, vlan: &VlanRef) -> Option<&Vlan> {
        match vlan {
            VlanRef::Id(id) => self.vlans.iter().find(|v| v.id == Some(*id)),
            VlanRef::Name(name) => self.vlans.iter().find(|v| v.name.eq_ignore_ascii_case(name)),
        }
    }

    /// The untagged vlan (no 802.1q id), if the switch has one
    pub fn untagged_vlan(&self) -> Option<&Vlan> {
        self.vlans.iter().find(|v| v.id.is_none())
    }
}

/// Reference to a vlan by numeric id or by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VlanRef {
    Id(u16),
    Name(String),
}

impl fmt::Display for VlanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VlanRef::Id(id) => write!(f, "{}", id),
            VlanRef::Name(name) => write!(f, "{}", name),
        }
    }
}

/// An isolated broadcast domain with its own addressing and DHCP policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vlan {
    pub name: String,
    /// 802.1q tag; `None` means untagged
    #[serde(default)]
    pub id: Option<u16>,
    /// The router gets an interface on routable vlans
    #[serde(default = "default_true")]
    pub routable: bool,
    /// DNS subdomain for hosts on this vlan
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub default: bool,

    pub ipv4_subnet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_subnet: Option<String>,
    #[serde(default)]
    pub ipv6_disabled: bool,
    /// Derive the IPv6 subnet from the router's delegated prefix
    #[serde(default)]
    pub ipv6_pd: bool,
    /// Explicit index of this vlan's subnet within the delegated prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_pd_network: Option<u64>,
    /// Prefix length of the subnet carved out of the delegated prefix
    #[serde(default = "default_ipv6_prefixlen")]
    pub ipv6_prefixlen: u8,

    /// A DHCP server hands out IPv4 leases on this vlan
    #[serde(default = "default_true", alias = "dhcp4_enabled")]
    pub allow_dhcp: bool,
    /// Router advertisements set the managed flag; DHCPv6 assigns addresses
    #[serde(default)]
    pub dhcp6_managed: bool,
    #[serde(default = "default_dhcp_min_ipv4")]
    pub dhcp_min_address_ipv4: u32,
    #[serde(default = "default_dhcp_max_ipv4")]
    pub dhcp_max_address_ipv4: u32,
    #[serde(default = "default_dhcp_min_ipv6")]
    pub dhcp_min_address_ipv6: u64,
    #[serde(default = "default_dhcp_max_ipv6")]
    pub dhcp_max_address_ipv6: u64,
    #[serde(default = "default_lease_time", with = "humantime_serde")]
    pub dhcp_lease_time: Duration,

    #[serde(default)]
    pub allow_internet: bool,
    #[serde(default)]
    pub allow_dns_update: bool,
    /// Other vlans reachable without firewall restrictions; `all` for every vlan
    #[serde(default, alias = "access_vlan", deserialize_with = "one_or_many")]
    pub access_vlans: Vec<VlanRef>,

    #[serde(default)]
    pub static_hosts: Vec<StaticHost>,
    #[serde(default)]
    pub dhcp_reservations: Vec<DhcpReservation>,
}

impl Vlan {
    /// True when this vlan takes its IPv6 subnet from prefix delegation
    pub fn uses_prefix_delegation(&self) -> bool {
        !self.ipv6_disabled && self.ipv6_subnet.is_none() && (self.ipv6_pd || self.ipv6_pd_network.is_some())
    }

    /// True when any kind of IPv6 addressing is configured
    pub fn has_ipv6(&self) -> bool {
        !self.ipv6_disabled && (self.ipv6_subnet.is_some() || self.uses_prefix_delegation())
    }

    /// The IPv6 subnet text, ignored when IPv6 is disabled
    pub fn explicit_ipv6_subnet(&self) -> Option<&str> {
        if self.ipv6_disabled {
            None
        } else {
            self.ipv6_subnet.as_deref()
        }
    }
}

/// A host with a fixed address that is not provisioned by this site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticHost {
    pub hostname: String,
    pub ipv4_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_address: Option<String>,
    #[serde(default, alias = "alias", deserialize_with = "one_or_many")]
    pub aliases: Vec<String>,
}

/// A DHCP reservation bound to one vlan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpReservation {
    pub hostname: String,
    pub mac_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_address: Option<String>,
    #[serde(default, alias = "alias", deserialize_with = "one_or_many")]
    pub aliases: Vec<String>,
}

fn default_ipv6_prefixlen() -> u8 {
    64
}

fn default_dhcp_min_ipv4() -> u32 {
    16
}

fn default_dhcp_max_ipv4() -> u32 {
    252
}

fn default_dhcp_min_ipv6() -> u64 {
    16
}

fn default_dhcp_max_ipv6() -> u64 {
    0xffff
}

fn default_lease_time() -> Duration {
    Duration::from_secs(3600)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlan_defaults() {
        let yaml = r#"
name: lan
ipv4_subnet: 192.168.1.0/24
"#;
        let vlan: Vlan = serde_yaml::from_str(yaml).unwrap();
        assert!(vlan.routable);
        assert!(vlan.allow_dhcp);
        assert!(!vlan.allow_internet);
        assert_eq!(vlan.id, None);
        assert_eq!(vlan.dhcp_min_address_ipv4, 16);
        assert_eq!(vlan.dhcp_max_address_ipv4, 252);
        assert_eq!(vlan.dhcp_max_address_ipv6, 0xffff);
        assert_eq!(vlan.ipv6_prefixlen, 64);
        assert_eq!(vlan.dhcp_lease_time, Duration::from_secs(3600));
        assert!(!vlan.has_ipv6());
    }

    #[test]
    fn test_vlan_aliases_and_refs() {
        let yaml = r#"
name: iot
id: 20
dhcp4_enabled: false
dhcp_lease_time: 30m
access_vlan: lan
ipv6_pd_network: 3
"#;
        let yaml = format!("{}ipv4_subnet: 10.0.20.0/24\n", yaml);
        let vlan: Vlan = serde_yaml::from_str(&yaml).unwrap();
        assert!(!vlan.allow_dhcp);
        assert_eq!(vlan.access_vlans, vec![VlanRef::Name("lan".to_string())]);
        assert_eq!(vlan.dhcp_lease_time, Duration::from_secs(1800));
        assert!(vlan.uses_prefix_delegation());
        assert!(vlan.has_ipv6());
    }

    #[test]
    fn test_find_vlan_by_id_and_name() {
        let yaml = r#"
name: switch0
vlans:
  - name: lan
    ipv4_subnet: 192.168.1.0/24
  - name: guest
    id: 30
    ipv4_subnet: 192.168.30.0/24
"#;
        let vswitch: VSwitch = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(vswitch.find_vlan(&VlanRef::Id(30)).unwrap().name, "guest");
        assert_eq!(vswitch.find_vlan(&VlanRef::Name("LAN".into())).unwrap().name, "lan");
        assert_eq!(vswitch.untagged_vlan().unwrap().name, "lan");
        assert!(vswitch.find_vlan(&VlanRef::Id(31)).is_none());
    }
}
