//! Host and interface definitions.

use super::vlan::VlanRef;
use super::{default_true, one_or_many};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Roles a host can be provisioned with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Base configuration every host receives
    Generic,
    /// Hypervisor that hosts virtual machines
    Vmhost,
    /// Routes and firewalls every routable vlan
    Router,
    Dns,
    Dhcp,
    Ntp,
    Storage,
    /// Builds images for other hosts
    Build,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Generic,
        Role::Vmhost,
        Role::Router,
        Role::Dns,
        Role::Dhcp,
        Role::Ntp,
        Role::Storage,
        Role::Build,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Generic => "generic",
            Role::Vmhost => "vmhost",
            Role::Router => "router",
            Role::Dns => "dns",
            Role::Dhcp => "dhcp",
            Role::Ntp => "ntp",
            Role::Storage => "storage",
            Role::Build => "build",
        }
    }

    /// True if `name` is the name of any role
    pub fn is_role_name(name: &str) -> bool {
        Self::ALL.iter().any(|role| role.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| s.to_string())
    }
}

/// Requested addressing for one IP family on an interface.
///
/// Deserialized from a plain string: `dhcp`, `slaac`, or a literal address.
/// Literal addresses stay unparsed until validation so that a malformed
/// address is reported alongside every other problem in the site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AddressMode {
    Dhcp,
    Slaac,
    Static(String),
}

impl From<String> for AddressMode {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "dhcp" => AddressMode::Dhcp,
            "slaac" => AddressMode::Slaac,
            _ => AddressMode::Static(value.trim().to_string()),
        }
    }
}

impl From<AddressMode> for String {
    fn from(mode: AddressMode) -> Self {
        match mode {
            AddressMode::Dhcp => "dhcp".to_string(),
            AddressMode::Slaac => "slaac".to_string(),
            AddressMode::Static(address) => address,
        }
    }
}

impl Default for AddressMode {
    fn default() -> Self {
        AddressMode::Dhcp
    }
}

/// A network interface on a host.
///
/// An interface either joins a vswitch (optionally naming the vlan) or is an
/// external uplink bound to a physical interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interface {
    /// Interface name; unnamed interfaces become `eth0`, `eth1`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vswitch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<VlanRef>,
    /// Physical interface for an external uplink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uplink: Option<String>,

    #[serde(default)]
    pub ipv4_address: AddressMode,
    /// Prefix length for static uplink addresses, which have no vlan subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_prefixlen: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_address: Option<AddressMode>,
    #[serde(default)]
    pub ipv6_disabled: bool,

    /// Request a prefix delegation of this length from upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_pd_prefixlen: Option<u8>,
    #[serde(default)]
    pub ipv6_ask_for_prefix: bool,
    /// Known delegated prefix, when the upstream assignment is static
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_delegated_prefix: Option<String>,

    /// Rename the interface matching this MAC address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_zone: Option<String>,
}

/// Default delegation length requested by routers
pub const DEFAULT_PD_PREFIXLEN: u8 = 56;

impl Interface {
    pub fn is_uplink(&self) -> bool {
        self.uplink.is_some()
    }

    /// Delegation length requested on this interface, if any
    pub fn requested_pd_prefixlen(&self) -> Option<u8> {
        match self.ipv6_pd_prefixlen {
            Some(len) => Some(len),
            None if self.ipv6_ask_for_prefix => Some(DEFAULT_PD_PREFIXLEN),
            None => None,
        }
    }
}

/// A host provisioned by the site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Defaults to the host file name when loaded from a site directory
    #[serde(default)]
    pub hostname: String,
    #[serde(default, alias = "role", deserialize_with = "one_or_many")]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub is_vm: bool,
    /// Hostname of the vmhost running this VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmhost: Option<String>,
    #[serde(default = "default_vcpus")]
    pub vcpus: u32,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_disk_size_mb")]
    pub disk_size_mb: u32,
    /// Non-router hosts filter their own inbound traffic
    #[serde(default = "default_true")]
    pub local_firewall: bool,
    #[serde(default, alias = "alias", deserialize_with = "one_or_many")]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

impl Host {
    pub fn has_role(&self, role: Role) -> bool {
        role == Role::Generic || self.roles.contains(&role)
    }

    /// Generic first, then declared roles in declaration order without duplicates
    pub fn effective_roles(&self) -> Vec<Role> {
        let mut roles = vec![Role::Generic];
        for role in &self.roles {
            if !roles.contains(role) {
                roles.push(*role);
            }
        }
        roles
    }

    /// Interface names with defaults applied, in declaration order
    pub fn interface_names(&self) -> Vec<String> {
        let mut counter = 0;
        self.interfaces
            .iter()
            .map(|iface| match &iface.name {
                Some(name) => name.clone(),
                None => {
                    let name = format!("eth{}", counter);
                    counter += 1;
                    name
                }
            })
            .collect()
    }
}

fn default_vcpus() -> u32 {
    1
}

fn default_memory_mb() -> u32 {
    128
}

fn default_disk_size_mb() -> u32 {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_parsing() {
        let yaml = r#"
hostname: dns1
role: dns
is_vm: true
vmhost: hyper
interfaces:
  - vswitch: switch0
    vlan: 10
    ipv4_address: 192.168.10.3
  - name: mgmt
    vswitch: switch0
    vlan: mgmt
    ipv4_address: dhcp
    ipv6_address: slaac
  - vswitch: switch1
"#;
        let host: Host = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(host.roles, vec![Role::Dns]);
        assert!(host.has_role(Role::Dns));
        assert!(host.has_role(Role::Generic));
        assert!(!host.has_role(Role::Router));
        assert_eq!(host.memory_mb, 128);
        assert!(host.local_firewall);
        assert_eq!(host.interfaces[0].vlan, Some(VlanRef::Id(10)));
        assert_eq!(host.interfaces[0].ipv4_address, AddressMode::Static("192.168.10.3".into()));
        assert_eq!(host.interfaces[1].ipv6_address, Some(AddressMode::Slaac));
        assert_eq!(host.interfaces[2].ipv4_address, AddressMode::Dhcp);
        assert_eq!(host.interface_names(), vec!["eth0", "mgmt", "eth1"]);
    }

    #[test]
    fn test_roles_list_and_effective_roles() {
        let host: Host = serde_yaml::from_str("roles: [dns, dhcp, dns]\n").unwrap();
        assert_eq!(host.effective_roles(), vec![Role::Generic, Role::Dns, Role::Dhcp]);
        assert!(Role::is_role_name("Router"));
        assert!(!Role::is_role_name("printer"));
        assert_eq!("DHCP".parse::<Role>(), Ok(Role::Dhcp));
        assert!("printer".parse::<Role>().is_err());
    }

    #[test]
    fn test_requested_prefix_delegation() {
        let mut iface = Interface::default();
        assert_eq!(iface.requested_pd_prefixlen(), None);
        iface.ipv6_ask_for_prefix = true;
        assert_eq!(iface.requested_pd_prefixlen(), Some(DEFAULT_PD_PREFIXLEN));
        iface.ipv6_pd_prefixlen = Some(60);
        assert_eq!(iface.requested_pd_prefixlen(), Some(60));
    }
}
