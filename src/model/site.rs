//! Site definition and model-wide lookups.

use super::firewall::FirewallConfig;
use super::host::{Host, Interface, Role};
use super::vlan::{VSwitch, Vlan, VlanRef};
use serde::{Deserialize, Serialize};

/// A complete site: network layout, policy and hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    /// Defaults to the site directory name when loaded from disk
    #[serde(default)]
    pub name: String,
    /// Top-level DNS domain
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_ntp_servers")]
    pub ntp_servers: Vec<String>,
    #[serde(default = "default_external_dns")]
    pub external_dns: Vec<String>,
    /// First index handed out to delegation-consuming vlans without an explicit `ipv6_pd_network`
    #[serde(default)]
    pub ipv6_pd_first_network: u64,
    pub vswitches: Vec<VSwitch>,
    #[serde(default)]
    pub firewall: FirewallConfig,
    /// Loaded from the per-host files of the site directory
    #[serde(default)]
    pub hosts: Vec<Host>,
}

impl Site {
    /// All vlans with their vswitch, in declaration order
    pub fn vlans(&self) -> impl Iterator<Item = (&VSwitch, &Vlan)> {
        self.vswitches
            .iter()
            .flat_map(|vswitch| vswitch.vlans.iter().map(move |vlan| (vswitch, vlan)))
    }

    pub fn routable_vlans(&self) -> impl Iterator<Item = (&VSwitch, &Vlan)> {
        self.vlans().filter(|(_, vlan)| vlan.routable)
    }

    pub fn find_vswitch(&self, name: &str) -> Option<&VSwitch> {
        self.vswitches.iter().find(|v| v.name == name)
    }

    /// Find a vlan anywhere in the site by name
    pub fn find_vlan(&self, name: &str) -> Option<(&VSwitch, &Vlan)> {
        self.vlans().find(|(_, vlan)| vlan.name.eq_ignore_ascii_case(name))
    }

    /// Resolve a vlan reference, optionally restricted to one vswitch.
    ///
    /// Numeric ids are only unique within a vswitch, so an id without a
    /// vswitch resolves only when exactly one vlan in the site carries it.
    pub fn lookup_vlan(&self, vswitch: Option<&str>, vlan: &VlanRef) -> Option<(&VSwitch, &Vlan)> {
        if let Some(name) = vswitch {
            let vswitch = self.find_vswitch(name)?;
            return vswitch.find_vlan(vlan).map(|v| (vswitch, v));
        }
        let mut matches = self
            .vswitches
            .iter()
            .filter_map(|vswitch| vswitch.find_vlan(vlan).map(|v| (vswitch, v)));
        let first = matches.next()?;
        match matches.next() {
            Some(_) => None,
            None => Some(first),
        }
    }

    /// The vlan marked `default`, if any
    pub fn default_vlan(&self) -> Option<(&VSwitch, &Vlan)> {
        self.vlans().find(|(_, vlan)| vlan.default)
    }

    /// The vlan a non-uplink interface is attached to.
    ///
    /// Without an explicit vlan the interface lands on the vswitch's untagged
    /// vlan, then on the site default vlan if it lives on that vswitch, then
    /// on the vswitch's only vlan.
    pub fn interface_vlan(&self, iface: &Interface) -> Option<(&VSwitch, &Vlan)> {
        let vswitch = self.find_vswitch(iface.vswitch.as_deref()?)?;
        let vlan = match &iface.vlan {
            Some(vlan_ref) => vswitch.find_vlan(vlan_ref)?,
            None => vswitch
                .untagged_vlan()
                .or_else(|| vswitch.vlans.iter().find(|v| v.default))
                .or_else(|| if vswitch.vlans.len() == 1 { vswitch.vlans.first() } else { None })?,
        };
        Some((vswitch, vlan))
    }

    pub fn find_host(&self, hostname: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.hostname == hostname)
    }

    /// Hosts with the given role, in declaration order
    pub fn hosts_with_role(&self, role: Role) -> impl Iterator<Item = &Host> {
        self.hosts.iter().filter(move |h| h.has_role(role))
    }

    /// Fully qualified name for a hostname in the given vlan domain
    pub fn fqdn(&self, hostname: &str, vlan_domain: &str) -> String {
        let domain = if vlan_domain.is_empty() { &self.domain } else { vlan_domain };
        if domain.is_empty() {
            hostname.to_string()
        } else {
            format!("{}.{}", hostname, domain)
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_ntp_servers() -> Vec<String> {
    (0..4).map(|i| format!("{}.pool.ntp.org", i)).collect()
}

fn default_external_dns() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "9.9.9.9".to_string(), "1.1.1.1".to_string()]
}
