//! Address resolution.
//!
//! Turns the declared addressing of a validated site into concrete addresses:
//! subnet bounds and gateways per vlan, static and reserved addresses, the
//! router's gateway interfaces, delegated IPv6 subnets and the free DHCP
//! pools that remain once every claim is placed.

use super::cidr::{Ipv4Cidr, Ipv6Cidr};
use super::pool::DhcpPool;
use super::prefix_delegation::{assign_delegated_subnets, DelegatedSubnet, DelegationRequest};
use super::registry::AddressRegistry;
use crate::error::{AddressResolutionError, CompileError};
use crate::model::{AddressMode, Host, Interface, Role, Site, VSwitch, Vlan};
use crate::utils::{generate_vm_mac, normalize_mac};
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Owner recorded for gateway addresses when the site has no router
const UNOWNED_GATEWAY: &str = "gateway";

/// DNS alias published for the router's gateway address on every vlan
pub const ROUTER_ALIAS: &str = "router";

/// Fully resolved addressing for a site
#[derive(Debug, Clone, Serialize)]
pub struct AddressPlan {
    pub vlans: Vec<ResolvedVlan>,
    pub hosts: Vec<ResolvedHost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation: Option<DelegationRequest>,
}

impl AddressPlan {
    pub fn vlan(&self, name: &str) -> Option<&ResolvedVlan> {
        self.vlans.iter().find(|v| v.name.eq_ignore_ascii_case(name))
    }

    pub fn host(&self, hostname: &str) -> Option<&ResolvedHost> {
        self.hosts.iter().find(|h| h.hostname == hostname)
    }
}

/// How a vlan gets its IPv6 subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Ipv6Resolution {
    None,
    Static { subnet: Ipv6Cidr },
    Delegated(DelegatedSubnet),
}

impl Ipv6Resolution {
    /// The concrete subnet, when known at compile time
    pub fn subnet(&self) -> Option<Ipv6Cidr> {
        match self {
            Ipv6Resolution::None => None,
            Ipv6Resolution::Static { subnet } => Some(*subnet),
            Ipv6Resolution::Delegated(delegated) => delegated.subnet,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Ipv6Resolution::None)
    }
}

/// What claimed an address on a vlan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Interface,
    StaticHost,
    Reservation,
    Gateway,
}

/// A named address holder on a vlan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressEntry {
    pub hostname: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedVlan {
    pub name: String,
    pub vswitch: String,
    pub id: Option<u16>,
    pub routable: bool,
    /// Effective DNS domain: the vlan's own or the site's
    pub domain: String,
    pub ipv4_subnet: Ipv4Cidr,
    pub ipv4_broadcast: Ipv4Addr,
    pub ipv4_gateway: Option<Ipv4Addr>,
    pub ipv6: Ipv6Resolution,
    pub ipv6_gateway: Option<Ipv6Addr>,
    pub dhcp4_pool: DhcpPool,
    pub dhcp6_pool: DhcpPool,
    /// Claimed addresses in claim order
    pub entries: Vec<AddressEntry>,
}

/// Resolved addressing of one interface for one IP family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceAddress {
    Disabled,
    Dhcp,
    Slaac,
    Static(IpAddr),
    /// First address of a delegated subnet known only at runtime
    Delegated,
}

impl InterfaceAddress {
    pub fn static_address(&self) -> Option<IpAddr> {
        match self {
            InterfaceAddress::Static(addr) => Some(*addr),
            _ => None,
        }
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceAddress::Disabled => f.write_str("disabled"),
            InterfaceAddress::Dhcp => f.write_str("dhcp"),
            InterfaceAddress::Slaac => f.write_str("slaac"),
            InterfaceAddress::Static(addr) => write!(f, "{}", addr),
            InterfaceAddress::Delegated => f.write_str("delegated"),
        }
    }
}

impl Serialize for InterfaceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedInterface {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vswitch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uplink: Option<String>,
    pub ipv4: InterfaceAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_prefixlen: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_gateway: Option<Ipv4Addr>,
    pub ipv6: InterfaceAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6_prefixlen: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firewall_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedHost {
    pub hostname: String,
    pub interfaces: Vec<ResolvedInterface>,
}

impl ResolvedHost {
    /// Static addresses of this host's vlan interfaces, IPv4 first
    pub fn static_addresses_on(&self, vlan: &str) -> Vec<IpAddr> {
        let ifaces = self
            .interfaces
            .iter()
            .filter(|iface| iface.vlan.as_deref().is_some_and(|v| v.eq_ignore_ascii_case(vlan)));
        let (v4, v6): (Vec<_>, Vec<_>) = ifaces
            .flat_map(|iface| [iface.ipv4.static_address(), iface.ipv6.static_address()])
            .flatten()
            .partition(IpAddr::is_ipv4);
        v4.into_iter().chain(v6).collect()
    }
}

/// Accumulates the plan and every resolution error for a run
struct Resolver<'a> {
    site: &'a Site,
    router: Option<&'a Host>,
    registry: AddressRegistry,
    vlans: Vec<ResolvedVlan>,
    errors: Vec<AddressResolutionError>,
}

/// Resolve all addressing for a site.
///
/// Any error aborts the run; the returned batch holds every problem found.
pub fn resolve_addresses(site: &Site) -> Result<AddressPlan, CompileError> {
    let delegation = DelegationRequest::from_site(site);
    let mut resolver = Resolver {
        site,
        router: site.hosts_with_role(Role::Router).next(),
        registry: AddressRegistry::new(),
        vlans: Vec::new(),
        errors: Vec::new(),
    };

    let delegated = match assign_delegated_subnets(site, delegation.as_ref()) {
        Ok(delegated) => delegated,
        Err(errors) => {
            resolver.errors.extend(errors);
            Default::default()
        }
    };

    for (vswitch, vlan) in site.vlans() {
        resolver.resolve_vlan(vswitch, vlan, delegated.get(&vlan.name).copied());
    }

    let mut hosts = Vec::with_capacity(site.hosts.len());
    for host in &site.hosts {
        hosts.push(resolver.resolve_host(host));
    }

    for (_, vlan) in site.vlans() {
        resolver.carve_pools(vlan);
    }

    if !resolver.errors.is_empty() {
        return Err(CompileError::AddressResolution(resolver.errors));
    }

    log::info!(
        "Resolved {} vlans, {} hosts, {} claimed addresses",
        resolver.vlans.len(),
        hosts.len(),
        resolver.registry.len()
    );
    Ok(AddressPlan { vlans: resolver.vlans, hosts, delegation })
}

impl<'a> Resolver<'a> {
    fn gateway_owner(&self) -> &'a str {
        self.router.map(|r| r.hostname.as_str()).unwrap_or(UNOWNED_GATEWAY)
    }

    fn claim(&mut self, vlan: &str, addr: IpAddr, owner: &str) -> bool {
        match self.registry.register(addr, owner) {
            Ok(()) => true,
            Err(other) => {
                self.errors.push(AddressResolutionError::AddressConflict {
                    vlan: vlan.to_string(),
                    address: addr,
                    owner: owner.to_string(),
                    other,
                });
                false
            }
        }
    }

    fn vlan_index(&self, name: &str) -> Option<usize> {
        self.vlans.iter().position(|v| v.name == name)
    }

    fn resolve_vlan(&mut self, vswitch: &VSwitch, vlan: &Vlan, delegated: Option<DelegatedSubnet>) {
        let ipv4_subnet: Ipv4Cidr = match vlan.ipv4_subnet.parse() {
            Ok(subnet) => subnet,
            Err(e) => {
                self.errors.push(AddressResolutionError::InvalidSubnet {
                    vlan: vlan.name.clone(),
                    reason: format!("{}", e),
                });
                return;
            }
        };
        let ipv6 = match (vlan.explicit_ipv6_subnet(), delegated) {
            (Some(text), _) => match text.parse::<Ipv6Cidr>() {
                Ok(subnet) => Ipv6Resolution::Static { subnet },
                Err(e) => {
                    self.errors.push(AddressResolutionError::InvalidSubnet {
                        vlan: vlan.name.clone(),
                        reason: format!("{}", e),
                    });
                    Ipv6Resolution::None
                }
            },
            (None, Some(delegated)) => Ipv6Resolution::Delegated(delegated),
            (None, None) => Ipv6Resolution::None,
        };

        let mut resolved = ResolvedVlan {
            name: vlan.name.clone(),
            vswitch: vswitch.name.clone(),
            id: vlan.id,
            routable: vlan.routable,
            domain: if vlan.domain.is_empty() { self.site.domain.clone() } else { vlan.domain.clone() },
            ipv4_subnet,
            ipv4_broadcast: ipv4_subnet.broadcast(),
            ipv4_gateway: None,
            ipv6,
            ipv6_gateway: None,
            dhcp4_pool: DhcpPool::default(),
            dhcp6_pool: DhcpPool::default(),
            entries: Vec::new(),
        };

        if vlan.routable {
            let owner = self.gateway_owner();
            resolved.ipv4_gateway = ipv4_subnet
                .gateway()
                .filter(|gw| self.claim(&vlan.name, IpAddr::V4(*gw), owner));
            resolved.ipv6_gateway = ipv6
                .subnet()
                .and_then(|subnet| subnet.gateway())
                .filter(|gw| self.claim(&vlan.name, IpAddr::V6(*gw), owner));
            if let Some(router) = self.router {
                resolved.entries.push(AddressEntry {
                    hostname: router.hostname.clone(),
                    kind: EntryKind::Gateway,
                    ipv4: resolved.ipv4_gateway,
                    ipv6: resolved.ipv6_gateway,
                    mac_address: None,
                    aliases: vec![ROUTER_ALIAS.to_string()],
                });
            }
        }

        for host in &vlan.static_hosts {
            let ipv4 = host.ipv4_address.parse::<Ipv4Addr>().ok();
            let ipv6 = host.ipv6_address.as_deref().and_then(|a| a.parse::<Ipv6Addr>().ok());
            let ipv4 = ipv4.filter(|a| self.claim(&vlan.name, IpAddr::V4(*a), &host.hostname));
            let ipv6 = ipv6.filter(|a| self.claim(&vlan.name, IpAddr::V6(*a), &host.hostname));
            resolved.entries.push(AddressEntry {
                hostname: host.hostname.clone(),
                kind: EntryKind::StaticHost,
                ipv4,
                ipv6,
                mac_address: None,
                aliases: host.aliases.clone(),
            });
        }

        for reservation in &vlan.dhcp_reservations {
            let ipv4 = reservation.ipv4_address.as_deref().and_then(|a| a.parse::<Ipv4Addr>().ok());
            let ipv6 = reservation.ipv6_address.as_deref().and_then(|a| a.parse::<Ipv6Addr>().ok());
            let ipv4 = ipv4.filter(|a| self.claim(&vlan.name, IpAddr::V4(*a), &reservation.hostname));
            let ipv6 = ipv6.filter(|a| self.claim(&vlan.name, IpAddr::V6(*a), &reservation.hostname));
            resolved.entries.push(AddressEntry {
                hostname: reservation.hostname.clone(),
                kind: EntryKind::Reservation,
                ipv4,
                ipv6,
                mac_address: normalize_mac(&reservation.mac_address),
                aliases: reservation.aliases.clone(),
            });
        }

        self.vlans.push(resolved);
    }

    fn resolve_host(&mut self, host: &Host) -> ResolvedHost {
        let is_router = self.router.is_some_and(|r| r.hostname == host.hostname);
        let mut interfaces = Vec::with_capacity(host.interfaces.len());
        for (iface, name) in host.interfaces.iter().zip(host.interface_names()) {
            let mac_address = match &iface.mac_address {
                Some(mac) => normalize_mac(mac),
                None if host.is_vm => Some(generate_vm_mac(&self.site.name, &host.hostname, &name)),
                None => None,
            };
            let resolved = if iface.is_uplink() {
                Some(resolve_uplink(iface, name, mac_address))
            } else {
                self.resolve_vlan_interface(host, iface, name, mac_address, is_router)
            };
            interfaces.extend(resolved);
        }

        if is_router {
            self.add_gateway_interfaces(&mut interfaces);
        }
        ResolvedHost { hostname: host.hostname.clone(), interfaces }
    }

    fn resolve_vlan_interface(
        &mut self,
        host: &Host,
        iface: &Interface,
        name: String,
        mac_address: Option<String>,
        is_router: bool,
    ) -> Option<ResolvedInterface> {
        let (vswitch, vlan) = self.site.interface_vlan(iface)?;
        let index = self.vlan_index(&vlan.name)?;
        let (subnet, gateway, ipv6_res) = {
            let resolved = &self.vlans[index];
            (resolved.ipv4_subnet, resolved.ipv4_gateway, resolved.ipv6)
        };

        let ipv4 = match &iface.ipv4_address {
            AddressMode::Static(text) => match text.parse::<Ipv4Addr>() {
                Ok(addr) if self.claim(&vlan.name, IpAddr::V4(addr), &host.hostname) => {
                    InterfaceAddress::Static(IpAddr::V4(addr))
                }
                _ => InterfaceAddress::Disabled,
            },
            AddressMode::Dhcp | AddressMode::Slaac => InterfaceAddress::Dhcp,
        };

        let ipv6 = if iface.ipv6_disabled || !ipv6_res.is_enabled() {
            InterfaceAddress::Disabled
        } else {
            match &iface.ipv6_address {
                Some(AddressMode::Static(text)) => match text.parse::<Ipv6Addr>() {
                    Ok(addr) if self.claim(&vlan.name, IpAddr::V6(addr), &host.hostname) => {
                        InterfaceAddress::Static(IpAddr::V6(addr))
                    }
                    _ => InterfaceAddress::Disabled,
                },
                Some(AddressMode::Dhcp) => InterfaceAddress::Dhcp,
                Some(AddressMode::Slaac) => InterfaceAddress::Slaac,
                None if vlan.dhcp6_managed => InterfaceAddress::Dhcp,
                None => InterfaceAddress::Slaac,
            }
        };

        let v4_static = match ipv4 {
            InterfaceAddress::Static(IpAddr::V4(addr)) => Some(addr),
            _ => None,
        };
        let v6_static = match ipv6 {
            InterfaceAddress::Static(IpAddr::V6(addr)) => Some(addr),
            _ => None,
        };
        // the router's own gateway address is already listed as a gateway entry
        let is_gateway = is_router && v4_static.is_some() && v4_static == gateway;
        if (v4_static.is_some() || v6_static.is_some()) && !is_gateway {
            self.vlans[index].entries.push(AddressEntry {
                hostname: host.hostname.clone(),
                kind: EntryKind::Interface,
                ipv4: v4_static,
                ipv6: v6_static,
                mac_address: mac_address.clone(),
                aliases: Vec::new(),
            });
        }

        Some(ResolvedInterface {
            name,
            vswitch: Some(vswitch.name.clone()),
            vlan: Some(vlan.name.clone()),
            uplink: None,
            ipv4,
            ipv4_prefixlen: Some(subnet.prefix_len()),
            ipv4_gateway: if is_router { None } else { gateway },
            ipv6,
            ipv6_prefixlen: ipv6_prefixlen(&ipv6_res),
            mac_address,
            firewall_zone: iface.firewall_zone.clone().or_else(|| Some(vlan.name.clone())),
        })
    }

    /// One gateway interface per routable vlan the router is not already attached to
    fn add_gateway_interfaces(&self, interfaces: &mut Vec<ResolvedInterface>) {
        for vlan in self.vlans.iter().filter(|v| v.routable) {
            let attached = interfaces
                .iter()
                .any(|iface| iface.vlan.as_deref() == Some(vlan.name.as_str()));
            if attached {
                continue;
            }
            let name = match vlan.id {
                Some(id) => format!("{}.{}", vlan.vswitch, id),
                None => vlan.vswitch.clone(),
            };
            let ipv6 = match (vlan.ipv6_gateway, &vlan.ipv6) {
                (Some(gw), _) => InterfaceAddress::Static(IpAddr::V6(gw)),
                (None, Ipv6Resolution::Delegated(_)) => InterfaceAddress::Delegated,
                _ => InterfaceAddress::Disabled,
            };
            interfaces.push(ResolvedInterface {
                name,
                vswitch: Some(vlan.vswitch.clone()),
                vlan: Some(vlan.name.clone()),
                uplink: None,
                ipv4: vlan
                    .ipv4_gateway
                    .map(|gw| InterfaceAddress::Static(IpAddr::V4(gw)))
                    .unwrap_or(InterfaceAddress::Disabled),
                ipv4_prefixlen: Some(vlan.ipv4_subnet.prefix_len()),
                ipv4_gateway: None,
                ipv6,
                ipv6_prefixlen: ipv6_prefixlen(&vlan.ipv6),
                mac_address: None,
                firewall_zone: Some(vlan.name.clone()),
            });
        }
    }

    /// Carve the DHCP pools of a vlan once every address is claimed
    fn carve_pools(&mut self, vlan: &Vlan) {
        let Some(index) = self.vlan_index(&vlan.name) else {
            return;
        };
        let resolved = &self.vlans[index];
        let subnet = resolved.ipv4_subnet;

        let mut pool4 = None;
        if vlan.allow_dhcp {
            let start = subnet.nth(u64::from(vlan.dhcp_min_address_ipv4));
            let end = subnet.nth(u64::from(vlan.dhcp_max_address_ipv4));
            if let (Some(start), Some(end)) = (start, end) {
                let (start, end) = (IpAddr::V4(start), IpAddr::V4(end));
                let mut excluded: Vec<IpAddr> = vec![
                    IpAddr::V4(subnet.network()),
                    IpAddr::V4(subnet.broadcast()),
                ];
                excluded.extend(resolved.ipv4_gateway.map(IpAddr::V4));
                excluded.extend(self.registry.claimed_between(start, end).map(|(addr, _)| *addr));
                pool4 = Some((DhcpPool::carve(start, end, excluded), start, end));
            }
        }

        let mut pool6 = None;
        if vlan.dhcp6_managed {
            if let Some(subnet6) = resolved.ipv6.subnet() {
                let start = subnet6.nth(u128::from(vlan.dhcp_min_address_ipv6));
                let end = subnet6.nth(u128::from(vlan.dhcp_max_address_ipv6));
                if let (Some(start), Some(end)) = (start, end) {
                    let (start, end) = (IpAddr::V6(start), IpAddr::V6(end));
                    let mut excluded: Vec<IpAddr> = vec![IpAddr::V6(subnet6.network())];
                    excluded.extend(resolved.ipv6_gateway.map(IpAddr::V6));
                    excluded.extend(self.registry.claimed_between(start, end).map(|(addr, _)| *addr));
                    pool6 = Some((DhcpPool::carve(start, end, excluded), start, end));
                }
            }
        }

        for (pool, start, end) in pool4.iter().chain(pool6.iter()) {
            if pool.is_empty() {
                self.errors.push(AddressResolutionError::PoolExhausted {
                    vlan: vlan.name.clone(),
                    start: *start,
                    end: *end,
                });
            } else {
                log::debug!("vlan '{}': DHCP pool of {} addresses in {}-{}", vlan.name, pool.len(), start, end);
            }
        }

        let resolved = &mut self.vlans[index];
        if let Some((pool, _, _)) = pool4 {
            resolved.dhcp4_pool = pool;
        }
        if let Some((pool, _, _)) = pool6 {
            resolved.dhcp6_pool = pool;
        }
    }
}

fn ipv6_prefixlen(resolution: &Ipv6Resolution) -> Option<u8> {
    match resolution {
        Ipv6Resolution::None => None,
        Ipv6Resolution::Static { subnet } => Some(subnet.prefix_len()),
        Ipv6Resolution::Delegated(delegated) => Some(delegated.prefixlen),
    }
}

fn resolve_uplink(iface: &Interface, name: String, mac_address: Option<String>) -> ResolvedInterface {
    let ipv4 = match &iface.ipv4_address {
        AddressMode::Static(text) => text
            .parse::<Ipv4Addr>()
            .map(|addr| InterfaceAddress::Static(IpAddr::V4(addr)))
            .unwrap_or(InterfaceAddress::Disabled),
        _ => InterfaceAddress::Dhcp,
    };
    let ipv6 = match &iface.ipv6_address {
        _ if iface.ipv6_disabled => InterfaceAddress::Disabled,
        Some(AddressMode::Static(text)) => text
            .parse::<Ipv6Addr>()
            .map(|addr| InterfaceAddress::Static(IpAddr::V6(addr)))
            .unwrap_or(InterfaceAddress::Disabled),
        Some(AddressMode::Dhcp) => InterfaceAddress::Dhcp,
        Some(AddressMode::Slaac) | None => InterfaceAddress::Slaac,
    };
    ResolvedInterface {
        name,
        vswitch: None,
        vlan: None,
        uplink: iface.uplink.clone(),
        ipv4,
        ipv4_prefixlen: iface.ipv4_prefixlen,
        ipv4_gateway: iface.ipv4_gateway.as_deref().and_then(|gw| gw.parse().ok()),
        ipv6,
        ipv6_prefixlen: None,
        mac_address,
        firewall_zone: iface.firewall_zone.clone().or_else(|| Some("internet".to_string())),
    }
}
