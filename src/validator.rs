//! Site validation.
//!
//! Structural and referential checks over a loaded [`Site`]. Every check runs
//! and every problem is collected, so one run reports all of them.

use crate::error::{CompileError, ValidationError};
use crate::ip::{AddressRegistry, Ipv4Cidr, Ipv6Cidr};
use crate::model::{AddressMode, Host, Interface, Locator, LocatorScope, Role, Site, Vlan, VlanRef};
use crate::utils::{is_valid_domain, is_valid_hostname, normalize_mac};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Vlan names that firewall locators reserve
const RESERVED_VLAN_NAMES: [&str; 3] = ["all", "internet", "firewall"];

/// Range of delegated prefix lengths a router may request
const PD_PREFIXLEN_RANGE: std::ops::RangeInclusive<u8> = 48..=63;

/// Parsed subnets and pool bounds of one vlan
#[derive(Debug, Default)]
struct VlanNetworks {
    ipv4: Option<Ipv4Cidr>,
    ipv6: Option<Ipv6Cidr>,
    pool4: Option<(IpAddr, IpAddr)>,
    pool6: Option<(IpAddr, IpAddr)>,
}

impl VlanNetworks {
    fn contains(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(a) => self.ipv4.is_some_and(|s| s.contains(a)),
            IpAddr::V6(a) => self.ipv6.is_some_and(|s| s.contains(a)),
        }
    }
}

/// True if `child` lies strictly below `parent`; every domain is below the root
fn is_subdomain(child: &str, parent: &str) -> bool {
    let child = child.trim_end_matches('.').to_ascii_lowercase();
    let parent = parent.trim_end_matches('.').to_ascii_lowercase();
    parent.is_empty() || child.ends_with(&format!(".{}", parent))
}

/// Validate a site, returning every problem found
///
/// # Returns
/// * `Ok(())` if the site is consistent
/// * `Err(CompileError::Validation)` with all violations in check order
pub fn validate_site(site: &Site) -> Result<(), CompileError> {
    let errors = collect_errors(site);
    if errors.is_empty() {
        log::info!("Site '{}' passed validation", site.name);
        Ok(())
    } else {
        Err(CompileError::Validation(errors))
    }
}

/// Run every check and return the violations in check order
pub fn collect_errors(site: &Site) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !is_valid_domain(&site.domain) {
        errors.push(invalid("site", "domain", format!("'{}' is not a valid domain", site.domain)));
    }
    validate_vswitches(site, &mut errors);
    let networks = validate_subnets(site, &mut errors);
    validate_hosts(site, &mut errors);
    validate_hosting(site, &mut errors);
    validate_interfaces(site, &networks, &mut errors);
    validate_addresses(site, &networks, &mut errors);
    validate_firewall(site, &networks, &mut errors);
    errors
}

fn invalid(location: impl Into<String>, field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField {
        location: location.into(),
        field,
        reason: reason.into(),
    }
}

fn unknown(location: impl Into<String>, kind: &'static str, name: impl ToString) -> ValidationError {
    ValidationError::UnknownReference {
        location: location.into(),
        kind,
        name: name.to_string(),
    }
}

/// Switch, vlan naming and tagging rules
fn validate_vswitches(site: &Site, errors: &mut Vec<ValidationError>) {
    if site.vswitches.is_empty() {
        errors.push(invalid("site", "vswitches", "at least one vswitch is required"));
    }

    let mut vswitch_names = HashSet::new();
    let mut uplinks = HashSet::new();
    let mut vlan_names = HashSet::new();
    for vswitch in &site.vswitches {
        if !vswitch_names.insert(vswitch.name.as_str()) {
            errors.push(ValidationError::DuplicateName { kind: "vswitch", name: vswitch.name.clone() });
        }
        if let Some(uplink) = &vswitch.uplink {
            if !uplinks.insert(uplink.as_str()) {
                errors.push(ValidationError::DuplicateName { kind: "vswitch uplink", name: uplink.clone() });
            }
        }
        if vswitch.vlans.is_empty() {
            errors.push(invalid(format!("vswitch '{}'", vswitch.name), "vlans", "at least one vlan is required"));
        }

        let mut ids = HashSet::new();
        let mut untagged = 0;
        for vlan in &vswitch.vlans {
            match vlan.id {
                None => untagged += 1,
                Some(id) => {
                    if !(1..=4094).contains(&id) {
                        errors.push(invalid(format!("vlan '{}'", vlan.name), "id", format!("{} is not in 1-4094", id)));
                    }
                    if !ids.insert(id) {
                        errors.push(ValidationError::DuplicateVlanId { vswitch: vswitch.name.clone(), id });
                    }
                }
            }
            if !vlan_names.insert(vlan.name.to_lowercase()) {
                errors.push(ValidationError::DuplicateName { kind: "vlan", name: vlan.name.clone() });
            }
            if RESERVED_VLAN_NAMES.iter().any(|r| r.eq_ignore_ascii_case(&vlan.name)) {
                errors.push(invalid(format!("vlan '{}'", vlan.name), "name", "name is reserved for firewall locators"));
            }
            if !is_valid_domain(&vlan.domain) {
                errors.push(invalid(format!("vlan '{}'", vlan.name), "domain", format!("'{}' is not a valid domain", vlan.domain)));
            } else if !vlan.domain.is_empty() && !is_subdomain(&vlan.domain, &site.domain) {
                errors.push(invalid(
                    format!("vlan '{}'", vlan.name),
                    "domain",
                    format!("'{}' is not a subdomain of '{}'", vlan.domain, site.domain),
                ));
            }
            for access in &vlan.access_vlans {
                let is_all = matches!(access, VlanRef::Name(name) if name.eq_ignore_ascii_case("all"));
                if !is_all && site.lookup_vlan(None, access).is_none() {
                    errors.push(unknown(format!("vlan '{}' access_vlans", vlan.name), "vlan", access));
                }
            }
        }
        if untagged > 1 {
            errors.push(ValidationError::MultipleUntaggedVlans { vswitch: vswitch.name.clone() });
        }
    }

    let defaults: Vec<&str> = site.vlans().filter(|(_, v)| v.default).map(|(_, v)| v.name.as_str()).collect();
    if defaults.len() > 1 {
        errors.push(ValidationError::MultipleDefaultVlans { vlans: defaults.join(", ") });
    }
}

/// Parse subnets, check pool bounds and site-wide non-overlap
fn validate_subnets(site: &Site, errors: &mut Vec<ValidationError>) -> BTreeMap<String, VlanNetworks> {
    let mut networks = BTreeMap::new();
    let mut seen4: Vec<(&str, Ipv4Cidr)> = Vec::new();
    let mut seen6: Vec<(&str, Ipv6Cidr)> = Vec::new();

    for (_, vlan) in site.vlans() {
        let location = format!("vlan '{}'", vlan.name);
        let mut parsed = VlanNetworks::default();

        match vlan.ipv4_subnet.parse::<Ipv4Cidr>() {
            Ok(subnet) => {
                for (other, other_subnet) in &seen4 {
                    if subnet.overlaps(other_subnet) {
                        errors.push(ValidationError::SubnetOverlap {
                            vlan: vlan.name.clone(),
                            subnet: subnet.to_string(),
                            other: other.to_string(),
                            other_subnet: other_subnet.to_string(),
                        });
                    }
                }
                seen4.push((&vlan.name, subnet));
                parsed.ipv4 = Some(subnet);
                if vlan.allow_dhcp {
                    parsed.pool4 = pool_bounds4(vlan, subnet, errors);
                }
            }
            Err(e) => errors.push(invalid(&location, "ipv4_subnet", e.to_string())),
        }

        if let Some(text) = vlan.explicit_ipv6_subnet() {
            match text.parse::<Ipv6Cidr>() {
                Ok(subnet) if subnet.prefix_len() > 64 => {
                    errors.push(invalid(&location, "ipv6_subnet", format!("{} is longer than /64", subnet)));
                }
                Ok(subnet) => {
                    for (other, other_subnet) in &seen6 {
                        if subnet.overlaps(other_subnet) {
                            errors.push(ValidationError::SubnetOverlap {
                                vlan: vlan.name.clone(),
                                subnet: subnet.to_string(),
                                other: other.to_string(),
                                other_subnet: other_subnet.to_string(),
                            });
                        }
                    }
                    seen6.push((&vlan.name, subnet));
                    parsed.ipv6 = Some(subnet);
                    if vlan.dhcp6_managed {
                        parsed.pool6 = pool_bounds6(vlan, subnet, errors);
                    }
                }
                Err(e) => errors.push(invalid(&location, "ipv6_subnet", e.to_string())),
            }
        }

        if vlan.uses_prefix_delegation() && !(1..=64).contains(&vlan.ipv6_prefixlen) {
            errors.push(invalid(&location, "ipv6_prefixlen", format!("/{} is not in /1-/64", vlan.ipv6_prefixlen)));
        }
        networks.insert(vlan.name.clone(), parsed);
    }
    networks
}

/// Pool bounds must lie strictly between the network and broadcast addresses
fn pool_bounds4(vlan: &Vlan, subnet: Ipv4Cidr, errors: &mut Vec<ValidationError>) -> Option<(IpAddr, IpAddr)> {
    let (min, max) = (u64::from(vlan.dhcp_min_address_ipv4), u64::from(vlan.dhcp_max_address_ipv4));
    if min == 0 || min > max || max >= subnet.size().saturating_sub(1) {
        errors.push(ValidationError::PoolOutOfSubnet { vlan: vlan.name.clone(), subnet: subnet.to_string(), min, max });
        return None;
    }
    Some((IpAddr::V4(subnet.nth(min)?), IpAddr::V4(subnet.nth(max)?)))
}

fn pool_bounds6(vlan: &Vlan, subnet: Ipv6Cidr, errors: &mut Vec<ValidationError>) -> Option<(IpAddr, IpAddr)> {
    let (min, max) = (vlan.dhcp_min_address_ipv6, vlan.dhcp_max_address_ipv6);
    let start = subnet.nth(u128::from(min));
    let end = subnet.nth(u128::from(max));
    match (start, end) {
        (Some(start), Some(end)) if min > 0 && min <= max => Some((IpAddr::V6(start), IpAddr::V6(end))),
        _ => {
            errors.push(ValidationError::PoolOutOfSubnet { vlan: vlan.name.clone(), subnet: subnet.to_string(), min, max });
            None
        }
    }
}

/// Hostname rules, uniqueness and role constraints
fn validate_hosts(site: &Site, errors: &mut Vec<ValidationError>) {
    let mut hostnames = HashSet::new();
    for host in &site.hosts {
        if !is_valid_hostname(&host.hostname) {
            errors.push(invalid(format!("host '{}'", host.hostname), "hostname", "not a valid DNS label"));
        }
        if !hostnames.insert(host.hostname.as_str()) {
            errors.push(ValidationError::DuplicateName { kind: "host", name: host.hostname.clone() });
        }
        for alias in &host.aliases {
            check_alias(&format!("host '{}'", host.hostname), alias, errors);
        }
        if host.interfaces.is_empty() {
            errors.push(invalid(format!("host '{}'", host.hostname), "interfaces", "at least one interface is required"));
        }
    }

    let routers: Vec<&str> = site.hosts_with_role(Role::Router).map(|h| h.hostname.as_str()).collect();
    if routers.len() > 1 {
        errors.push(ValidationError::MultipleRouters { hosts: routers.join(", ") });
    }
}

fn check_alias(location: &str, alias: &str, errors: &mut Vec<ValidationError>) {
    if !is_valid_hostname(alias) {
        errors.push(invalid(location, "alias", format!("'{}' is not a valid DNS label", alias)));
    } else if Role::is_role_name(alias) {
        errors.push(invalid(location, "alias", format!("'{}' is a role name", alias)));
    }
}

/// VM to vmhost references and acyclicity of the hosting relation
fn validate_hosting(site: &Site, errors: &mut Vec<ValidationError>) {
    for host in &site.hosts {
        let location = format!("host '{}'", host.hostname);
        match (&host.vmhost, host.is_vm) {
            (None, true) => errors.push(invalid(&location, "vmhost", "a VM must name its vmhost")),
            (Some(_), false) => errors.push(invalid(&location, "vmhost", "only VMs may name a vmhost")),
            (Some(vmhost), true) => match site.find_host(vmhost) {
                None => errors.push(unknown(&location, "vmhost", vmhost)),
                Some(target) if !target.has_role(Role::Vmhost) => {
                    errors.push(invalid(&location, "vmhost", format!("host '{}' does not have the vmhost role", vmhost)));
                }
                Some(_) => {}
            },
            (None, false) => {}
        }
    }

    let mut reported: BTreeSet<Vec<String>> = BTreeSet::new();
    for start in &site.hosts {
        let mut chain: Vec<&str> = vec![start.hostname.as_str()];
        let mut current = start;
        while let Some(parent) = current.vmhost.as_deref().and_then(|name| site.find_host(name)) {
            if let Some(pos) = chain.iter().position(|h| *h == parent.hostname) {
                let mut members: Vec<String> = chain[pos..].iter().map(|h| h.to_string()).collect();
                members.sort();
                if reported.insert(members.clone()) {
                    errors.push(ValidationError::HostingCycle { hosts: members.join(", ") });
                }
                break;
            }
            chain.push(&parent.hostname);
            current = parent;
        }
    }
}

/// Interface shape, vlan references and addressing modes
fn validate_interfaces(site: &Site, networks: &BTreeMap<String, VlanNetworks>, errors: &mut Vec<ValidationError>) {
    for host in &site.hosts {
        let names = host.interface_names();
        let mut seen = HashSet::new();
        for (iface, name) in host.interfaces.iter().zip(&names) {
            let location = format!("host '{}' interface '{}'", host.hostname, name);
            if !seen.insert(name.as_str()) {
                errors.push(ValidationError::DuplicateName {
                    kind: "interface",
                    name: format!("{}/{}", host.hostname, name),
                });
            }
            if let Some(mac) = &iface.mac_address {
                if normalize_mac(mac).is_none() {
                    errors.push(invalid(&location, "mac_address", format!("'{}' is not a MAC address", mac)));
                }
            }

            match (&iface.uplink, &iface.vswitch) {
                (Some(_), Some(_)) => errors.push(invalid(&location, "uplink", "an uplink cannot also join a vswitch")),
                (None, None) => errors.push(invalid(&location, "vswitch", "either vswitch or uplink is required")),
                (Some(_), None) => validate_uplink(host, iface, &location, errors),
                (None, Some(vswitch)) => {
                    if site.find_vswitch(vswitch).is_none() {
                        errors.push(unknown(&location, "vswitch", vswitch));
                        continue;
                    }
                    match site.interface_vlan(iface) {
                        Some((_, vlan)) => {
                            let parsed = networks.get(&vlan.name);
                            validate_vlan_interface(host, iface, vlan, parsed, &location, errors);
                        }
                        None => match &iface.vlan {
                            Some(vlan) => errors.push(unknown(&location, "vlan", vlan)),
                            None => errors.push(invalid(&location, "vlan", format!("vswitch '{}' has no untagged or default vlan", vswitch))),
                        },
                    }
                }
            }
        }
    }
}

fn validate_uplink(host: &Host, iface: &Interface, location: &str, errors: &mut Vec<ValidationError>) {
    match &iface.ipv4_address {
        AddressMode::Static(text) => {
            if text.parse::<Ipv4Addr>().is_err() {
                errors.push(invalid(location, "ipv4_address", format!("'{}' is not an IPv4 address", text)));
            }
            if !iface.ipv4_prefixlen.is_some_and(|len| (1..=32).contains(&len)) {
                errors.push(invalid(location, "ipv4_prefixlen", "a static uplink needs a prefix length of 1-32"));
            }
        }
        AddressMode::Slaac => errors.push(invalid(location, "ipv4_address", "slaac is IPv6 only")),
        AddressMode::Dhcp => {}
    }
    if let Some(gateway) = &iface.ipv4_gateway {
        if gateway.parse::<Ipv4Addr>().is_err() {
            errors.push(invalid(location, "ipv4_gateway", format!("'{}' is not an IPv4 address", gateway)));
        }
    }
    if let Some(AddressMode::Static(text)) = &iface.ipv6_address {
        if text.parse::<Ipv6Addr>().is_err() {
            errors.push(invalid(location, "ipv6_address", format!("'{}' is not an IPv6 address", text)));
        }
    }

    if let Some(len) = iface.requested_pd_prefixlen() {
        if !host.has_role(Role::Router) {
            errors.push(invalid(location, "ipv6_pd_prefixlen", "only the router can request prefix delegation"));
        }
        if !PD_PREFIXLEN_RANGE.contains(&len) {
            errors.push(invalid(location, "ipv6_pd_prefixlen", format!("/{} is not in /48-/63", len)));
        }
        if let Some(text) = &iface.ipv6_delegated_prefix {
            match text.parse::<Ipv6Cidr>() {
                Ok(prefix) if prefix.prefix_len() != len => errors.push(invalid(
                    location,
                    "ipv6_delegated_prefix",
                    format!("{} does not match the requested /{}", prefix, len),
                )),
                Ok(_) => {}
                Err(e) => errors.push(invalid(location, "ipv6_delegated_prefix", e.to_string())),
            }
        }
    } else if iface.ipv6_delegated_prefix.is_some() {
        errors.push(invalid(location, "ipv6_delegated_prefix", "set without requesting prefix delegation"));
    }
}

fn validate_vlan_interface(
    host: &Host,
    iface: &Interface,
    vlan: &Vlan,
    parsed: Option<&VlanNetworks>,
    location: &str,
    errors: &mut Vec<ValidationError>,
) {
    let serves_addresses = host.has_role(Role::Dns) || host.has_role(Role::Dhcp);
    match &iface.ipv4_address {
        AddressMode::Slaac => errors.push(invalid(location, "ipv4_address", "slaac is IPv6 only")),
        AddressMode::Dhcp if serves_addresses => {
            errors.push(invalid(location, "ipv4_address", "DNS and DHCP servers need a static address"));
        }
        AddressMode::Dhcp if !vlan.allow_dhcp => {
            errors.push(invalid(location, "ipv4_address", format!("vlan '{}' does not offer DHCP", vlan.name)));
        }
        AddressMode::Static(text) => match text.parse::<Ipv4Addr>() {
            Err(_) => errors.push(invalid(location, "ipv4_address", format!("'{}' is not an IPv4 address", text))),
            Ok(addr) => {
                if let Some(subnet) = parsed.and_then(|p| p.ipv4) {
                    if !subnet.contains(addr) {
                        errors.push(ValidationError::AddressOutsideSubnet {
                            location: location.to_string(),
                            address: IpAddr::V4(addr),
                            subnet: subnet.to_string(),
                        });
                    }
                }
            }
        },
        AddressMode::Dhcp => {}
    }

    if let Some(AddressMode::Static(text)) = &iface.ipv6_address {
        match (text.parse::<Ipv6Addr>(), parsed.and_then(|p| p.ipv6)) {
            (Err(_), _) => errors.push(invalid(location, "ipv6_address", format!("'{}' is not an IPv6 address", text))),
            (Ok(_), None) => errors.push(invalid(
                location,
                "ipv6_address",
                format!("vlan '{}' has no explicit IPv6 subnet", vlan.name),
            )),
            (Ok(addr), Some(subnet)) if !subnet.contains(addr) => errors.push(ValidationError::AddressOutsideSubnet {
                location: location.to_string(),
                address: IpAddr::V6(addr),
                subnet: subnet.to_string(),
            }),
            (Ok(_), Some(_)) => {}
        }
    }
}

/// Site-wide address uniqueness, subnet membership and pool separation
fn validate_addresses(site: &Site, networks: &BTreeMap<String, VlanNetworks>, errors: &mut Vec<ValidationError>) {
    let mut registry = AddressRegistry::new();
    let gateway_owner = site
        .hosts_with_role(Role::Router)
        .next()
        .map(|r| r.hostname.as_str())
        .unwrap_or("gateway");

    for (_, vlan) in site.routable_vlans() {
        let Some(parsed) = networks.get(&vlan.name) else { continue };
        let gateways = [
            parsed.ipv4.and_then(|s| s.gateway()).map(IpAddr::V4),
            parsed.ipv6.and_then(|s| s.gateway()).map(IpAddr::V6),
        ];
        for gateway in gateways.into_iter().flatten() {
            // subnets are checked for overlap separately
            let _ = registry.register(gateway, gateway_owner);
        }
    }

    let mut claim = |vlan: &Vlan, addr: IpAddr, owner: &str, errors: &mut Vec<ValidationError>| {
        let parsed = networks.get(&vlan.name);
        let subnet = match addr {
            IpAddr::V4(a) => parsed.and_then(|p| p.ipv4).map(|s| (s.contains(a), s.to_string())),
            IpAddr::V6(a) => parsed.and_then(|p| p.ipv6).map(|s| (s.contains(a), s.to_string())),
        };
        if let Some((false, subnet)) = subnet {
            errors.push(ValidationError::AddressOutsideSubnet {
                location: format!("vlan '{}' entry '{}'", vlan.name, owner),
                address: addr,
                subnet,
            });
            return;
        }
        let pool = match addr {
            IpAddr::V4(_) => parsed.and_then(|p| p.pool4),
            IpAddr::V6(_) => parsed.and_then(|p| p.pool6),
        };
        if let Some((start, end)) = pool {
            if start <= addr && addr <= end {
                errors.push(ValidationError::PoolOverlapsStatic {
                    vlan: vlan.name.clone(),
                    address: addr,
                    owner: owner.to_string(),
                    start,
                    end,
                });
            }
        }
        if let Err(other) = registry.register(addr, owner) {
            errors.push(ValidationError::DuplicateAddress { address: addr, owner: owner.to_string(), other });
        }
    };

    for (_, vlan) in site.vlans() {
        let has_ipv6_subnet = networks.get(&vlan.name).is_some_and(|p| p.ipv6.is_some());
        let mut names = HashSet::new();
        let mut check_name = |name: &str, errors: &mut Vec<ValidationError>| {
            if !names.insert(name.to_lowercase()) {
                errors.push(ValidationError::DuplicateName { kind: "vlan hostname", name: format!("{}/{}", vlan.name, name) });
            }
        };

        for entry in &vlan.static_hosts {
            let location = format!("vlan '{}' static host '{}'", vlan.name, entry.hostname);
            if !is_valid_hostname(&entry.hostname) {
                errors.push(invalid(&location, "hostname", "not a valid DNS label"));
            }
            check_name(&entry.hostname, errors);
            for alias in &entry.aliases {
                check_alias(&location, alias, errors);
                check_name(alias, errors);
            }
            match entry.ipv4_address.parse::<Ipv4Addr>() {
                Ok(addr) => claim(vlan, IpAddr::V4(addr), &entry.hostname, errors),
                Err(_) => errors.push(invalid(&location, "ipv4_address", format!("'{}' is not an IPv4 address", entry.ipv4_address))),
            }
            if let Some(text) = &entry.ipv6_address {
                claim_ipv6(vlan, has_ipv6_subnet, text, &entry.hostname, &location, &mut claim, errors);
            }
        }

        for entry in &vlan.dhcp_reservations {
            let location = format!("vlan '{}' reservation '{}'", vlan.name, entry.hostname);
            if !is_valid_hostname(&entry.hostname) {
                errors.push(invalid(&location, "hostname", "not a valid DNS label"));
            }
            check_name(&entry.hostname, errors);
            for alias in &entry.aliases {
                check_alias(&location, alias, errors);
                check_name(alias, errors);
            }
            if normalize_mac(&entry.mac_address).is_none() {
                errors.push(invalid(&location, "mac_address", format!("'{}' is not a MAC address", entry.mac_address)));
            }
            if let Some(text) = &entry.ipv4_address {
                match text.parse::<Ipv4Addr>() {
                    Ok(addr) => claim(vlan, IpAddr::V4(addr), &entry.hostname, errors),
                    Err(_) => errors.push(invalid(&location, "ipv4_address", format!("'{}' is not an IPv4 address", text))),
                }
            }
            if let Some(text) = &entry.ipv6_address {
                claim_ipv6(vlan, has_ipv6_subnet, text, &entry.hostname, &location, &mut claim, errors);
            }
        }
    }

    // interface addresses outside their subnet are reported with the interface
    for host in &site.hosts {
        for iface in host.interfaces.iter().filter(|i| !i.is_uplink()) {
            let Some((_, vlan)) = site.interface_vlan(iface) else { continue };
            let parsed = networks.get(&vlan.name);
            if let AddressMode::Static(text) = &iface.ipv4_address {
                if let Ok(addr) = text.parse::<Ipv4Addr>() {
                    if parsed.and_then(|p| p.ipv4).is_some_and(|s| s.contains(addr)) {
                        claim(vlan, IpAddr::V4(addr), &host.hostname, errors);
                    }
                }
            }
            if let Some(AddressMode::Static(text)) = &iface.ipv6_address {
                if let Ok(addr) = text.parse::<Ipv6Addr>() {
                    if parsed.and_then(|p| p.ipv6).is_some_and(|s| s.contains(addr)) {
                        claim(vlan, IpAddr::V6(addr), &host.hostname, errors);
                    }
                }
            }
        }
    }
}

fn claim_ipv6<F>(
    vlan: &Vlan,
    has_ipv6_subnet: bool,
    text: &str,
    owner: &str,
    location: &str,
    claim: &mut F,
    errors: &mut Vec<ValidationError>,
) where
    F: FnMut(&Vlan, IpAddr, &str, &mut Vec<ValidationError>),
{
    match text.parse::<Ipv6Addr>() {
        Err(_) => errors.push(invalid(location, "ipv6_address", format!("'{}' is not an IPv6 address", text))),
        Ok(_) if !has_ipv6_subnet => errors.push(invalid(
            location,
            "ipv6_address",
            format!("vlan '{}' has no explicit IPv6 subnet", vlan.name),
        )),
        Ok(addr) => claim(vlan, IpAddr::V6(addr), owner, errors),
    }
}

/// Ipsets and the references made by firewall locators
fn validate_firewall(site: &Site, networks: &BTreeMap<String, VlanNetworks>, errors: &mut Vec<ValidationError>) {
    let mut ipsets = HashSet::new();
    for ipset in &site.firewall.ipsets {
        let location = format!("ipset '{}'", ipset.name);
        if !ipsets.insert(ipset.name.as_str()) {
            errors.push(ValidationError::DuplicateName { kind: "ipset", name: ipset.name.clone() });
        }
        if ipset.addresses.is_empty() {
            errors.push(invalid(&location, "addresses", "an ipset needs at least one address"));
        }
        let mut families = BTreeSet::new();
        for address in &ipset.addresses {
            match parse_address_or_network(address) {
                Some(is_v4) => {
                    families.insert(is_v4);
                }
                None => errors.push(invalid(&location, "addresses", format!("'{}' is not an address or network", address))),
            }
        }
        if families.len() > 1 {
            errors.push(invalid(&location, "addresses", "mixes IPv4 and IPv6 entries"));
        }
    }

    for (index, rule) in site.firewall.rules.iter().enumerate() {
        let location = if rule.comment.is_empty() {
            format!("firewall rule #{}", index + 1)
        } else {
            format!("firewall rule '{}'", rule.comment)
        };
        if rule.sources.is_empty() {
            errors.push(invalid(&location, "sources", "at least one source is required"));
        }
        if rule.destinations.is_empty() {
            errors.push(invalid(&location, "destinations", "at least one destination is required"));
        }
        for locator in rule.sources.iter().chain(&rule.destinations) {
            validate_locator(site, networks, locator, &location, errors);
        }
    }
}

fn validate_locator(
    site: &Site,
    networks: &BTreeMap<String, VlanNetworks>,
    locator: &Locator,
    location: &str,
    errors: &mut Vec<ValidationError>,
) {
    let narrowings = [
        locator.hostname.is_some(),
        locator.ipset.is_some(),
        locator.ipv4_address.is_some(),
        locator.ipv6_address.is_some(),
    ];
    if narrowings.iter().filter(|n| **n).count() > 1 {
        errors.push(invalid(location, "locator", format!("'{}' is narrowed more than once", locator.vlan)));
    }
    if let Some(ipset) = &locator.ipset {
        if !site.firewall.ipsets.iter().any(|s| &s.name == ipset) {
            errors.push(unknown(location, "ipset", ipset));
        }
    }
    let mut addresses = Vec::new();
    if let Some(text) = &locator.ipv4_address {
        match text.parse::<Ipv4Addr>() {
            Ok(addr) => addresses.push(IpAddr::V4(addr)),
            Err(_) => errors.push(invalid(location, "ipv4_address", format!("'{}' is not an IPv4 address", text))),
        }
    }
    if let Some(text) = &locator.ipv6_address {
        match text.parse::<Ipv6Addr>() {
            Ok(addr) => addresses.push(IpAddr::V6(addr)),
            Err(_) => errors.push(invalid(location, "ipv6_address", format!("'{}' is not an IPv6 address", text))),
        }
    }

    match locator.scope() {
        LocatorScope::All | LocatorScope::Firewall => {
            if locator.is_narrowed() {
                errors.push(invalid(location, "locator", format!("'{}' cannot be narrowed", locator.vlan)));
            }
        }
        LocatorScope::Internet => {
            if locator.hostname.is_some() {
                errors.push(invalid(location, "hostname", "the internet has no named hosts"));
            }
            for &address in &addresses {
                let inside = site.vlans().find(|(_, vlan)| {
                    networks.get(&vlan.name).is_some_and(|parsed| parsed.contains(address))
                });
                if let Some((_, vlan)) = inside {
                    errors.push(ValidationError::InternetAddressInVlan {
                        location: location.to_string(),
                        address,
                        vlan: vlan.name.clone(),
                    });
                }
            }
        }
        LocatorScope::Vlan(vlan_ref) => match site.lookup_vlan(locator.vswitch.as_deref(), vlan_ref) {
            None => errors.push(unknown(location, "vlan", vlan_ref)),
            Some((_, vlan)) => {
                if let Some(hostname) = &locator.hostname {
                    if !vlan_has_name(site, vlan, hostname) {
                        errors.push(unknown(location, "host", format!("{}/{}", vlan.name, hostname)));
                    }
                }
                let parsed = networks.get(&vlan.name);
                for &address in &addresses {
                    // delegated vlans have no concrete IPv6 subnet to check against
                    let subnet = match address {
                        IpAddr::V4(_) => parsed.and_then(|p| p.ipv4).map(|s| s.to_string()),
                        IpAddr::V6(_) => parsed.and_then(|p| p.ipv6).map(|s| s.to_string()),
                    };
                    if let Some(subnet) = subnet {
                        if !parsed.is_some_and(|p| p.contains(address)) {
                            errors.push(ValidationError::AddressOutsideSubnet {
                                location: location.to_string(),
                                address,
                                subnet,
                            });
                        }
                    }
                }
            }
        },
    }
}

/// True if `name` is a host, static host, reservation or alias on the vlan
pub(crate) fn vlan_has_name(site: &Site, vlan: &Vlan, name: &str) -> bool {
    let matches = |candidate: &str| candidate.eq_ignore_ascii_case(name);
    vlan.static_hosts
        .iter()
        .any(|h| matches(&h.hostname) || h.aliases.iter().any(|a| matches(a)))
        || vlan
            .dhcp_reservations
            .iter()
            .any(|r| matches(&r.hostname) || r.aliases.iter().any(|a| matches(a)))
        || site.hosts.iter().any(|host| {
            let is_router = host.has_role(Role::Router);
            let named = matches(&host.hostname)
                || host.aliases.iter().any(|a| matches(a))
                || (is_router && matches(crate::ip::ROUTER_ALIAS));
            // the router owns the gateway of every routable vlan
            named
                && ((is_router && vlan.routable)
                    || host
                        .interfaces
                        .iter()
                        .any(|iface| site.interface_vlan(iface).is_some_and(|(_, v)| v.name == vlan.name)))
        })
}

/// `Some(true)` for IPv4, `Some(false)` for IPv6, `None` if unparseable
pub(crate) fn parse_address_or_network(text: &str) -> Option<bool> {
    if text.contains('/') {
        if text.parse::<Ipv4Cidr>().is_ok() {
            return Some(true);
        }
        return text.parse::<Ipv6Cidr>().ok().map(|_| false);
    }
    text.parse::<IpAddr>().ok().map(|addr| addr.is_ipv4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SITE: &str = r#"
name: home
domain: example.net
vswitches:
  - name: switch0
    uplink: eno1
    vlans:
      - name: a
        id: 10
        default: true
        ipv4_subnet: 192.168.210.0/24
        allow_dhcp: false
      - name: b
        id: 20
        ipv4_subnet: 192.168.220.0/24
        ipv6_subnet: fd00:220::/64
        dhcp_min_address_ipv4: 16
        dhcp_max_address_ipv4: 128
        static_hosts:
          - hostname: printer
            ipv4_address: 192.168.220.200
        dhcp_reservations:
          - hostname: tv
            mac_address: aa:bb:cc:dd:ee:01
            ipv4_address: 192.168.220.201
firewall:
  ipsets:
    - name: admins
      addresses: [192.168.220.200, 10.9.0.0/16]
  rules:
    - comment: ssh to the nas
      source: {vlan: a}
      destination: {vlan: b, hostname: nas}
      allow: ssh
hosts:
  - hostname: router
    role: router
    interfaces:
      - name: wan
        uplink: eth0
        ipv6_pd_prefixlen: 56
      - vswitch: switch0
        ipv4_address: 192.168.210.1
  - hostname: hyper
    role: vmhost
    interfaces:
      - vswitch: switch0
        vlan: a
        ipv4_address: 192.168.210.2
  - hostname: nas
    is_vm: true
    vmhost: hyper
    interfaces:
      - vswitch: switch0
        vlan: b
        ipv4_address: 192.168.220.5
"#;

    fn site(yaml: &str) -> Site {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_site() {
        assert_eq!(collect_errors(&site(SITE)), Vec::<ValidationError>::new());
        assert!(validate_site(&site(SITE)).is_ok());
    }

    #[test]
    fn test_duplicate_reservation_address() {
        let yaml = SITE.replace(
            "            ipv4_address: 192.168.220.201\n",
            "            ipv4_address: 192.168.220.24\n          - hostname: radio\n            mac_address: aa:bb:cc:dd:ee:02\n            ipv4_address: 192.168.220.24\n",
        );
        let errors = collect_errors(&site(&yaml));
        assert!(errors.contains(&ValidationError::DuplicateAddress {
            address: "192.168.220.24".parse().unwrap(),
            owner: "radio".into(),
            other: "tv".into(),
        }));
        assert!(errors.iter().any(|e| e.to_string().starts_with("duplicate address 192.168.220.24")));
    }

    #[test]
    fn test_reservation_inside_pool() {
        let yaml = SITE.replace("ipv4_address: 192.168.220.201", "ipv4_address: 192.168.220.20");
        let errors = collect_errors(&site(&yaml));
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ValidationError::PoolOverlapsStatic { owner, .. } if owner == "tv"));
    }

    #[test]
    fn test_static_host_on_gateway() {
        let yaml = SITE.replace("ipv4_address: 192.168.220.200", "ipv4_address: 192.168.220.1");
        let errors = collect_errors(&site(&yaml));
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateAddress {
                address: "192.168.220.1".parse().unwrap(),
                owner: "printer".into(),
                other: "router".into(),
            }]
        );
    }

    #[test]
    fn test_subnet_overlap_across_vswitches() {
        let yaml = SITE.replace(
            "firewall:",
            "  - name: switch1\n    vlans:\n      - name: c\n        ipv4_subnet: 192.168.220.128/25\n        allow_dhcp: false\nfirewall:",
        );
        let errors = collect_errors(&site(&yaml));
        assert_eq!(
            errors,
            vec![ValidationError::SubnetOverlap {
                vlan: "c".into(),
                subnet: "192.168.220.128/25".into(),
                other: "b".into(),
                other_subnet: "192.168.220.0/24".into(),
            }]
        );
    }

    #[test]
    fn test_vswitch_and_vlan_rules() {
        let yaml = SITE
            .replace("        id: 20\n", "        id: 10\n        default: true\n")
            .replace("name: b\n", "name: A\n");
        let errors = collect_errors(&site(&yaml));
        assert!(errors.contains(&ValidationError::DuplicateVlanId { vswitch: "switch0".into(), id: 10 }));
        assert!(errors.contains(&ValidationError::DuplicateName { kind: "vlan", name: "A".into() }));
        assert!(errors.contains(&ValidationError::MultipleDefaultVlans { vlans: "a, A".into() }));
    }

    #[test]
    fn test_hosting_rules() {
        let yaml = SITE.replace("vmhost: hyper", "vmhost: router");
        let errors = collect_errors(&site(&yaml));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("does not have the vmhost role"));

        let cyclic = SITE
            .replace("    role: vmhost\n", "    role: vmhost\n    is_vm: true\n    vmhost: nas\n")
            .replace("  - hostname: nas\n", "  - hostname: nas\n    role: vmhost\n");
        let errors = collect_errors(&site(&cyclic));
        assert_eq!(errors, vec![ValidationError::HostingCycle { hosts: "hyper, nas".into() }]);
    }

    #[test]
    fn test_interface_rules() {
        let yaml = SITE
            .replace("vlan: b\n        ipv4_address: 192.168.220.5", "vlan: b\n        ipv4_address: 192.168.221.5")
            .replace("  - hostname: hyper\n    role: vmhost", "  - hostname: hyper\n    roles: [vmhost, dns]")
            .replace("ipv4_address: 192.168.210.2", "ipv4_address: dhcp");
        let errors: Vec<String> = collect_errors(&site(&yaml)).iter().map(|e| e.to_string()).collect();
        assert_eq!(
            errors,
            vec![
                "host 'hyper' interface 'eth0': invalid ipv4_address: DNS and DHCP servers need a static address",
                "host 'nas' interface 'eth0': address 192.168.221.5 is outside subnet 192.168.220.0/24",
            ]
        );
    }

    #[test]
    fn test_firewall_references() {
        let yaml = SITE
            .replace("destination: {vlan: b, hostname: nas}", "destination: {vlan: b, hostname: scanner}")
            .replace("source: {vlan: a}", "source: {vlan: c, ipset: ops}");
        let errors: Vec<String> = collect_errors(&site(&yaml)).iter().map(|e| e.to_string()).collect();
        assert_eq!(
            errors,
            vec![
                "firewall rule 'ssh to the nas': unknown ipset 'ops'",
                "firewall rule 'ssh to the nas': unknown vlan 'c'",
                "firewall rule 'ssh to the nas': unknown host 'b/scanner'",
            ]
        );
    }

    #[test]
    fn test_locator_addresses_must_match_their_vlan() {
        let yaml = SITE
            .replace("source: {vlan: a}", "source: {vlan: internet, ipv4_address: 192.168.220.9}")
            .replace("destination: {vlan: b, hostname: nas}", "destination: {vlan: a, ipv4_address: 10.99.0.1}");
        assert_eq!(
            collect_errors(&site(&yaml)),
            vec![
                ValidationError::InternetAddressInVlan {
                    location: "firewall rule 'ssh to the nas'".into(),
                    address: "192.168.220.9".parse().unwrap(),
                    vlan: "b".into(),
                },
                ValidationError::AddressOutsideSubnet {
                    location: "firewall rule 'ssh to the nas'".into(),
                    address: "10.99.0.1".parse().unwrap(),
                    subnet: "192.168.210.0/24".into(),
                },
            ]
        );

        let v6 = SITE
            .replace("source: {vlan: a}", "source: {vlan: internet, ipv6_address: \"2001:db8::1\"}")
            .replace("destination: {vlan: b, hostname: nas}", "destination: {vlan: b, ipv6_address: \"fd00:999::1\"}");
        let errors: Vec<String> = collect_errors(&site(&v6)).iter().map(|e| e.to_string()).collect();
        assert_eq!(
            errors,
            vec!["firewall rule 'ssh to the nas': address fd00:999::1 is outside subnet fd00:220::/64"]
        );

        let inside = SITE.replace("destination: {vlan: b, hostname: nas}", "destination: {vlan: b, ipv4_address: 192.168.220.9}");
        assert_eq!(collect_errors(&site(&inside)), Vec::<ValidationError>::new());
    }

    #[test]
    fn test_vlan_domain_below_site_domain() {
        let below = SITE.replace("        id: 20\n", "        id: 20\n        domain: iot.example.net\n");
        assert_eq!(collect_errors(&site(&below)), Vec::<ValidationError>::new());

        for domain in ["example.net", "iot.example.org", "badexample.net"] {
            let yaml = SITE.replace("        id: 20\n", &format!("        id: 20\n        domain: {}\n", domain));
            assert_eq!(
                collect_errors(&site(&yaml)),
                vec![ValidationError::InvalidField {
                    location: "vlan 'b'".into(),
                    field: "domain",
                    reason: format!("'{}' is not a subdomain of 'example.net'", domain),
                }]
            );
        }
    }

    #[test]
    fn test_prefix_delegation_length() {
        let yaml = SITE.replace("ipv6_pd_prefixlen: 56", "ipv6_pd_prefixlen: 64");
        let errors = collect_errors(&site(&yaml));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("/64 is not in /48-/63"));
    }

    #[test]
    fn test_alias_rules() {
        let yaml = SITE.replace("hostname: printer\n", "hostname: printer\n            aliases: [dns, tv]\n");
        let errors: Vec<String> = collect_errors(&site(&yaml)).iter().map(|e| e.to_string()).collect();
        assert_eq!(
            errors,
            vec![
                "vlan 'b' static host 'printer': invalid alias: 'dns' is a role name",
                "duplicate vlan hostname 'b/tv'",
            ]
        );
    }
}
