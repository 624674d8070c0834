//! Rules implied by vlan settings and host roles.

use crate::model::{AddressMode, FirewallRule, Locator, Role, Site, VlanRef};

/// Services every vlan may reach on hosts with these roles
const ROLE_SERVICES: [(Role, &str); 3] = [(Role::Dhcp, "dhcp"), (Role::Dns, "dns"), (Role::Ntp, "ntp")];

/// Build the rules implied by the site, in a stable order.
///
/// * `access_vlans` opens everything from a vlan to the listed vlans
/// * `allow_internet` opens everything from a vlan to the internet
/// * a router answers pings from every vlan and may reach the internet
/// * DHCP, DNS and NTP servers accept their service from every vlan
pub fn implicit_rules(site: &Site) -> Vec<FirewallRule> {
    let mut rules = Vec::new();
    if site.routable_vlans().next().is_none() {
        return rules;
    }

    for (_, vlan) in site.routable_vlans() {
        for access in &vlan.access_vlans {
            let target = match access {
                VlanRef::Name(name) if name.eq_ignore_ascii_case("all") => Locator::all(),
                other => Locator { vlan: other.clone(), ..Locator::all() },
            };
            rules.push(FirewallRule::allow_all(
                format!("{} access to {}", vlan.name, access),
                vec![Locator::vlan(&vlan.name)],
                vec![target],
            ));
        }
        if vlan.allow_internet {
            rules.push(FirewallRule::allow_all(
                format!("{} internet access", vlan.name),
                vec![Locator::vlan(&vlan.name)],
                vec![Locator::internet()],
            ));
        }
    }

    if site.hosts_with_role(Role::Router).next().is_some() {
        rules.push(FirewallRule::allow_services(
            "router ping",
            vec![Locator::firewall()],
            vec![Locator::all()],
            &["ping"],
        ));
        rules.push(FirewallRule::allow_services(
            "ping router",
            vec![Locator::all()],
            vec![Locator::firewall()],
            &["ping"],
        ));
        rules.push(FirewallRule::allow_services(
            "router internet",
            vec![Locator::firewall()],
            vec![Locator::internet()],
            &["traceroute", "dns"],
        ));
    }

    for (role, service) in ROLE_SERVICES {
        for host in site.hosts_with_role(role) {
            let destinations: Vec<Locator> = host
                .interfaces
                .iter()
                .filter(|iface| matches!(iface.ipv4_address, AddressMode::Static(_)))
                .filter_map(|iface| site.interface_vlan(iface))
                .filter(|(_, vlan)| vlan.routable)
                .map(|(_, vlan)| Locator::host(&vlan.name, &host.hostname))
                .collect();
            if destinations.is_empty() {
                continue;
            }
            rules.push(FirewallRule::allow_services(
                format!("{} on {}", service, host.hostname),
                vec![Locator::all()],
                destinations,
                &[service],
            ));
        }
    }
    rules
}
