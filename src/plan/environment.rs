//! Per-host substitution environments.

use super::records::{dhcp_blocks, dns_records, dns_servers_for, DhcpBlocks, DnsRecords};
use crate::firewall::{render_rules, rules_for_host, RuleTuple};
use crate::ip::{AddressPlan, InterfaceAddress, Ipv6Resolution, ResolvedHost, ResolvedInterface};
use crate::model::{Host, Role, Site};
use crate::scheduler::{BuildSchedule, DependencyGraph};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Flat, ordered name to value map handed to the template renderer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Everything a host environment is assembled from
pub struct PlanContext<'a> {
    pub site: &'a Site,
    pub addresses: &'a AddressPlan,
    pub rules: &'a [RuleTuple],
    pub graph: &'a DependencyGraph,
    pub schedule: &'a BuildSchedule,
    pub dns: DnsRecords,
    pub dhcp: DhcpBlocks,
}

impl<'a> PlanContext<'a> {
    pub fn new(
        site: &'a Site,
        addresses: &'a AddressPlan,
        rules: &'a [RuleTuple],
        graph: &'a DependencyGraph,
        schedule: &'a BuildSchedule,
    ) -> Self {
        Self {
            site,
            addresses,
            rules,
            graph,
            schedule,
            dns: dns_records(site, addresses),
            dhcp: dhcp_blocks(site, addresses),
        }
    }
}

fn join<T: Display>(items: impl IntoIterator<Item = T>, sep: &str) -> String {
    items.into_iter().map(|i| i.to_string()).collect::<Vec<_>>().join(sep)
}

fn lines<T: Display>(items: impl IntoIterator<Item = T>) -> String {
    join(items, "\n")
}

fn opt<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Build the environment of one host
pub fn host_environment(ctx: &PlanContext<'_>, host: &Host) -> Environment {
    let site = ctx.site;
    let empty = ResolvedHost { hostname: host.hostname.clone(), interfaces: Vec::new() };
    let resolved = ctx.addresses.host(&host.hostname).unwrap_or(&empty);
    let primary_vlan = resolved
        .interfaces
        .iter()
        .filter_map(|i| i.vlan.as_deref())
        .find_map(|name| ctx.addresses.vlan(name));
    let domain = primary_vlan.map(|v| v.domain.clone()).unwrap_or_else(|| site.domain.clone());

    let mut env = Environment::default();
    env.insert("SITE_NAME", site.name.as_str());
    env.insert("HOSTNAME", host.hostname.as_str());
    env.insert("DOMAIN", domain.as_str());
    env.insert("FQDN", site.fqdn(&host.hostname, &domain));
    env.insert("TIMEZONE", site.timezone.as_str());
    env.insert("NTP_SERVERS", join(&site.ntp_servers, " "));
    env.insert("EXTERNAL_DNS", join(&site.external_dns, " "));
    env.insert("BUILD_STAGE", opt(ctx.schedule.stage_of(&host.hostname)));
    env.insert("DEPENDS_ON", join(ctx.graph.dependencies_of(&host.hostname).into_iter().map(|(h, _)| h), " "));
    env.insert("ROLES", join(host.effective_roles(), " "));
    env.insert("IS_VM", host.is_vm.to_string());
    env.insert("VMHOST", host.vmhost.clone().unwrap_or_default());
    env.insert("VCPUS", host.vcpus.to_string());
    env.insert("MEMORY_MB", host.memory_mb.to_string());
    env.insert("DISK_SIZE_MB", host.disk_size_mb.to_string());

    env.insert("INTERFACE_COUNT", resolved.interfaces.len().to_string());
    for (n, iface) in resolved.interfaces.iter().enumerate() {
        interface_variables(ctx, &mut env, n, iface);
    }

    let nameservers: Vec<String> = if host.has_role(Role::Dns) {
        vec!["127.0.0.1".to_string()]
    } else {
        primary_vlan
            .map(|v| dns_servers_for(site, ctx.addresses, v))
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.to_string())
            .collect()
    };
    let nameservers = if nameservers.is_empty() { site.external_dns.clone() } else { nameservers };
    env.insert("NAMESERVERS", join(nameservers, " "));

    let is_router = host.has_role(Role::Router);
    let rules = if is_router || host.local_firewall {
        render_rules(rules_for_host(ctx.rules, resolved, is_router))
    } else {
        String::new()
    };
    env.insert("FIREWALL_RULES", rules);

    for role in host.effective_roles() {
        match role {
            Role::Router => router_variables(ctx, &mut env, host, resolved),
            Role::Dhcp => {
                env.insert("DHCP4_SUBNETS", lines(&ctx.dhcp.subnets4));
                env.insert("DHCP6_SUBNETS", lines(&ctx.dhcp.subnets6));
                env.insert("DHCP_RESERVATIONS", lines(&ctx.dhcp.reservations));
            }
            Role::Dns => {
                env.insert("DNS_RECORDS", lines(&ctx.dns.records));
                env.insert("DNS_ZONES", lines(ctx.dns.zones.iter().map(|z| format!("{}\t{}", z.vlan, z.domain))));
                env.insert("DNS_REVERSE_ZONES", join(ctx.dns.reverse_zones(), " "));
                env.insert("DNS_FORWARDERS", join(&site.external_dns, " "));
            }
            Role::Vmhost => vmhost_variables(ctx, &mut env, host),
            Role::Generic | Role::Ntp | Role::Storage | Role::Build => {}
        }
    }
    env
}

fn interface_variables(ctx: &PlanContext<'_>, env: &mut Environment, n: usize, iface: &ResolvedInterface) {
    let prefix = format!("IFACE_{}", n);
    let vlan = iface.vlan.as_deref().and_then(|name| ctx.addresses.vlan(name));
    let address = |addr: &InterfaceAddress| match addr {
        InterfaceAddress::Disabled => String::new(),
        other => other.to_string(),
    };
    env.insert(format!("{}_NAME", prefix), iface.name.as_str());
    env.insert(format!("{}_VSWITCH", prefix), iface.vswitch.clone().unwrap_or_default());
    env.insert(format!("{}_VLAN", prefix), iface.vlan.clone().unwrap_or_default());
    env.insert(format!("{}_VLAN_ID", prefix), opt(vlan.and_then(|v| v.id)));
    env.insert(format!("{}_UPLINK", prefix), iface.uplink.clone().unwrap_or_default());
    env.insert(format!("{}_IPV4", prefix), address(&iface.ipv4));
    env.insert(format!("{}_IPV4_PREFIXLEN", prefix), opt(iface.ipv4_prefixlen));
    env.insert(format!("{}_IPV4_GATEWAY", prefix), opt(iface.ipv4_gateway));
    env.insert(format!("{}_IPV6", prefix), address(&iface.ipv6));
    env.insert(format!("{}_IPV6_PREFIXLEN", prefix), opt(iface.ipv6_prefixlen));
    env.insert(format!("{}_MAC", prefix), iface.mac_address.clone().unwrap_or_default());
    env.insert(format!("{}_ZONE", prefix), iface.firewall_zone.clone().unwrap_or_default());
}

fn router_variables(ctx: &PlanContext<'_>, env: &mut Environment, host: &Host, resolved: &ResolvedHost) {
    env.insert(
        "FIREWALL_ZONES",
        lines(
            resolved
                .interfaces
                .iter()
                .filter_map(|i| i.firewall_zone.as_ref().map(|zone| format!("{}\t{}", zone, i.name))),
        ),
    );
    env.insert("ROUTER_VLANS", join(ctx.addresses.vlans.iter().filter(|v| v.routable).map(|v| &v.name), " "));
    if let Some(uplink) = resolved.interfaces.iter().find(|i| i.uplink.is_some()) {
        env.insert("UPLINK_IFACE", uplink.name.as_str());
    }
    env.insert(
        "IPSETS",
        lines(ctx.site.firewall.ipsets.iter().map(|s| format!("{}\t{}", s.name, s.addresses.join(",")))),
    );

    let Some(request) = ctx.addresses.delegation.as_ref().filter(|r| r.router == host.hostname) else {
        return;
    };
    env.insert("IPV6_PD_PREFIXLEN", request.prefixlen.to_string());
    env.insert("IPV6_PD_IFACE", request.interface.as_str());
    let delegated = ctx.addresses.vlans.iter().filter_map(|v| match v.ipv6 {
        Ipv6Resolution::Delegated(d) => Some(format!(
            "{}\t{}\t{}\t{}",
            v.name,
            d.index,
            d.prefixlen,
            d.subnet.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
        )),
        _ => None,
    });
    env.insert("IPV6_DELEGATED_PREFIXES", lines(delegated));
}

fn vmhost_variables(ctx: &PlanContext<'_>, env: &mut Environment, host: &Host) {
    let guests = ctx
        .site
        .hosts
        .iter()
        .filter(|h| h.is_vm && h.vmhost.as_deref() == Some(host.hostname.as_str()))
        .map(|h| {
            format!(
                "{}\t{}\t{}\t{}\t{}",
                h.hostname,
                h.vcpus,
                h.memory_mb,
                h.disk_size_mb,
                opt(ctx.schedule.stage_of(&h.hostname))
            )
        });
    env.insert("VM_GUESTS", lines(guests));

    let vswitches = ctx.site.vswitches.iter().map(|vswitch| {
        let vlans = join(
            vswitch
                .vlans
                .iter()
                .map(|v| v.id.map(|id| id.to_string()).unwrap_or_else(|| "untagged".to_string())),
            ",",
        );
        format!("{}\t{}\t{}", vswitch.name, vswitch.uplink.as_deref().unwrap_or("-"), vlans)
    });
    env.insert("VSWITCHES", lines(vswitches));
}
