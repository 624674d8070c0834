//! DNS and DHCP record blocks derived from the address plan.

use crate::ip::{reverse_pointer, AddressPlan, AddressRange, EntryKind, ResolvedVlan};
use crate::model::{Role, Site};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RecordType {
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
    #[serde(rename = "CNAME")]
    Cname,
    #[serde(rename = "PTR")]
    Ptr,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Ptr => "PTR",
        })
    }
}

/// One resource record; names are fully qualified without the trailing dot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    pub name: String,
    pub record_type: RecordType,
    pub value: String,
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.name, self.record_type, self.value)
    }
}

/// A forward zone with the reverse zones of its subnets
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsZone {
    pub vlan: String,
    pub domain: String,
    pub reverse_zones: Vec<String>,
}

/// Every record the site's DNS servers publish
#[derive(Debug, Clone, Default, Serialize)]
pub struct DnsRecords {
    pub zones: Vec<DnsZone>,
    pub records: Vec<DnsRecord>,
}

impl DnsRecords {
    pub fn reverse_zones(&self) -> impl Iterator<Item = &str> {
        self.zones.iter().flat_map(|z| z.reverse_zones.iter().map(String::as_str))
    }
}

/// Collect DNS records for all vlans.
///
/// Records follow vlan declaration order, then claim order within a vlan:
/// address records with their PTRs, alias CNAMEs, then role CNAMEs for the
/// first host on the vlan holding each role.
pub fn dns_records(site: &Site, plan: &AddressPlan) -> DnsRecords {
    let mut out = DnsRecords::default();
    for vlan in &plan.vlans {
        let mut reverse_zones = vec![vlan.ipv4_subnet.reverse_zone()];
        reverse_zones.extend(vlan.ipv6.subnet().map(|s| s.reverse_zone()));
        out.zones.push(DnsZone { vlan: vlan.name.clone(), domain: vlan.domain.clone(), reverse_zones });

        let mut names: BTreeSet<String> = BTreeSet::new();
        for entry in &vlan.entries {
            let fqdn = site.fqdn(&entry.hostname, &vlan.domain);
            let addresses = entry.ipv4.map(IpAddr::V4).into_iter().chain(entry.ipv6.map(IpAddr::V6));
            for address in addresses {
                out.records.push(DnsRecord {
                    name: fqdn.clone(),
                    record_type: if address.is_ipv4() { RecordType::A } else { RecordType::Aaaa },
                    value: address.to_string(),
                });
                out.records.push(DnsRecord {
                    name: reverse_pointer(address),
                    record_type: RecordType::Ptr,
                    value: fqdn.clone(),
                });
            }
            names.insert(entry.hostname.to_lowercase());
            for alias in &entry.aliases {
                if names.insert(alias.to_lowercase()) {
                    out.records.push(DnsRecord {
                        name: site.fqdn(alias, &vlan.domain),
                        record_type: RecordType::Cname,
                        value: fqdn.clone(),
                    });
                }
            }
        }
        role_cnames(site, vlan, &mut names, &mut out.records);
    }
    out
}

fn role_cnames(site: &Site, vlan: &ResolvedVlan, names: &mut BTreeSet<String>, records: &mut Vec<DnsRecord>) {
    for role in Role::ALL.iter().filter(|r| **r != Role::Generic) {
        let holder = site.hosts_with_role(*role).find(|host| {
            vlan.entries
                .iter()
                .any(|e| e.hostname == host.hostname && e.kind != EntryKind::Reservation)
        });
        if let Some(host) = holder {
            if names.insert(role.as_str().to_string()) {
                records.push(DnsRecord {
                    name: site.fqdn(role.as_str(), &vlan.domain),
                    record_type: RecordType::Cname,
                    value: site.fqdn(&host.hostname, &vlan.domain),
                });
            }
        }
    }
}

/// DHCP settings for one vlan and IP family
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DhcpSubnet {
    pub vlan: String,
    pub subnet: String,
    pub pool: Vec<AddressRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    pub dns_servers: Vec<IpAddr>,
    pub domain: String,
    pub lease_time_secs: u64,
}

impl fmt::Display for DhcpSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool: Vec<String> = self.pool.iter().map(|r| r.to_string()).collect();
        let dns: Vec<String> = self.dns_servers.iter().map(|a| a.to_string()).collect();
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.vlan,
            self.subnet,
            pool.join(","),
            self.gateway.map(|g| g.to_string()).unwrap_or_else(|| "-".to_string()),
            if dns.is_empty() { "-".to_string() } else { dns.join(",") },
            if self.domain.is_empty() { "-" } else { &self.domain },
            self.lease_time_secs
        )
    }
}

/// A fixed lease for a known MAC address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DhcpReservationLine {
    pub vlan: String,
    pub hostname: String,
    pub mac_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<IpAddr>,
}

impl fmt::Display for DhcpReservationLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |a: Option<IpAddr>| a.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
        write!(f, "{}\t{}\t{}\t{}\t{}", self.vlan, self.hostname, self.mac_address, show(self.ipv4), show(self.ipv6))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DhcpBlocks {
    pub subnets4: Vec<DhcpSubnet>,
    pub subnets6: Vec<DhcpSubnet>,
    pub reservations: Vec<DhcpReservationLine>,
}

/// Addresses of DNS servers reachable from a vlan.
///
/// DNS hosts on the vlan itself come first; routable vlans fall back to DNS
/// hosts on other routable vlans.
pub fn dns_servers_for(site: &Site, plan: &AddressPlan, vlan: &ResolvedVlan) -> Vec<IpAddr> {
    let on_vlan = |v: &ResolvedVlan| -> Vec<IpAddr> {
        site.hosts_with_role(Role::Dns)
            .filter_map(|h| plan.host(&h.hostname))
            .flat_map(|h| h.static_addresses_on(&v.name))
            .collect()
    };
    let local = on_vlan(vlan);
    if !local.is_empty() || !vlan.routable {
        return local;
    }
    plan.vlans.iter().filter(|v| v.routable).flat_map(on_vlan).collect()
}

/// DHCP subnets and reservations for every vlan that serves DHCP
pub fn dhcp_blocks(site: &Site, plan: &AddressPlan) -> DhcpBlocks {
    let mut blocks = DhcpBlocks::default();
    for (_, vlan) in site.vlans() {
        let Some(resolved) = plan.vlan(&vlan.name) else {
            continue;
        };
        let dns_servers = dns_servers_for(site, plan, resolved);
        let (dns4, dns6): (Vec<IpAddr>, Vec<IpAddr>) = dns_servers.into_iter().partition(IpAddr::is_ipv4);
        let lease_time_secs = vlan.dhcp_lease_time.as_secs();

        if !resolved.dhcp4_pool.is_empty() {
            blocks.subnets4.push(DhcpSubnet {
                vlan: resolved.name.clone(),
                subnet: resolved.ipv4_subnet.to_string(),
                pool: resolved.dhcp4_pool.ranges.clone(),
                gateway: resolved.ipv4_gateway.map(IpAddr::V4),
                dns_servers: dns4,
                domain: resolved.domain.clone(),
                lease_time_secs,
            });
        }
        if let (false, Some(subnet)) = (resolved.dhcp6_pool.is_empty(), resolved.ipv6.subnet()) {
            blocks.subnets6.push(DhcpSubnet {
                vlan: resolved.name.clone(),
                subnet: subnet.to_string(),
                pool: resolved.dhcp6_pool.ranges.clone(),
                gateway: None,
                dns_servers: dns6,
                domain: resolved.domain.clone(),
                lease_time_secs,
            });
        }

        for entry in resolved.entries.iter().filter(|e| e.kind == EntryKind::Reservation) {
            let Some(mac_address) = entry.mac_address.clone() else {
                continue;
            };
            blocks.reservations.push(DhcpReservationLine {
                vlan: resolved.name.clone(),
                hostname: entry.hostname.clone(),
                mac_address,
                ipv4: entry.ipv4.map(IpAddr::V4),
                ipv6: entry.ipv6.map(IpAddr::V6),
            });
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::resolve_addresses;
    use pretty_assertions::assert_eq;

    const SITE: &str = r#"
name: home
domain: example.net
vswitches:
  - name: switch0
    vlans:
      - name: lan
        id: 10
        domain: lan.example.net
        ipv4_subnet: 192.168.10.0/24
        ipv6_subnet: fd00:10::/64
        dhcp6_managed: true
        static_hosts:
          - hostname: printer
            ipv4_address: 192.168.10.5
            aliases: [lp]
        dhcp_reservations:
          - hostname: tv
            mac_address: AA-BB-CC-DD-EE-01
            ipv4_address: 192.168.10.6
      - name: iot
        id: 20
        ipv4_subnet: 192.168.20.0/24
        dhcp_lease_time: 30m
hosts:
  - hostname: router
    role: router
    interfaces:
      - uplink: eth0
  - hostname: infra
    roles: [dns, dhcp]
    interfaces:
      - vswitch: switch0
        vlan: lan
        ipv4_address: 192.168.10.2
"#;

    fn setup() -> (Site, AddressPlan) {
        let site: Site = serde_yaml::from_str(SITE).unwrap();
        let plan = resolve_addresses(&site).unwrap();
        (site, plan)
    }

    #[test]
    fn test_dns_records() {
        let (site, plan) = setup();
        let dns = dns_records(&site, &plan);
        let lan: Vec<String> = dns
            .records
            .iter()
            .filter(|r| r.name.ends_with("lan.example.net") && r.record_type != RecordType::Ptr)
            .map(|r| r.to_string())
            .collect();
        assert_eq!(
            lan,
            vec![
                "router.lan.example.net\tA\t192.168.10.1",
                "router.lan.example.net\tAAAA\tfd00:10::1",
                "printer.lan.example.net\tA\t192.168.10.5",
                "lp.lan.example.net\tCNAME\tprinter.lan.example.net",
                "tv.lan.example.net\tA\t192.168.10.6",
                "infra.lan.example.net\tA\t192.168.10.2",
                "dns.lan.example.net\tCNAME\tinfra.lan.example.net",
                "dhcp.lan.example.net\tCNAME\tinfra.lan.example.net",
            ]
        );
        assert!(dns.records.contains(&DnsRecord {
            name: "5.10.168.192.in-addr.arpa".into(),
            record_type: RecordType::Ptr,
            value: "printer.lan.example.net".into(),
        }));
        assert_eq!(
            dns.reverse_zones().collect::<Vec<_>>(),
            vec!["10.168.192.in-addr.arpa", "0.0.0.0.0.0.0.0.0.1.0.0.0.0.d.f.ip6.arpa", "20.168.192.in-addr.arpa"]
        );
    }

    #[test]
    fn test_dhcp_blocks() {
        let (site, plan) = setup();
        let blocks = dhcp_blocks(&site, &plan);
        assert_eq!(blocks.subnets4.len(), 2);
        assert_eq!(
            blocks.subnets4[0].to_string(),
            "lan\t192.168.10.0/24\t192.168.10.16-192.168.10.252\t192.168.10.1\t192.168.10.2\tlan.example.net\t3600"
        );
        // iot has no DNS host of its own and falls back to the routable ones
        assert_eq!(blocks.subnets4[1].dns_servers, vec!["192.168.10.2".parse::<IpAddr>().unwrap()]);
        assert_eq!(blocks.subnets4[1].lease_time_secs, 1800);
        assert_eq!(blocks.subnets6.len(), 1);
        assert_eq!(blocks.subnets6[0].pool[0].to_string(), "fd00:10::10-fd00:10::ffff");
        assert_eq!(blocks.reservations.len(), 1);
        assert_eq!(blocks.reservations[0].to_string(), "lan\ttv\taa:bb:cc:dd:ee:01\t192.168.10.6\t-");
    }
}
