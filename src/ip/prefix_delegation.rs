//! IPv6 prefix delegation subdivision.
//!
//! The router asks upstream for a /P on its uplink. Every vlan that opts into
//! delegation gets one /L out of it, identified by an index that occupies
//! bits `[P, L)` of the delegated prefix.

use super::cidr::{CidrError, Ipv6Cidr};
use crate::error::AddressResolutionError;
use crate::model::{Role, Site};
use serde::Serialize;
use std::collections::BTreeMap;

/// The router uplink that requests a delegated prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegationRequest {
    pub router: String,
    pub interface: String,
    pub prefixlen: u8,
    /// Known upstream assignment, when it is static
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated_prefix: Option<Ipv6Cidr>,
}

impl DelegationRequest {
    /// Find the delegation request of the site's router, if any
    pub fn from_site(site: &Site) -> Option<Self> {
        site.hosts_with_role(Role::Router).find_map(|router| {
            let names = router.interface_names();
            router
                .interfaces
                .iter()
                .zip(names)
                .filter(|(iface, _)| iface.is_uplink())
                .find_map(|(iface, name)| {
                    iface.requested_pd_prefixlen().map(|prefixlen| DelegationRequest {
                        router: router.hostname.clone(),
                        interface: name,
                        prefixlen,
                        delegated_prefix: iface
                            .ipv6_delegated_prefix
                            .as_deref()
                            .and_then(|text| text.parse().ok()),
                    })
                })
        })
    }
}

/// One vlan's share of the delegated prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DelegatedSubnet {
    pub index: u64,
    pub prefixlen: u8,
    /// Concrete subnet, known only when the delegated prefix is static
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<Ipv6Cidr>,
}

/// Assign a delegation index to every consuming vlan.
///
/// Vlans with an explicit `ipv6_pd_network` keep it. The rest take the next
/// free index in site declaration order, starting at the site's
/// `ipv6_pd_first_network` and skipping indices claimed explicitly.
pub fn assign_delegated_subnets(
    site: &Site,
    request: Option<&DelegationRequest>,
) -> Result<BTreeMap<String, DelegatedSubnet>, Vec<AddressResolutionError>> {
    let consumers: Vec<_> = site
        .vlans()
        .map(|(_, vlan)| vlan)
        .filter(|vlan| vlan.uses_prefix_delegation())
        .collect();
    if consumers.is_empty() {
        return Ok(BTreeMap::new());
    }

    let request = match request {
        Some(request) => request,
        None => {
            return Err(consumers
                .iter()
                .map(|vlan| AddressResolutionError::NoPrefixDelegation { vlan: vlan.name.clone() })
                .collect())
        }
    };

    let mut errors = Vec::new();
    let mut taken: BTreeMap<u64, &str> = BTreeMap::new();
    for vlan in &consumers {
        if let Some(index) = vlan.ipv6_pd_network {
            if let Some(other) = taken.insert(index, &vlan.name) {
                errors.push(AddressResolutionError::DuplicateDelegationIndex {
                    vlan: vlan.name.clone(),
                    other: other.to_string(),
                    index,
                });
            }
        }
    }

    let mut assigned = BTreeMap::new();
    let mut next = Some(site.ipv6_pd_first_network);
    for vlan in &consumers {
        let index = match vlan.ipv6_pd_network {
            Some(index) => index,
            None => {
                while let Some(candidate) = next.filter(|n| taken.contains_key(n)) {
                    next = candidate.checked_add(1);
                }
                let Some(index) = next else {
                    // index space exhausted past u64::MAX
                    errors.push(AddressResolutionError::PrefixDelegationOverflow {
                        vlan: vlan.name.clone(),
                        index: u64::MAX,
                        available: 1u128 << vlan.ipv6_prefixlen.saturating_sub(request.prefixlen).min(64),
                        prefix: request.prefixlen,
                        target: vlan.ipv6_prefixlen,
                    });
                    continue;
                };
                next = index.checked_add(1);
                index
            }
        };

        match subdivide(request, index, vlan.ipv6_prefixlen) {
            Ok(subnet) => {
                log::debug!("vlan '{}' takes delegated subnet index {}", vlan.name, index);
                assigned.insert(
                    vlan.name.clone(),
                    DelegatedSubnet { index, prefixlen: vlan.ipv6_prefixlen, subnet },
                );
            }
            Err(CidrError::IndexOverflow { index, available, prefix, target }) => {
                errors.push(AddressResolutionError::PrefixDelegationOverflow {
                    vlan: vlan.name.clone(),
                    index,
                    available,
                    prefix,
                    target,
                });
            }
            Err(_) => errors.push(AddressResolutionError::InvalidDelegationLength {
                vlan: vlan.name.clone(),
                prefix: request.prefixlen,
                target: vlan.ipv6_prefixlen,
            }),
        }
    }

    if errors.is_empty() {
        errors = overlapping_subnets(site, &assigned);
    }
    if errors.is_empty() {
        Ok(assigned)
    } else {
        Err(errors)
    }
}

/// IPv6 range of one vlan for overlap checks
enum Ipv6Span {
    /// Offsets `[start, end)` in /64 units inside the delegated prefix
    Delegated { start: u128, end: u128, subnet: DelegatedSubnet },
    Explicit(Ipv6Cidr),
}

impl Ipv6Span {
    fn label(&self) -> String {
        match self {
            Ipv6Span::Delegated { subnet: DelegatedSubnet { subnet: Some(cidr), .. }, .. } => cidr.to_string(),
            Ipv6Span::Delegated { subnet, .. } => format!("delegated #{}/{}", subnet.index, subnet.prefixlen),
            Ipv6Span::Explicit(cidr) => cidr.to_string(),
        }
    }

    fn overlaps(&self, other: &Ipv6Span) -> bool {
        match (self, other) {
            (Ipv6Span::Delegated { start, end, .. }, Ipv6Span::Delegated { start: s, end: e, .. }) => {
                start < e && s < end
            }
            (Ipv6Span::Delegated { subnet, .. }, Ipv6Span::Explicit(cidr))
            | (Ipv6Span::Explicit(cidr), Ipv6Span::Delegated { subnet, .. }) => {
                subnet.subnet.is_some_and(|concrete| concrete.overlaps(cidr))
            }
            // explicit pairs are covered by site validation
            (Ipv6Span::Explicit(_), Ipv6Span::Explicit(_)) => false,
        }
    }
}

/// Delegated subnets against each other and against explicit subnets.
///
/// Symbolic delegations only conflict among themselves; concrete ones are
/// also compared to every explicit `ipv6_subnet`.
fn overlapping_subnets(site: &Site, assigned: &BTreeMap<String, DelegatedSubnet>) -> Vec<AddressResolutionError> {
    let mut spans: Vec<(&str, Ipv6Span)> = Vec::new();
    for (_, vlan) in site.vlans() {
        if let Some(subnet) = assigned.get(&vlan.name) {
            let width = 1u128 << (64 - u32::from(subnet.prefixlen.min(64)));
            let start = u128::from(subnet.index) * width;
            spans.push((&vlan.name, Ipv6Span::Delegated { start, end: start + width, subnet: *subnet }));
        } else if let Some(cidr) = vlan.explicit_ipv6_subnet().and_then(|text| text.parse().ok()) {
            spans.push((&vlan.name, Ipv6Span::Explicit(cidr)));
        }
    }

    let mut errors = Vec::new();
    for (i, (name, span)) in spans.iter().enumerate() {
        for (other, other_span) in &spans[..i] {
            if span.overlaps(other_span) {
                errors.push(AddressResolutionError::Ipv6SubnetOverlap {
                    vlan: name.to_string(),
                    subnet: span.label(),
                    other: other.to_string(),
                    other_subnet: other_span.label(),
                });
            }
        }
    }
    errors
}

/// Bounds-check `index` and compute the concrete subnet when possible
fn subdivide(request: &DelegationRequest, index: u64, target: u8) -> Result<Option<Ipv6Cidr>, CidrError> {
    let prefix = request.prefixlen;
    if target <= prefix || target > 64 {
        return Err(CidrError::InvalidSubdivision { prefix, target });
    }
    let available = 1u128 << (target - prefix);
    if u128::from(index) >= available {
        return Err(CidrError::IndexOverflow { index, available, prefix, target });
    }
    match &request.delegated_prefix {
        Some(delegated) => delegated.subnet(index, target).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(extra_vlans: &str, uplink: &str) -> Site {
        let yaml = format!(
            r#"
name: pd
vswitches:
  - name: switch0
    vlans:
      - name: lan
        ipv4_subnet: 192.168.1.0/24
        ipv6_pd: true
      - name: iot
        id: 20
        ipv4_subnet: 192.168.20.0/24
        ipv6_pd_network: 0
{extra_vlans}
hosts:
  - hostname: router
    role: router
    interfaces:
      - name: wan
        uplink: eth0
{uplink}
      - vswitch: switch0
        ipv4_address: 192.168.1.1
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn test_positional_indices_skip_explicit_ones() {
        let site = site("", "        ipv6_ask_for_prefix: true");
        let request = DelegationRequest::from_site(&site).unwrap();
        assert_eq!(request.prefixlen, 56);
        assert_eq!(request.interface, "wan");

        let assigned = assign_delegated_subnets(&site, Some(&request)).unwrap();
        assert_eq!(assigned["iot"].index, 0);
        assert_eq!(assigned["lan"].index, 1);
        assert_eq!(assigned["lan"].subnet, None);
    }

    #[test]
    fn test_concrete_subnets_from_static_prefix() {
        let site = site(
            "",
            "        ipv6_pd_prefixlen: 56\n        ipv6_delegated_prefix: 2001:db8:aa00::/56",
        );
        let request = DelegationRequest::from_site(&site).unwrap();
        let assigned = assign_delegated_subnets(&site, Some(&request)).unwrap();
        assert_eq!(assigned["lan"].subnet.unwrap().to_string(), "2001:db8:aa00:1::/64");
    }

    #[test]
    fn test_last_index_fits_and_next_overflows() {
        let ok = site(
            "      - name: last\n        id: 30\n        ipv4_subnet: 192.168.30.0/24\n        ipv6_pd_network: 255",
            "        ipv6_pd_prefixlen: 56",
        );
        let request = DelegationRequest::from_site(&ok).unwrap();
        assert_eq!(assign_delegated_subnets(&ok, Some(&request)).unwrap()["last"].index, 255);

        let overflow = site(
            "      - name: last\n        id: 30\n        ipv4_subnet: 192.168.30.0/24\n        ipv6_pd_network: 256",
            "        ipv6_pd_prefixlen: 56",
        );
        let errors = assign_delegated_subnets(&overflow, Some(&request)).unwrap_err();
        assert_eq!(
            errors,
            vec![AddressResolutionError::PrefixDelegationOverflow {
                vlan: "last".into(),
                index: 256,
                available: 256,
                prefix: 56,
                target: 64,
            }]
        );
    }

    #[test]
    fn test_duplicate_explicit_index() {
        let site = site(
            "      - name: dup\n        id: 30\n        ipv4_subnet: 192.168.30.0/24\n        ipv6_pd_network: 0",
            "        ipv6_pd_prefixlen: 60",
        );
        let request = DelegationRequest::from_site(&site).unwrap();
        let errors = assign_delegated_subnets(&site, Some(&request)).unwrap_err();
        assert!(matches!(
            &errors[0],
            AddressResolutionError::DuplicateDelegationIndex { vlan, other, index: 0 } if vlan == "dup" && other == "iot"
        ));
    }

    #[test]
    fn test_wider_delegation_overlaps_neighbours() {
        let yaml = r#"
name: pd
vswitches:
  - name: switch0
    vlans:
      - name: lan
        ipv4_subnet: 192.168.1.0/24
        ipv6_pd_network: 0
        ipv6_prefixlen: 60
      - name: iot
        id: 20
        ipv4_subnet: 192.168.20.0/24
        ipv6_pd_network: 1
      - name: lab
        id: 30
        ipv4_subnet: 192.168.30.0/24
        ipv6_subnet: 2001:db8:aa00:2::/64
hosts:
  - hostname: router
    role: router
    interfaces:
      - uplink: eth0
        ipv6_pd_prefixlen: 56
        ipv6_delegated_prefix: 2001:db8:aa00::/56
"#;
        let site: Site = serde_yaml::from_str(yaml).unwrap();
        let request = DelegationRequest::from_site(&site).unwrap();
        let errors = assign_delegated_subnets(&site, Some(&request)).unwrap_err();
        assert_eq!(
            errors,
            vec![
                AddressResolutionError::Ipv6SubnetOverlap {
                    vlan: "iot".into(),
                    subnet: "2001:db8:aa00:1::/64".into(),
                    other: "lan".into(),
                    other_subnet: "2001:db8:aa00::/60".into(),
                },
                AddressResolutionError::Ipv6SubnetOverlap {
                    vlan: "lab".into(),
                    subnet: "2001:db8:aa00:2::/64".into(),
                    other: "lan".into(),
                    other_subnet: "2001:db8:aa00::/60".into(),
                },
            ]
        );

        // without a static prefix only delegations are comparable
        let symbolic: Site = serde_yaml::from_str(&yaml.replace("        ipv6_delegated_prefix: 2001:db8:aa00::/56\n", "")).unwrap();
        let request = DelegationRequest::from_site(&symbolic).unwrap();
        let errors = assign_delegated_subnets(&symbolic, Some(&request)).unwrap_err();
        assert_eq!(
            errors,
            vec![AddressResolutionError::Ipv6SubnetOverlap {
                vlan: "iot".into(),
                subnet: "delegated #1/64".into(),
                other: "lan".into(),
                other_subnet: "delegated #0/60".into(),
            }]
        );
    }

    #[test]
    fn test_index_space_exhaustion_is_an_error() {
        let mut site = site("", "        ipv6_pd_prefixlen: 56");
        site.ipv6_pd_first_network = u64::MAX;
        for vlan in site.vswitches.iter_mut().flat_map(|s| s.vlans.iter_mut()) {
            vlan.ipv6_pd_network = None;
            vlan.ipv6_pd = true;
        }
        let request = DelegationRequest::from_site(&site).unwrap();
        let errors = assign_delegated_subnets(&site, Some(&request)).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(
            e,
            AddressResolutionError::PrefixDelegationOverflow { index: u64::MAX, available: 256, .. }
        )));
    }

    #[test]
    fn test_missing_request() {
        let site = site("", "");
        assert!(DelegationRequest::from_site(&site).is_none());
        let errors = assign_delegated_subnets(&site, None).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
