//! Firewall rule expansion.
//!
//! Each rule is multiplied out into concrete tuples: every source endpoint
//! paired with every destination endpoint, once per resolved service port.
//! The combined list is deduplicated and sorted so regenerated output is
//! diff-stable.

use super::implicit::implicit_rules;
use super::services::{resolve_service, PortRange, Protocol, ServicePort};
use crate::error::{CompileError, FirewallExpansionError};
use crate::ip::{AddressPlan, ResolvedVlan};
use crate::model::{FirewallRule, Locator, LocatorScope, RuleAction, ServiceSpec, Site};
use serde::Serialize;
use std::net::IpAddr;

/// Zone name of everything outside the site
pub const INTERNET_ZONE: &str = "internet";
/// Zone name of the router itself
pub const FIREWALL_ZONE: &str = "firewall";

/// A resolved firewall locator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    Vlan { vlan: String },
    Internet,
    Firewall,
    Host {
        vlan: String,
        hostname: String,
        addresses: Vec<IpAddr>,
    },
    Address { zone: String, address: IpAddr },
    IpSet { zone: String, ipset: String },
}

impl Endpoint {
    /// The vlan name, `internet` or `firewall`
    pub fn zone(&self) -> &str {
        match self {
            Endpoint::Vlan { vlan } | Endpoint::Host { vlan, .. } => vlan,
            Endpoint::Internet => INTERNET_ZONE,
            Endpoint::Firewall => FIREWALL_ZONE,
            Endpoint::Address { zone, .. } | Endpoint::IpSet { zone, .. } => zone,
        }
    }

    /// Stable name used for sorting and diagnostics
    pub fn name(&self) -> String {
        match self {
            Endpoint::Vlan { vlan } => vlan.clone(),
            Endpoint::Internet => INTERNET_ZONE.to_string(),
            Endpoint::Firewall => FIREWALL_ZONE.to_string(),
            Endpoint::Host { vlan, hostname, .. } => format!("{}:{}", vlan, hostname),
            Endpoint::Address { zone, address } => format!("{}:{}", zone, address),
            Endpoint::IpSet { zone, ipset } => format!("{}:+{}", zone, ipset),
        }
    }

    /// True for endpoints narrower than a whole zone
    pub fn is_narrowed(&self) -> bool {
        matches!(self, Endpoint::Host { .. } | Endpoint::Address { .. } | Endpoint::IpSet { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TupleAction {
    Accept,
    /// Destination NAT to the narrowed destination
    Forward,
}

/// One concrete firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleTuple {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortRange>,
    pub action: TupleAction,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

impl RuleTuple {
    /// (source name, destination name, protocol, ports, action)
    pub fn sort_key(&self) -> (String, String, Protocol, Option<PortRange>, TupleAction) {
        (self.source.name(), self.destination.name(), self.protocol, self.ports, self.action)
    }
}

/// A resolved endpoint and whether it came from the `all` pseudo-locator
#[derive(Debug, Clone)]
struct SideEndpoint {
    endpoint: Endpoint,
    from_all: bool,
}

/// Read-only view of everything locators resolve against
pub struct ExpansionContext<'a> {
    pub site: &'a Site,
    pub plan: &'a AddressPlan,
}

impl<'a> ExpansionContext<'a> {
    pub fn new(site: &'a Site, plan: &'a AddressPlan) -> Self {
        Self { site, plan }
    }

    /// Canonical hostname and static addresses of a name on a vlan.
    ///
    /// Aliases resolve to the hostname they belong to. `None` means the
    /// name is unknown on the vlan.
    fn host_addresses(&self, vlan: &ResolvedVlan, name: &str) -> Option<(String, Vec<IpAddr>)> {
        let matches = |candidate: &str| candidate.eq_ignore_ascii_case(name);
        let canonical = vlan
            .entries
            .iter()
            .find(|e| matches(&e.hostname) || e.aliases.iter().any(|a| matches(a)))
            .map(|e| e.hostname.clone())
            .or_else(|| {
                self.plan
                    .hosts
                    .iter()
                    .filter(|h| h.interfaces.iter().any(|i| i.vlan.as_deref() == Some(vlan.name.as_str())))
                    .filter_map(|h| self.site.find_host(&h.hostname))
                    .find(|h| matches(&h.hostname) || h.aliases.iter().any(|a| matches(a)))
                    .map(|h| h.hostname.clone())
            })?;

        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for entry in vlan.entries.iter().filter(|e| e.hostname == canonical) {
            v4.extend(entry.ipv4.map(IpAddr::V4));
            v6.extend(entry.ipv6.map(IpAddr::V6));
        }
        let mut addresses: Vec<IpAddr> = v4.into_iter().chain(v6).collect();
        addresses.dedup();
        Some((canonical, addresses))
    }

    fn resolve_locator(&self, locator: &Locator, rule: &str) -> Result<Vec<SideEndpoint>, FirewallExpansionError> {
        let plain = |endpoint| vec![SideEndpoint { endpoint, from_all: false }];
        match locator.scope() {
            LocatorScope::All => Ok(self
                .plan
                .vlans
                .iter()
                .filter(|v| v.routable)
                .map(|v| SideEndpoint {
                    endpoint: Endpoint::Vlan { vlan: v.name.clone() },
                    from_all: true,
                })
                .collect()),
            LocatorScope::Firewall => Ok(plain(Endpoint::Firewall)),
            LocatorScope::Internet => Ok(plain(
                self.narrowed(locator, INTERNET_ZONE, rule)?.unwrap_or(Endpoint::Internet),
            )),
            LocatorScope::Vlan(vlan_ref) => {
                let vlan = self
                    .site
                    .lookup_vlan(locator.vswitch.as_deref(), vlan_ref)
                    .and_then(|(_, vlan)| self.plan.vlan(&vlan.name))
                    .ok_or_else(|| FirewallExpansionError::UnknownReference {
                        rule: rule.to_string(),
                        kind: "vlan",
                        name: vlan_ref.to_string(),
                    })?;

                if let Some(hostname) = &locator.hostname {
                    let (canonical, addresses) =
                        self.host_addresses(vlan, hostname)
                            .ok_or_else(|| FirewallExpansionError::UnknownReference {
                                rule: rule.to_string(),
                                kind: "host",
                                name: format!("{}/{}", vlan.name, hostname),
                            })?;
                    if addresses.is_empty() {
                        return Ok(Vec::new());
                    }
                    return Ok(plain(Endpoint::Host { vlan: vlan.name.clone(), hostname: canonical, addresses }));
                }
                Ok(plain(
                    self.narrowed(locator, &vlan.name, rule)?
                        .unwrap_or_else(|| Endpoint::Vlan { vlan: vlan.name.clone() }),
                ))
            }
        }
    }

    /// Ipset or explicit address narrowing within a zone
    fn narrowed(&self, locator: &Locator, zone: &str, rule: &str) -> Result<Option<Endpoint>, FirewallExpansionError> {
        if let Some(ipset) = &locator.ipset {
            if !self.site.firewall.ipsets.iter().any(|s| &s.name == ipset) {
                return Err(FirewallExpansionError::UnknownReference {
                    rule: rule.to_string(),
                    kind: "ipset",
                    name: ipset.clone(),
                });
            }
            return Ok(Some(Endpoint::IpSet { zone: zone.to_string(), ipset: ipset.clone() }));
        }
        let text = match (&locator.ipv4_address, &locator.ipv6_address) {
            (Some(text), _) | (None, Some(text)) => text,
            (None, None) => return Ok(None),
        };
        let address = text.parse::<IpAddr>().map_err(|_| FirewallExpansionError::UnknownReference {
            rule: rule.to_string(),
            kind: "address",
            name: text.clone(),
        })?;
        Ok(Some(Endpoint::Address { zone: zone.to_string(), address }))
    }

    fn resolve_side(
        &self,
        locators: &[Locator],
        rule: &str,
        side: &'static str,
        errors: &mut Vec<FirewallExpansionError>,
    ) -> Vec<SideEndpoint> {
        let mut endpoints = Vec::new();
        for locator in locators {
            match self.resolve_locator(locator, rule) {
                Ok(resolved) if resolved.is_empty() => errors.push(FirewallExpansionError::EmptyEndpointSet {
                    rule: rule.to_string(),
                    side,
                    locator: describe_locator(locator),
                }),
                Ok(resolved) => endpoints.extend(resolved),
                Err(e) => errors.push(e),
            }
        }
        endpoints
    }

    /// Expand one rule into tuples, before deduplication
    pub fn expand_rule(&self, rule: &FirewallRule, label: &str) -> Result<Vec<RuleTuple>, Vec<FirewallExpansionError>> {
        let mut errors = Vec::new();
        let sources = self.resolve_side(&rule.sources, label, "source", &mut errors);
        let destinations = self.resolve_side(&rule.destinations, label, "destination", &mut errors);

        let mut resolve = |specs: &[ServiceSpec]| -> Vec<ServicePort> {
            let mut ports = Vec::new();
            for spec in specs {
                match resolve_service(spec, label) {
                    Ok(resolved) => ports.extend(resolved),
                    Err(e) => errors.push(e),
                }
            }
            ports
        };
        let (action, services) = match rule.action() {
            RuleAction::AllowAll => (
                TupleAction::Accept,
                vec![ServicePort { protocol: Protocol::Any, ports: None, comment: String::new() }],
            ),
            RuleAction::Allow(specs) => (TupleAction::Accept, resolve(specs)),
            RuleAction::Forward(specs) => (TupleAction::Forward, resolve(specs)),
            RuleAction::None => {
                errors.push(FirewallExpansionError::NoAction { rule: label.to_string() });
                (TupleAction::Accept, Vec::new())
            }
        };
        if action == TupleAction::Forward {
            for destination in destinations.iter().filter(|d| !d.endpoint.is_narrowed()) {
                errors.push(FirewallExpansionError::ForwardWithoutTarget {
                    rule: label.to_string(),
                    locator: destination.endpoint.name(),
                });
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let mut tuples = Vec::with_capacity(sources.len() * destinations.len() * services.len());
        for source in &sources {
            for destination in &destinations {
                // `all` never pairs a vlan with itself
                if (source.from_all || destination.from_all) && source.endpoint.zone() == destination.endpoint.zone() {
                    continue;
                }
                for service in &services {
                    tuples.push(RuleTuple {
                        source: source.endpoint.clone(),
                        destination: destination.endpoint.clone(),
                        protocol: service.protocol,
                        ports: service.ports,
                        action,
                        comment: if rule.comment.is_empty() { service.comment.clone() } else { rule.comment.clone() },
                    });
                }
            }
        }
        Ok(tuples)
    }
}

/// Human-readable form of a locator for diagnostics
fn describe_locator(locator: &Locator) -> String {
    let base = locator.vlan.to_string();
    if let Some(hostname) = &locator.hostname {
        format!("{}/{}", base, hostname)
    } else if let Some(ipset) = &locator.ipset {
        format!("{}:+{}", base, ipset)
    } else if let Some(addr) = locator.ipv4_address.as_ref().or(locator.ipv6_address.as_ref()) {
        format!("{}:{}", base, addr)
    } else {
        base
    }
}

/// Label used for a rule in diagnostics
fn rule_label(rule: &FirewallRule, index: usize) -> String {
    if rule.comment.is_empty() {
        format!("#{}", index + 1)
    } else {
        rule.comment.clone()
    }
}

/// Sort by the stable key and collapse tuples with equal keys
pub fn dedup_tuples(mut tuples: Vec<RuleTuple>) -> Vec<RuleTuple> {
    tuples.sort_by_cached_key(RuleTuple::sort_key);
    tuples.dedup_by(|later, earlier| later.sort_key() == earlier.sort_key());
    tuples
}

/// Expand declared and implicit rules for the whole site
pub fn expand_rules(site: &Site, plan: &AddressPlan) -> Result<Vec<RuleTuple>, CompileError> {
    let ctx = ExpansionContext::new(site, plan);
    let implicit = implicit_rules(site);
    let labelled = site
        .firewall
        .rules
        .iter()
        .enumerate()
        .map(|(index, rule)| (rule, rule_label(rule, index)))
        .chain(implicit.iter().map(|rule| (rule, rule.comment.clone())));

    let mut tuples = Vec::new();
    let mut errors = Vec::new();
    for (rule, label) in labelled {
        match ctx.expand_rule(rule, &label) {
            Ok(expanded) => tuples.extend(expanded),
            Err(rule_errors) => errors.extend(rule_errors),
        }
    }
    if !errors.is_empty() {
        return Err(CompileError::FirewallExpansion(errors));
    }

    let expanded = tuples.len();
    let tuples = dedup_tuples(tuples);
    log::info!(
        "Expanded {} declared and {} implicit firewall rules into {} tuples ({} duplicates removed)",
        site.firewall.rules.len(),
        implicit.len(),
        tuples.len(),
        expanded - tuples.len()
    );
    Ok(tuples)
}
