//! Rule text rendering.
//!
//! Tuples are rendered one per line as
//! `ACTION SOURCE DESTINATION PROTOCOL PORTS [# comment]`, with zones named
//! after vlans, `$FW` for the router and `zone:address` or `zone:+ipset`
//! for narrowed endpoints. A tuple narrowed to addresses renders one line per
//! address family, since IPv4 and IPv6 rulesets are separate.

use super::expander::{Endpoint, RuleTuple, TupleAction, INTERNET_ZONE};
use crate::ip::ResolvedHost;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

impl Family {
    fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// Endpoint text with every address it holds
pub fn render_endpoint(endpoint: &Endpoint) -> String {
    match endpoint {
        Endpoint::Vlan { vlan } => vlan.clone(),
        Endpoint::Internet => INTERNET_ZONE.to_string(),
        Endpoint::Firewall => "$FW".to_string(),
        Endpoint::Host { vlan, addresses, .. } => {
            let addresses: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
            format!("{}:{}", vlan, addresses.join(","))
        }
        Endpoint::Address { zone, address } => format!("{}:{}", zone, address),
        Endpoint::IpSet { zone, ipset } => format!("{}:+{}", zone, ipset),
    }
}

fn is_family_bound(endpoint: &Endpoint) -> bool {
    match endpoint {
        Endpoint::Host { addresses, .. } => !addresses.is_empty(),
        Endpoint::Address { .. } => true,
        _ => false,
    }
}

/// Endpoint text limited to one family; `None` when it has no such address
fn render_endpoint_in(endpoint: &Endpoint, family: Option<Family>) -> Option<String> {
    match (endpoint, family) {
        (Endpoint::Host { vlan, addresses, .. }, Some(family)) => {
            let picked: Vec<String> = addresses
                .iter()
                .filter(|a| Family::of(a) == family)
                .map(|a| a.to_string())
                .collect();
            if picked.is_empty() {
                None
            } else {
                Some(format!("{}:{}", vlan, picked.join(",")))
            }
        }
        (Endpoint::Address { address, .. }, Some(family)) if Family::of(address) != family => None,
        _ => Some(render_endpoint(endpoint)),
    }
}

/// Lines of one tuple: one per address family when an endpoint is narrowed
/// to addresses, otherwise a single line
pub fn render_tuple_lines(tuple: &RuleTuple) -> Vec<String> {
    let action = match tuple.action {
        TupleAction::Accept => "ACCEPT",
        TupleAction::Forward => "DNAT",
    };
    let ports = tuple.ports.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
    let families: &[Option<Family>] = if is_family_bound(&tuple.source) || is_family_bound(&tuple.destination) {
        &[Some(Family::V4), Some(Family::V6)]
    } else {
        &[None]
    };

    families
        .iter()
        .filter_map(|family| {
            let source = render_endpoint_in(&tuple.source, *family)?;
            let destination = render_endpoint_in(&tuple.destination, *family)?;
            let mut line = format!("{}\t{}\t{}\t{}\t{}", action, source, destination, tuple.protocol, ports);
            if !tuple.comment.is_empty() {
                line.push_str("\t# ");
                line.push_str(&tuple.comment);
            }
            Some(line)
        })
        .collect()
}

pub fn render_tuple(tuple: &RuleTuple) -> String {
    render_tuple_lines(tuple).join("\n")
}

/// Render tuples one per line, in the given order
pub fn render_rules<'a>(tuples: impl IntoIterator<Item = &'a RuleTuple>) -> String {
    tuples.into_iter().flat_map(render_tuple_lines).collect::<Vec<_>>().join("\n")
}

/// Tuples a host enforces.
///
/// The router enforces every tuple. Other hosts filter their own inbound
/// traffic: tuples whose destination is the host itself or a whole vlan the
/// host is attached to.
pub fn rules_for_host<'a>(tuples: &'a [RuleTuple], host: &ResolvedHost, is_router: bool) -> Vec<&'a RuleTuple> {
    if is_router {
        return tuples.iter().collect();
    }
    let on_vlan = |vlan: &str| host.interfaces.iter().any(|i| i.vlan.as_deref() == Some(vlan));
    tuples
        .iter()
        .filter(|t| t.action == TupleAction::Accept)
        .filter(|t| match &t.destination {
            Endpoint::Host { hostname, .. } => hostname == &host.hostname,
            Endpoint::Vlan { vlan } => on_vlan(vlan),
            _ => false,
        })
        .collect()
}
