//! Host dependency graph.

use crate::model::{Role, Site};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Why one host must be built before another
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// The vmhost runs the VM
    Hosting,
    /// The router carries the service host's traffic
    Routing,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Hosting => f.write_str("hosting"),
            DependencyKind::Routing => f.write_str("routing"),
        }
    }
}

/// An edge `before -> after`, as indices into [`DependencyGraph::hosts`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dependency {
    pub before: usize,
    pub after: usize,
    pub kind: DependencyKind,
}

/// Directed graph over the site's hosts in declaration order
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub hosts: Vec<String>,
    edges: BTreeSet<Dependency>,
}

impl DependencyGraph {
    /// Build the graph from hosting references and router/service relationships
    pub fn from_site(site: &Site) -> Self {
        let hosts: Vec<String> = site.hosts.iter().map(|h| h.hostname.clone()).collect();
        let index_of = |name: &str| hosts.iter().position(|h| h == name);
        let mut edges = BTreeSet::new();

        for (after, host) in site.hosts.iter().enumerate() {
            if !host.is_vm {
                continue;
            }
            if let Some(before) = host.vmhost.as_deref().and_then(index_of) {
                if before != after {
                    edges.insert(Dependency { before, after, kind: DependencyKind::Hosting });
                }
            }
        }

        for router in site.hosts_with_role(Role::Router) {
            let Some(before) = index_of(&router.hostname) else {
                continue;
            };
            for (after, host) in site.hosts.iter().enumerate() {
                if after == before || !(host.has_role(Role::Dns) || host.has_role(Role::Dhcp)) {
                    continue;
                }
                let on_routable_vlan = host
                    .interfaces
                    .iter()
                    .filter(|iface| !iface.is_uplink())
                    .filter_map(|iface| site.interface_vlan(iface))
                    .any(|(_, vlan)| vlan.routable);
                if on_routable_vlan {
                    edges.insert(Dependency { before, after, kind: DependencyKind::Routing });
                }
            }
        }

        Self { hosts, edges }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Dependency> {
        self.edges.iter()
    }

    /// Hosts that must be built before `hostname`, in declaration order
    pub fn dependencies_of(&self, hostname: &str) -> Vec<(&str, DependencyKind)> {
        let Some(index) = self.hosts.iter().position(|h| h == hostname) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .filter(|e| e.after == index)
            .map(|e| (self.hosts[e.before].as_str(), e.kind))
            .collect()
    }

    pub(crate) fn successors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges.iter().filter(move |e| e.before == index).map(|e| e.after)
    }

    pub(crate) fn in_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.hosts.len()];
        for edge in &self.edges {
            degrees[edge.after] += 1;
        }
        degrees
    }
}
