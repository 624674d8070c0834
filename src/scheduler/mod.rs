//! Build scheduling.
//!
//! Hosts are ordered by two kinds of dependency: a vmhost is built before the
//! VMs it runs, and the router is built before every DNS or DHCP host that
//! serves a routable vlan through it. The result is a list of stages; hosts
//! within one stage can be provisioned concurrently.

pub mod graph;
pub mod stages;

pub use graph::{Dependency, DependencyGraph, DependencyKind};
pub use stages::{schedule, BuildSchedule};

use crate::error::CompileError;
use crate::model::Site;

/// Compute the build stages for a site
pub fn build_schedule(site: &Site) -> Result<(DependencyGraph, BuildSchedule), CompileError> {
    let graph = DependencyGraph::from_site(site);
    let stages = schedule(&graph)?;
    log::info!(
        "Build order: {} hosts in {} stages ({} dependencies)",
        graph.len(),
        stages.len(),
        graph.edges().count()
    );
    Ok((graph, stages))
}
