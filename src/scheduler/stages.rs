//! Build stage computation.

use super::graph::DependencyGraph;
use crate::error::CompileError;
use serde::Serialize;

/// Hosts grouped into stages; hosts within a stage have no dependency among them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BuildSchedule {
    pub stages: Vec<Vec<String>>,
}

impl BuildSchedule {
    /// Zero-based stage index of a host
    pub fn stage_of(&self, hostname: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage.iter().any(|h| h == hostname))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Layered topological sort (Kahn's algorithm).
///
/// Each stage holds every host whose dependencies are all in earlier stages,
/// in declaration order.
pub fn schedule(graph: &DependencyGraph) -> Result<BuildSchedule, CompileError> {
    let mut in_degree = graph.in_degrees();
    let mut done = vec![false; graph.len()];
    let mut remaining = graph.len();
    let mut stages = Vec::new();

    while remaining > 0 {
        let ready: Vec<usize> = (0..graph.len()).filter(|&i| !done[i] && in_degree[i] == 0).collect();
        if ready.is_empty() {
            return Err(CompileError::CyclicBuildDependency { hosts: cycle_members(graph, &done) });
        }
        for &index in &ready {
            done[index] = true;
            remaining -= 1;
            for next in graph.successors(index) {
                in_degree[next] -= 1;
            }
        }
        stages.push(ready.into_iter().map(|i| graph.hosts[i].clone()).collect());
    }

    log::debug!("Scheduled {} hosts into {} build stages", graph.len(), stages.len());
    Ok(BuildSchedule { stages })
}

/// Unscheduled hosts that lie on or between cycles.
///
/// Hosts that merely wait on a cycle are pruned by repeatedly dropping
/// nodes with no unscheduled successor.
fn cycle_members(graph: &DependencyGraph, done: &[bool]) -> Vec<String> {
    let mut alive: Vec<bool> = done.iter().map(|d| !d).collect();
    loop {
        let sinks: Vec<usize> = (0..graph.len())
            .filter(|&i| alive[i] && !graph.successors(i).any(|n| alive[n]))
            .collect();
        if sinks.is_empty() {
            break;
        }
        for i in sinks {
            alive[i] = false;
        }
    }
    (0..graph.len()).filter(|&i| alive[i]).map(|i| graph.hosts[i].clone()).collect()
}
