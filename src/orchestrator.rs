//! Compilation orchestrator.
//!
//! This module runs the compiler stages in order, from validation through
//! plan emission, and writes the resulting plan to an output directory.

use crate::error::CompileError;
use crate::firewall::expand_rules;
use crate::ip::resolve_addresses;
use crate::model::Site;
use crate::plan::{emit_plan, BuildPlan, PlanContext, TemplateSet};
use crate::scheduler::build_schedule;
use crate::validator::validate_site;
use crate::utils::is_valid_hostname;
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use log::{debug, warn};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Name of the plan summary written to the output directory
pub const PLAN_FILE: &str = "build_plan.json";
/// Name of the per-host environment file
pub const ENVIRONMENT_FILE: &str = "environment.json";

/// Compile a site into a build plan.
///
/// Stages run strictly in order and the first failing stage ends the run
/// with every diagnostic that stage collected.
pub fn compile(site: &Site, templates: &TemplateSet) -> Result<BuildPlan, CompileError> {
    validate_site(site)?;
    let addresses = resolve_addresses(site)?;
    let rules = expand_rules(site, &addresses)?;
    let (graph, schedule) = build_schedule(site)?;
    let ctx = PlanContext::new(site, &addresses, &rules, &graph, &schedule);
    emit_plan(&ctx, templates)
}

/// Host list of a plan written by an earlier run
#[derive(Debug, Deserialize)]
struct PreviousPlan {
    #[serde(default)]
    hosts: Vec<PreviousHost>,
}

#[derive(Debug, Deserialize)]
struct PreviousHost {
    hostname: String,
}

/// Prepare `output_dir` for a new plan.
///
/// A missing or empty directory is used as is. A directory holding an earlier
/// `build_plan.json` loses that plan and the host directories it lists; any
/// other content stays. A non-empty directory without a plan is refused.
fn clear_previous_plan(output_dir: &Path) -> Result<()> {
    if !output_dir.exists() {
        return Ok(());
    }
    if !output_dir.is_dir() {
        bail!("Output path '{}' is not a directory", output_dir.display());
    }

    let plan_path = output_dir.join(PLAN_FILE);
    if !plan_path.is_file() {
        let mut entries = fs::read_dir(output_dir)
            .wrap_err_with(|| format!("Failed to read output directory '{}'", output_dir.display()))?;
        if entries.next().is_some() {
            bail!(
                "Output directory '{}' is not empty and holds no previous {}; refusing to overwrite it",
                output_dir.display(),
                PLAN_FILE
            );
        }
        return Ok(());
    }

    let text = fs::read_to_string(&plan_path).wrap_err_with(|| format!("Failed to read '{}'", plan_path.display()))?;
    let previous: PreviousPlan = serde_json::from_str(&text)
        .wrap_err_with(|| format!("Failed to parse previous plan '{}'", plan_path.display()))?;
    for host in previous.hosts {
        if !is_valid_hostname(&host.hostname) {
            warn!("Skipping invalid hostname '{}' listed in {:?}", host.hostname, plan_path);
            continue;
        }
        let host_dir = output_dir.join(&host.hostname);
        if host_dir.is_dir() {
            debug!("Removing previous output {:?}", host_dir);
            fs::remove_dir_all(&host_dir)
                .wrap_err_with(|| format!("Failed to remove host directory '{}'", host_dir.display()))?;
        }
    }
    fs::remove_file(&plan_path).wrap_err_with(|| format!("Failed to remove '{}'", plan_path.display()))?;
    Ok(())
}

/// Write a compiled plan.
///
/// Produces `build_plan.json` plus one directory per host holding
/// `environment.json` and the host's rendered templates. Output of an earlier
/// run in the same directory is replaced.
pub fn write_plan(plan: &BuildPlan, output_dir: &Path) -> Result<()> {
    clear_previous_plan(output_dir)?;
    fs::create_dir_all(output_dir)
        .wrap_err_with(|| format!("Failed to create output directory '{}'", output_dir.display()))?;

    let plan_json = serde_json::to_string_pretty(plan)?;
    let plan_path = output_dir.join(PLAN_FILE);
    fs::write(&plan_path, plan_json).wrap_err_with(|| format!("Failed to write '{}'", plan_path.display()))?;

    for host in &plan.hosts {
        let host_dir = output_dir.join(&host.hostname);
        fs::create_dir_all(&host_dir)
            .wrap_err_with(|| format!("Failed to create host directory '{}'", host_dir.display()))?;

        let env_json = serde_json::to_string_pretty(&host.environment)?;
        fs::write(host_dir.join(ENVIRONMENT_FILE), env_json)
            .wrap_err_with(|| format!("Failed to write environment for host '{}'", host.hostname))?;

        for file in &host.files {
            let path = host_dir.join(&file.name);
            fs::write(&path, &file.contents).wrap_err_with(|| format!("Failed to write '{}'", path.display()))?;
        }
    }

    println!("Generated build plan at {:?}", plan_path);
    println!("  - Site: {}", plan.site);
    println!("  - Hosts: {}", plan.hosts.len());
    println!("  - Vlans: {}", plan.addresses.vlans.len());
    println!("  - Firewall rules: {}", plan.firewall.len());
    println!("  - Build stages:");
    for (index, stage) in plan.stages.stages.iter().enumerate() {
        println!("    - {}: {}", index, stage.join(", "));
    }
    Ok(())
}
