//! Plan emission.
//!
//! Assembles the final build plan: for every host a flat substitution
//! environment, its build stage and the rendered role templates. Every
//! template variable is checked before any output exists, so a plan is
//! either complete or not produced at all.

pub mod environment;
pub mod records;
pub mod templates;

pub use environment::{host_environment, Environment, PlanContext};
pub use records::{dhcp_blocks, dns_records, DhcpBlocks, DhcpReservationLine, DhcpSubnet, DnsRecord, DnsRecords, DnsZone, RecordType};
pub use templates::{required_variables, Template, TemplateSet};

use crate::error::{CompileError, UnresolvedVariable};
use crate::firewall::RuleTuple;
use crate::ip::AddressPlan;
use crate::model::Role;
use crate::scheduler::BuildSchedule;
use serde::Serialize;

/// A rendered template ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub name: String,
    pub contents: String,
}

/// Everything emitted for one host
#[derive(Debug, Clone, Serialize)]
pub struct HostPlan {
    pub hostname: String,
    pub roles: Vec<Role>,
    pub stage: usize,
    pub depends_on: Vec<String>,
    #[serde(skip)]
    pub environment: Environment,
    #[serde(skip)]
    pub files: Vec<RenderedFile>,
}

/// The complete, resolved output of a compilation run
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    pub site: String,
    pub domain: String,
    pub stages: BuildSchedule,
    pub hosts: Vec<HostPlan>,
    pub addresses: AddressPlan,
    pub firewall: Vec<RuleTuple>,
}

/// Build every host environment and render the templates.
///
/// All missing variables across all hosts are reported together.
pub fn emit_plan(ctx: &PlanContext<'_>, templates: &TemplateSet) -> Result<BuildPlan, CompileError> {
    let mut hosts = Vec::with_capacity(ctx.site.hosts.len());
    let mut unresolved: Vec<UnresolvedVariable> = Vec::new();

    for host in &ctx.site.hosts {
        let environment = host_environment(ctx, host);
        let roles = host.effective_roles();
        unresolved.extend(templates.check_host(&host.hostname, &roles, &environment));
        hosts.push(HostPlan {
            hostname: host.hostname.clone(),
            stage: ctx.schedule.stage_of(&host.hostname).unwrap_or_default(),
            depends_on: ctx
                .graph
                .dependencies_of(&host.hostname)
                .into_iter()
                .map(|(name, _)| name.to_string())
                .collect(),
            roles,
            environment,
            files: Vec::new(),
        });
    }
    if !unresolved.is_empty() {
        return Err(CompileError::UnresolvedVariables(unresolved));
    }

    for host in &mut hosts {
        for template in templates.for_roles(&host.roles) {
            let contents = template.render(&host.environment).map_err(|missing| {
                CompileError::UnresolvedVariables(
                    missing
                        .into_iter()
                        .map(|variable| UnresolvedVariable { host: host.hostname.clone(), variable })
                        .collect(),
                )
            })?;
            host.files.push(RenderedFile { name: template.name.clone(), contents });
        }
        log::debug!(
            "Host '{}': {} variables, {} rendered files",
            host.hostname,
            host.environment.len(),
            host.files.len()
        );
    }

    Ok(BuildPlan {
        site: ctx.site.name.clone(),
        domain: ctx.site.domain.clone(),
        stages: ctx.schedule.clone(),
        hosts,
        addresses: ctx.addresses.clone(),
        firewall: ctx.rules.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::resolve_addresses;
    use crate::model::Site;
    use crate::scheduler::build_schedule;

    const SITE: &str = r#"
name: home
domain: example.net
vswitches:
  - name: switch0
    vlans:
      - name: lan
        ipv4_subnet: 192.168.10.0/24
hosts:
  - hostname: router
    role: router
    interfaces:
      - vswitch: switch0
        ipv4_address: 192.168.10.1
  - hostname: dhcp1
    role: dhcp
    interfaces:
      - vswitch: switch0
        ipv4_address: 192.168.10.2
"#;

    fn emit(yaml: &str, templates: &TemplateSet) -> Result<BuildPlan, CompileError> {
        let site: Site = serde_yaml::from_str(yaml).unwrap();
        let addresses = resolve_addresses(&site).unwrap();
        let (graph, schedule) = build_schedule(&site).unwrap();
        let ctx = PlanContext::new(&site, &addresses, &[], &graph, &schedule);
        emit_plan(&ctx, templates)
    }

    #[test]
    fn test_missing_uplink_variable_is_reported() {
        // a router without an uplink never defines UPLINK_IFACE
        let err = emit(SITE, &TemplateSet::default()).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnresolvedVariables(vec![UnresolvedVariable {
                host: "router".into(),
                variable: "UPLINK_IFACE".into(),
            }])
        );
    }

    #[test]
    fn test_templates_are_rendered_per_role() {
        let yaml = SITE.replacen("    interfaces:\n", "    interfaces:\n      - uplink: wan0\n", 1);
        let templates = TemplateSet::new(vec![
            Template::new(Role::Dhcp, "kea.conf", "subnets:\n${DHCP4_SUBNETS}\n"),
            Template::new(Role::Generic, "hostname", "${FQDN}\n"),
        ]);
        let plan = emit(&yaml, &templates).unwrap();
        assert_eq!(plan.stages.stages, vec![vec!["router".to_string()], vec!["dhcp1".to_string()]]);

        let dhcp1 = &plan.hosts[1];
        assert_eq!(dhcp1.stage, 1);
        assert_eq!(dhcp1.depends_on, vec!["router".to_string()]);
        let names: Vec<&str> = dhcp1.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["hostname", "kea.conf"]);
        assert_eq!(dhcp1.files[0].contents, "dhcp1.example.net\n");
        assert!(dhcp1.files[1].contents.starts_with("subnets:\nlan\t192.168.10.0/24\t"));

        let template = Template::new(Role::Generic, "extra", "${NOT_DEFINED}");
        let err = emit(&yaml, &TemplateSet::new(vec![template])).unwrap_err();
        assert_eq!(err.diagnostics().len(), 2);
    }
}
