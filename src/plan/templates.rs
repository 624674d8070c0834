//! Role templates and the variable contract.
//!
//! Templates use `${NAME}` placeholders. Before anything is written, every
//! host is checked for the variables its roles require: the built-in set for
//! each role plus every placeholder found in that role's templates.

use super::environment::Environment;
use crate::error::UnresolvedVariable;
use crate::model::Role;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Z0-9_]+)\}").expect("Invalid placeholder regex"));

/// Variables every host of a role must define, regardless of templates
pub fn required_variables(role: Role) -> &'static [&'static str] {
    match role {
        Role::Generic => &[
            "HOSTNAME",
            "DOMAIN",
            "FQDN",
            "SITE_NAME",
            "TIMEZONE",
            "BUILD_STAGE",
            "ROLES",
            "NAMESERVERS",
            "NTP_SERVERS",
        ],
        Role::Vmhost => &["VM_GUESTS", "VSWITCHES"],
        Role::Router => &["FIREWALL_RULES", "FIREWALL_ZONES", "ROUTER_VLANS", "UPLINK_IFACE"],
        Role::Dns => &["DNS_RECORDS", "DNS_ZONES", "DNS_REVERSE_ZONES", "DNS_FORWARDERS"],
        Role::Dhcp => &["DHCP4_SUBNETS", "DHCP6_SUBNETS", "DHCP_RESERVATIONS"],
        Role::Ntp => &["NTP_SERVERS"],
        Role::Storage | Role::Build => &[],
    }
}

/// One template file belonging to a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub role: Role,
    /// Output file name, without the `.tmpl` suffix
    pub name: String,
    pub text: String,
}

impl Template {
    pub fn new(role: Role, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { role, name: name.into(), text: text.into() }
    }

    /// Placeholder names in order of first appearance, without duplicates
    pub fn variables(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        PLACEHOLDER
            .captures_iter(&self.text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Substitute every placeholder; fails with the names that are missing
    pub fn render(&self, env: &Environment) -> Result<String, Vec<String>> {
        let missing: Vec<String> = self
            .variables()
            .into_iter()
            .filter(|name| !env.contains(name))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(PLACEHOLDER
            .replace_all(&self.text, |caps: &regex::Captures| {
                env.get(&caps[1]).unwrap_or_default().to_string()
            })
            .into_owned())
    }
}

/// All templates of a site
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    pub templates: Vec<Template>,
}

impl TemplateSet {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    pub fn for_role(&self, role: Role) -> impl Iterator<Item = &Template> {
        self.templates.iter().filter(move |t| t.role == role)
    }

    /// Templates rendered for a host with these roles, in role order
    pub fn for_roles<'a>(&'a self, roles: &'a [Role]) -> impl Iterator<Item = &'a Template> {
        roles.iter().flat_map(move |role| self.for_role(*role))
    }

    /// Every (host, variable) pair a host's roles need but its environment lacks
    pub fn check_host(&self, host: &str, roles: &[Role], env: &Environment) -> Vec<UnresolvedVariable> {
        let mut needed: Vec<&str> = Vec::new();
        for role in roles {
            needed.extend(required_variables(*role));
            for template in self.for_role(*role) {
                needed.extend(template.variables());
            }
        }
        let mut seen = BTreeSet::new();
        needed
            .into_iter()
            .filter(|name| seen.insert(*name))
            .filter(|name| !env.contains(name))
            .map(|name| UnresolvedVariable { host: host.to_string(), variable: name.to_string() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        let mut env = Environment::default();
        for (k, v) in pairs {
            env.insert(*k, *v);
        }
        env
    }

    #[test]
    fn test_variables_and_render() {
        let template = Template::new(Role::Generic, "motd", "${HOSTNAME}.${DOMAIN} ${HOSTNAME} $HOME ${lower}");
        assert_eq!(template.variables(), vec!["HOSTNAME", "DOMAIN"]);
        let rendered = template.render(&env(&[("HOSTNAME", "nas"), ("DOMAIN", "example.net")])).unwrap();
        assert_eq!(rendered, "nas.example.net nas $HOME ${lower}");
        assert_eq!(template.render(&env(&[("HOSTNAME", "nas")])), Err(vec!["DOMAIN".to_string()]));
    }

    #[test]
    fn test_check_host_reports_every_missing_variable() {
        let set = TemplateSet::new(vec![
            Template::new(Role::Dns, "pdns.conf", "listen=${LISTEN_ADDRESSES}"),
            Template::new(Role::Router, "zones", "${FIREWALL_ZONES}"),
        ]);
        let mut full = env(&[]);
        for name in required_variables(Role::Generic).iter().chain(required_variables(Role::Dns)) {
            full.insert(*name, "x");
        }
        let missing = set.check_host("dns1", &[Role::Generic, Role::Dns], &full);
        assert_eq!(
            missing,
            vec![UnresolvedVariable { host: "dns1".into(), variable: "LISTEN_ADDRESSES".into() }]
        );
        assert_eq!(set.for_roles(&[Role::Generic, Role::Dns]).count(), 1);
    }
}
