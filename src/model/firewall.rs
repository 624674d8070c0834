//! Firewall policy definitions.

use super::one_or_many;
use super::vlan::VlanRef;
use serde::{Deserialize, Serialize};

/// Firewall section of a site definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirewallConfig {
    #[serde(default)]
    pub ipsets: Vec<IpSet>,
    #[serde(default)]
    pub rules: Vec<FirewallRule>,
}

/// A named set of addresses or networks, all of one IP family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpSet {
    pub name: String,
    pub addresses: Vec<String>,
}

/// One declared firewall rule: sources x destinations x actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    #[serde(default)]
    pub comment: String,
    #[serde(alias = "source", deserialize_with = "one_or_many")]
    pub sources: Vec<Locator>,
    #[serde(alias = "destination", deserialize_with = "one_or_many")]
    pub destinations: Vec<Locator>,
    #[serde(default, rename = "allow-all", alias = "allow_all")]
    pub allow_all: bool,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<ServiceSpec>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub forward: Vec<ServiceSpec>,
}

/// The effective action of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction<'a> {
    AllowAll,
    Allow(&'a [ServiceSpec]),
    Forward(&'a [ServiceSpec]),
    None,
}

impl FirewallRule {
    /// `allow-all` supersedes `allow`, which supersedes `forward`
    pub fn action(&self) -> RuleAction<'_> {
        if self.allow_all {
            RuleAction::AllowAll
        } else if !self.allow.is_empty() {
            RuleAction::Allow(&self.allow)
        } else if !self.forward.is_empty() {
            RuleAction::Forward(&self.forward)
        } else {
            RuleAction::None
        }
    }

    pub fn allow_all(comment: impl Into<String>, sources: Vec<Locator>, destinations: Vec<Locator>) -> Self {
        Self {
            comment: comment.into(),
            sources,
            destinations,
            allow_all: true,
            allow: Vec::new(),
            forward: Vec::new(),
        }
    }

    pub fn allow_services(
        comment: impl Into<String>,
        sources: Vec<Locator>,
        destinations: Vec<Locator>,
        services: &[&str],
    ) -> Self {
        Self {
            comment: comment.into(),
            sources,
            destinations,
            allow_all: false,
            allow: services.iter().map(|s| ServiceSpec::Named(s.to_string())).collect(),
            forward: Vec::new(),
        }
    }
}

/// Source or destination of a firewall rule.
///
/// `vlan` is a vlan name or id, or one of the pseudo-locations `all`,
/// `internet` and `firewall`. At most one of `hostname`, `ipset` or the
/// explicit addresses narrows the locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub vlan: VlanRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vswitch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_address: Option<String>,
}

/// What the `vlan` field of a locator refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorScope<'a> {
    /// Every routable vlan
    All,
    /// Anything outside the site
    Internet,
    /// The router itself
    Firewall,
    Vlan(&'a VlanRef),
}

impl Locator {
    fn pseudo(name: &str) -> Self {
        Self::vlan(name)
    }

    pub fn all() -> Self {
        Self::pseudo("all")
    }

    pub fn internet() -> Self {
        Self::pseudo("internet")
    }

    pub fn firewall() -> Self {
        Self::pseudo("firewall")
    }

    pub fn vlan(name: &str) -> Self {
        Self {
            vlan: VlanRef::Name(name.to_string()),
            vswitch: None,
            hostname: None,
            ipset: None,
            ipv4_address: None,
            ipv6_address: None,
        }
    }

    pub fn host(vlan: &str, hostname: &str) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            ..Self::vlan(vlan)
        }
    }

    pub fn scope(&self) -> LocatorScope<'_> {
        match &self.vlan {
            VlanRef::Name(name) if name.eq_ignore_ascii_case("all") => LocatorScope::All,
            VlanRef::Name(name) if name.eq_ignore_ascii_case("internet") => LocatorScope::Internet,
            VlanRef::Name(name) if name.eq_ignore_ascii_case("firewall") => LocatorScope::Firewall,
            other => LocatorScope::Vlan(other),
        }
    }

    /// True when the locator is narrowed below a whole vlan
    pub fn is_narrowed(&self) -> bool {
        self.hostname.is_some() || self.ipset.is_some() || self.ipv4_address.is_some() || self.ipv6_address.is_some()
    }
}

/// A named service from the catalog or an explicit protocol/port entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceSpec {
    Named(String),
    ProtoPort {
        proto: String,
        #[serde(alias = "ports")]
        port: PortSpec,
        #[serde(default)]
        comment: String,
    },
}

/// One port value or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    One(PortValue),
    Many(Vec<PortValue>),
}

impl PortSpec {
    pub fn values(&self) -> Vec<&PortValue> {
        match self {
            PortSpec::One(value) => vec![value],
            PortSpec::Many(values) => values.iter().collect(),
        }
    }
}

/// A port number or a range written `A-B` or `A:B`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    Text(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_singular_and_plural_forms() {
        let yaml = r#"
comment: ssh from lan
source:
  vlan: lan
destinations:
  - vlan: servers
    hostname: files
  - vlan: internet
allow: ssh
"#;
        let rule: FirewallRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.sources.len(), 1);
        assert_eq!(rule.destinations.len(), 2);
        assert_eq!(rule.destinations[1].scope(), LocatorScope::Internet);
        assert!(rule.destinations[0].is_narrowed());
        assert_eq!(rule.action(), RuleAction::Allow(&[ServiceSpec::Named("ssh".into())]));
    }

    #[test]
    fn test_rule_proto_port_actions() {
        let yaml = r#"
sources: [{vlan: all}]
destination: {vlan: 10}
allow:
  - web
  - proto: udp
    ports: ["5000-5010", 6000]
    comment: media
"#;
        let rule: FirewallRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.sources[0].scope(), LocatorScope::All);
        assert_eq!(rule.destinations[0].scope(), LocatorScope::Vlan(&VlanRef::Id(10)));
        match &rule.allow[1] {
            ServiceSpec::ProtoPort { proto, port, comment } => {
                assert_eq!(proto, "udp");
                assert_eq!(comment, "media");
                assert_eq!(port.values().len(), 2);
            }
            other => panic!("unexpected service {:?}", other),
        }
    }

    #[test]
    fn test_allow_all_supersedes_other_actions() {
        let yaml = r#"
sources: [{vlan: lan}]
destinations: [{vlan: internet}]
allow-all: true
allow: ssh
"#;
        let rule: FirewallRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.action(), RuleAction::AllowAll);
    }
}
