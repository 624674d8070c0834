//! Named service catalog and explicit protocol/port parsing.

use crate::error::FirewallExpansionError;
use crate::model::{PortValue, ServiceSpec};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Transport protocol of a rule tuple; `Any` covers every protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[serde(rename = "all")]
    Any,
    Icmp,
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Any => "all",
            Protocol::Icmp => "icmp",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    /// Only TCP and UDP carry port numbers
    pub fn has_ports(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            "all" | "any" => Ok(Protocol::Any),
            other => Err(other.to_string()),
        }
    }
}

/// An inclusive port range; a single port has `start == end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const fn single(port: u16) -> Self {
        Self { start: port, end: port }
    }

    pub const fn range(start: u16, end: u16) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

impl Serialize for PortRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for PortRange {
    type Err = String;

    /// Accepts `N`, `A-B` and `A:B`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |text: &str| match text.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(s.to_string()),
            Ok(port) => Ok(port),
        };
        match s.split_once(|c| c == '-' || c == ':') {
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if start > end {
                    return Err(s.to_string());
                }
                Ok(PortRange::range(start, end))
            }
            None => parse(s).map(PortRange::single),
        }
    }
}

/// One protocol and optional port range resolved from a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub protocol: Protocol,
    pub ports: Option<PortRange>,
    pub comment: String,
}

/// A named service and the protocol/port entries it stands for
#[derive(Debug)]
pub struct Service {
    pub name: &'static str,
    pub ports: &'static [(Protocol, Option<PortRange>)],
}

/// The fixed catalog of named services
pub const SERVICES: &[Service] = &[
    Service { name: "ping", ports: &[(Protocol::Icmp, None)] },
    Service {
        name: "traceroute",
        ports: &[(Protocol::Udp, Some(PortRange::range(33434, 33524))), (Protocol::Icmp, None)],
    },
    Service { name: "ssh", ports: &[(Protocol::Tcp, Some(PortRange::single(22)))] },
    Service { name: "telnet", ports: &[(Protocol::Tcp, Some(PortRange::single(23)))] },
    Service {
        name: "dns",
        ports: &[(Protocol::Udp, Some(PortRange::single(53))), (Protocol::Tcp, Some(PortRange::single(53)))],
    },
    Service { name: "dhcp", ports: &[(Protocol::Udp, Some(PortRange::range(67, 68)))] },
    Service { name: "ntp", ports: &[(Protocol::Udp, Some(PortRange::single(123)))] },
    Service {
        name: "samba",
        ports: &[
            (Protocol::Tcp, Some(PortRange::single(139))),
            (Protocol::Tcp, Some(PortRange::single(445))),
            (Protocol::Udp, Some(PortRange::range(137, 138))),
        ],
    },
    Service {
        name: "web",
        ports: &[(Protocol::Tcp, Some(PortRange::single(80))), (Protocol::Tcp, Some(PortRange::single(443)))],
    },
    Service { name: "ftp", ports: &[(Protocol::Tcp, Some(PortRange::single(21)))] },
    Service {
        name: "mail",
        ports: &[
            (Protocol::Tcp, Some(PortRange::single(25))),
            (Protocol::Tcp, Some(PortRange::single(465))),
            (Protocol::Tcp, Some(PortRange::single(587))),
        ],
    },
    Service { name: "pop3", ports: &[(Protocol::Tcp, Some(PortRange::single(110)))] },
    Service { name: "imap", ports: &[(Protocol::Tcp, Some(PortRange::single(143)))] },
    Service { name: "imaps", ports: &[(Protocol::Tcp, Some(PortRange::single(993)))] },
];

pub fn lookup_service(name: &str) -> Option<&'static Service> {
    SERVICES.iter().find(|s| s.name.eq_ignore_ascii_case(name.trim()))
}

/// Resolve one service entry of a rule into protocol/port entries
pub fn resolve_service(spec: &ServiceSpec, rule: &str) -> Result<Vec<ServicePort>, FirewallExpansionError> {
    match spec {
        ServiceSpec::Named(name) => {
            let service = lookup_service(name).ok_or_else(|| FirewallExpansionError::UnknownService {
                rule: rule.to_string(),
                service: name.clone(),
            })?;
            Ok(service
                .ports
                .iter()
                .map(|(protocol, ports)| ServicePort {
                    protocol: *protocol,
                    ports: *ports,
                    comment: service.name.to_string(),
                })
                .collect())
        }
        ServiceSpec::ProtoPort { proto, port, comment } => {
            let protocol = proto
                .parse::<Protocol>()
                .map_err(|protocol| FirewallExpansionError::UnknownProtocol { rule: rule.to_string(), protocol })?;
            if !protocol.has_ports() {
                return Err(FirewallExpansionError::InvalidPort {
                    rule: rule.to_string(),
                    port: format!("{} has no ports", protocol),
                });
            }
            port.values()
                .into_iter()
                .map(|value| {
                    let text = match value {
                        PortValue::Number(n) => n.to_string(),
                        PortValue::Text(t) => t.clone(),
                    };
                    let ports = text
                        .parse::<PortRange>()
                        .map_err(|port| FirewallExpansionError::InvalidPort { rule: rule.to_string(), port })?;
                    Ok(ServicePort { protocol, ports: Some(ports), comment: comment.clone() })
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortSpec;

    #[test]
    fn test_catalog_lookups() {
        let ssh = resolve_service(&ServiceSpec::Named("ssh".into()), "r").unwrap();
        assert_eq!(
            ssh,
            vec![ServicePort { protocol: Protocol::Tcp, ports: Some(PortRange::single(22)), comment: "ssh".into() }]
        );
        assert_eq!(resolve_service(&ServiceSpec::Named("DNS".into()), "r").unwrap().len(), 2);
        assert_eq!(resolve_service(&ServiceSpec::Named("ping".into()), "r").unwrap()[0].ports, None);
        assert_eq!(SERVICES.len(), 14);
    }

    #[test]
    fn test_unknown_service() {
        assert_eq!(
            resolve_service(&ServiceSpec::Named("gopher".into()), "legacy"),
            Err(FirewallExpansionError::UnknownService { rule: "legacy".into(), service: "gopher".into() })
        );
    }

    #[test]
    fn test_explicit_ports() {
        let spec = ServiceSpec::ProtoPort {
            proto: "udp".into(),
            port: PortSpec::Many(vec![PortValue::Text("5000-5010".into()), PortValue::Number(6000), PortValue::Text("7000:7001".into())]),
            comment: "media".into(),
        };
        let ports: Vec<String> = resolve_service(&spec, "r")
            .unwrap()
            .iter()
            .map(|p| format!("{}/{}", p.protocol, p.ports.unwrap()))
            .collect();
        assert_eq!(ports, vec!["udp/5000:5010", "udp/6000", "udp/7000:7001"]);
    }

    #[test]
    fn test_invalid_explicit_entries() {
        let bad_port = ServiceSpec::ProtoPort {
            proto: "tcp".into(),
            port: PortSpec::One(PortValue::Number(70000)),
            comment: String::new(),
        };
        assert!(matches!(resolve_service(&bad_port, "r"), Err(FirewallExpansionError::InvalidPort { .. })));

        let bad_proto = ServiceSpec::ProtoPort {
            proto: "sctp".into(),
            port: PortSpec::One(PortValue::Number(80)),
            comment: String::new(),
        };
        assert!(matches!(resolve_service(&bad_proto, "r"), Err(FirewallExpansionError::UnknownProtocol { .. })));
        assert!("90-80".parse::<PortRange>().is_err());
    }
}
