//! Typed site model.
//!
//! This module contains the data structures a site definition is deserialized
//! into: the site itself, its vswitches and vlans, the hosts and their
//! interfaces, and the firewall policy. The model carries no behavior beyond
//! lookups; consistency is checked by the validator and every later stage
//! treats the model as an immutable snapshot.

pub mod firewall;
pub mod host;
pub mod site;
pub mod vlan;

pub use firewall::{FirewallConfig, FirewallRule, IpSet, Locator, LocatorScope, PortSpec, PortValue, RuleAction, ServiceSpec};
pub use host::{AddressMode, Host, Interface, Role};
pub use site::Site;
pub use vlan::{DhcpReservation, StaticHost, VSwitch, Vlan, VlanRef};

use serde::{Deserialize, Deserializer};

/// Accept either a single value or a list of values for a field.
///
/// Site definitions allow `source: {...}` as well as `sources: [...]`, and
/// `allow: ssh` as well as `allow: [ssh, web]`.
pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

pub(crate) fn default_true() -> bool {
    true
}
