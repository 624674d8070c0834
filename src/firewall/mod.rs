//! Firewall policy expansion.
//!
//! Declared rules and the rules implied by vlan settings and host roles are
//! expanded into concrete (source, destination, protocol, ports, action)
//! tuples, then rendered as rule text for the router and for hosts that run
//! a local firewall.

pub mod expander;
pub mod implicit;
pub mod render;
pub mod services;

pub use expander::{
    dedup_tuples, expand_rules, Endpoint, ExpansionContext, RuleTuple, TupleAction, FIREWALL_ZONE, INTERNET_ZONE,
};
pub use implicit::implicit_rules;
pub use render::{render_endpoint, render_rules, render_tuple, render_tuple_lines, rules_for_host};
pub use services::{lookup_service, resolve_service, PortRange, Protocol, Service, ServicePort, SERVICES};
