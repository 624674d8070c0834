//! Error types for every compilation stage.
//!
//! Each stage collects all of its problems before failing, so the stage
//! errors travel in batches inside [`CompileError`].

use std::net::IpAddr;

/// Structural and referential problems in a site definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("duplicate {kind} '{name}'")]
    DuplicateName { kind: &'static str, name: String },
    #[error("{location}: unknown {kind} '{name}'")]
    UnknownReference {
        location: String,
        kind: &'static str,
        name: String,
    },
    #[error("{location}: invalid {field}: {reason}")]
    InvalidField {
        location: String,
        field: &'static str,
        reason: String,
    },
    #[error("subnet {subnet} of vlan '{vlan}' overlaps {other_subnet} of vlan '{other}'")]
    SubnetOverlap {
        vlan: String,
        subnet: String,
        other: String,
        other_subnet: String,
    },
    #[error("vlan '{vlan}': DHCP pool offsets {min}-{max} do not fit inside {subnet}")]
    PoolOutOfSubnet {
        vlan: String,
        subnet: String,
        min: u64,
        max: u64,
    },
    #[error("vlan '{vlan}': {address} of '{owner}' lies inside the DHCP pool {start}-{end}")]
    PoolOverlapsStatic {
        vlan: String,
        address: IpAddr,
        owner: String,
        start: IpAddr,
        end: IpAddr,
    },
    #[error("duplicate address {address} for '{owner}'; already claimed by '{other}'")]
    DuplicateAddress {
        address: IpAddr,
        owner: String,
        other: String,
    },
    #[error("{location}: address {address} is outside subnet {subnet}")]
    AddressOutsideSubnet {
        location: String,
        address: IpAddr,
        subnet: String,
    },
    #[error("{location}: address {address} is in vlan '{vlan}', not on the internet")]
    InternetAddressInVlan {
        location: String,
        address: IpAddr,
        vlan: String,
    },
    #[error("more than one default vlan: {vlans}")]
    MultipleDefaultVlans { vlans: String },
    #[error("vswitch '{vswitch}' has more than one untagged vlan")]
    MultipleUntaggedVlans { vswitch: String },
    #[error("vswitch '{vswitch}' uses vlan id {id} more than once")]
    DuplicateVlanId { vswitch: String, id: u16 },
    #[error("more than one router: {hosts}")]
    MultipleRouters { hosts: String },
    #[error("hosting cycle between hosts: {hosts}")]
    HostingCycle { hosts: String },
}

/// Unsatisfiable addressing, reported per offending vlan
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressResolutionError {
    #[error("vlan '{vlan}': invalid subnet: {reason}")]
    InvalidSubnet { vlan: String, reason: String },
    #[error("vlan '{vlan}': address {address} for '{owner}' is already claimed by '{other}'")]
    AddressConflict {
        vlan: String,
        address: IpAddr,
        owner: String,
        other: String,
    },
    #[error("vlan '{vlan}': DHCP pool {start}-{end} has no free addresses")]
    PoolExhausted {
        vlan: String,
        start: IpAddr,
        end: IpAddr,
    },
    #[error("vlan '{vlan}': prefix delegation index {index} exceeds the {available} /{target} subnets of a /{prefix}")]
    PrefixDelegationOverflow {
        vlan: String,
        index: u64,
        available: u128,
        prefix: u8,
        target: u8,
    },
    #[error("vlan '{vlan}': cannot carve a /{target} out of a delegated /{prefix}")]
    InvalidDelegationLength { vlan: String, prefix: u8, target: u8 },
    #[error("vlan '{vlan}' uses prefix delegation but no router uplink requests a delegated prefix")]
    NoPrefixDelegation { vlan: String },
    #[error("vlans '{vlan}' and '{other}' both use prefix delegation index {index}")]
    DuplicateDelegationIndex { vlan: String, other: String, index: u64 },
    #[error("vlan '{vlan}': IPv6 subnet {subnet} overlaps {other_subnet} of vlan '{other}'")]
    Ipv6SubnetOverlap {
        vlan: String,
        subnet: String,
        other: String,
        other_subnet: String,
    },
}

/// Firewall intent that cannot be turned into concrete rules
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FirewallExpansionError {
    #[error("rule '{rule}': unknown service '{service}'")]
    UnknownService { rule: String, service: String },
    #[error("rule '{rule}': unknown protocol '{protocol}'")]
    UnknownProtocol { rule: String, protocol: String },
    #[error("rule '{rule}': invalid port '{port}'")]
    InvalidPort { rule: String, port: String },
    #[error("rule '{rule}': {side} '{locator}' resolves to no endpoints")]
    EmptyEndpointSet {
        rule: String,
        side: &'static str,
        locator: String,
    },
    #[error("rule '{rule}': unknown {kind} '{name}'")]
    UnknownReference {
        rule: String,
        kind: &'static str,
        name: String,
    },
    #[error("rule '{rule}': forward destination '{locator}' must name a host or address")]
    ForwardWithoutTarget { rule: String, locator: String },
    #[error("rule '{rule}': no allow-all, allow or forward action")]
    NoAction { rule: String },
}

/// A template references a variable the host environment does not define
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("host '{host}': variable '{variable}' is not defined")]
pub struct UnresolvedVariable {
    pub host: String,
    pub variable: String,
}

/// Failure of a whole compilation run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("site validation failed with {} error(s)", .0.len())]
    Validation(Vec<ValidationError>),
    #[error("address resolution failed with {} error(s)", .0.len())]
    AddressResolution(Vec<AddressResolutionError>),
    #[error("firewall expansion failed with {} error(s)", .0.len())]
    FirewallExpansion(Vec<FirewallExpansionError>),
    #[error("cyclic build dependency between hosts: {}", .hosts.join(", "))]
    CyclicBuildDependency { hosts: Vec<String> },
    #[error("{} template variable(s) could not be resolved", .0.len())]
    UnresolvedVariables(Vec<UnresolvedVariable>),
}

impl CompileError {
    /// One line per underlying problem
    pub fn diagnostics(&self) -> Vec<String> {
        fn lines<E: ToString>(errors: &[E]) -> Vec<String> {
            errors.iter().map(|e| e.to_string()).collect()
        }

        match self {
            CompileError::Validation(errors) => lines(errors),
            CompileError::AddressResolution(errors) => lines(errors),
            CompileError::FirewallExpansion(errors) => lines(errors),
            CompileError::CyclicBuildDependency { .. } => vec![self.to_string()],
            CompileError::UnresolvedVariables(errors) => lines(errors),
        }
    }
}
