//! Address management.
//!
//! CIDR arithmetic, the claimed-address registry, DHCP pool carving, IPv6
//! prefix delegation and the resolver that ties them together for a site.

pub mod cidr;
pub mod pool;
pub mod prefix_delegation;
pub mod registry;
pub mod resolver;

// Re-export commonly used types
pub use cidr::{reverse_pointer, CidrError, Ipv4Cidr, Ipv6Cidr};
pub use pool::{AddressRange, DhcpPool};
pub use prefix_delegation::{assign_delegated_subnets, DelegatedSubnet, DelegationRequest};
pub use registry::AddressRegistry;
pub use resolver::{
    resolve_addresses, AddressEntry, AddressPlan, EntryKind, InterfaceAddress, Ipv6Resolution, ResolvedHost,
    ResolvedInterface, ResolvedVlan, ROUTER_ALIAS,
};
