//! Shared utilities: hostname checks and MAC address helpers.

pub mod hostname;
pub mod mac;

pub use hostname::{is_valid_domain, is_valid_hostname};
pub use mac::{generate_vm_mac, normalize_mac};
