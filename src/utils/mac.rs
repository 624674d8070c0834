//! MAC address helpers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Prefix of locally administered addresses handed to virtual machines
const VM_MAC_PREFIX: [u8; 3] = [0x52, 0x54, 0x00];

/// Fold the identifying strings into a seed that is stable across runs
fn stable_seed(parts: &[&str]) -> u64 {
    let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for byte in part.bytes().chain(std::iter::once(0)) {
            seed ^= u64::from(byte);
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    seed
}

/// Generate a deterministic MAC address for a VM interface.
///
/// The same site, host and interface always produce the same address.
///
/// # Example
/// ```rust
/// use siteplan::utils::mac::generate_vm_mac;
///
/// let mac = generate_vm_mac("home", "dns1", "eth0");
/// assert!(mac.starts_with("52:54:00:"));
/// assert_eq!(mac, generate_vm_mac("home", "dns1", "eth0"));
/// ```
pub fn generate_vm_mac(site: &str, hostname: &str, interface: &str) -> String {
    let mut rng = StdRng::seed_from_u64(stable_seed(&[site, hostname, interface]));
    let tail: [u8; 3] = rng.gen();
    format_mac(&[
        VM_MAC_PREFIX[0],
        VM_MAC_PREFIX[1],
        VM_MAC_PREFIX[2],
        tail[0],
        tail[1],
        tail[2],
    ])
}

fn format_mac(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse a MAC written with `:` or `-` separators into canonical lowercase form
pub fn normalize_mac(text: &str) -> Option<String> {
    let parts: Vec<&str> = text.trim().split(|c| c == ':' || c == '-').collect();
    if parts.len() != 6 {
        return None;
    }
    let mut bytes = [0u8; 6];
    for (byte, part) in bytes.iter_mut().zip(&parts) {
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    Some(format_mac(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_mac_is_stable_and_distinct() {
        let a = generate_vm_mac("home", "dns1", "eth0");
        assert_eq!(a, generate_vm_mac("home", "dns1", "eth0"));
        assert_ne!(a, generate_vm_mac("home", "dns1", "eth1"));
        assert_ne!(a, generate_vm_mac("home", "dns2", "eth0"));
        assert!(a.starts_with("52:54:00:"));
        assert_eq!(normalize_mac(&a), Some(a.clone()));
    }

    #[test]
    fn test_seed_separates_parts() {
        assert_ne!(stable_seed(&["ab", "c"]), stable_seed(&["a", "bc"]));
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("AA-BB-CC-00-11-22"), Some("aa:bb:cc:00:11:22".to_string()));
        assert_eq!(normalize_mac("aa:bb:cc:00:11"), None);
        assert_eq!(normalize_mac("aa:bb:cc:00:11:zz"), None);
        assert_eq!(normalize_mac("aaa:bb:cc:00:11:22"), None);
    }
}
