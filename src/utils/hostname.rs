//! Hostname checks.

/// True if `name` is a valid DNS label: 1-63 letters, digits or hyphens,
/// not starting or ending with a hyphen
pub fn is_valid_hostname(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

/// True if `domain` is empty or a dot-separated list of valid labels
pub fn is_valid_domain(domain: &str) -> bool {
    domain.is_empty() || domain.trim_end_matches('.').split('.').all(is_valid_hostname)
}
