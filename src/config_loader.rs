//! Site directory loading.
//!
//! A site directory holds `site.yaml` with the network layout and policy, one
//! `*.yaml` file per host, and optionally `templates/<role>/*.tmpl`. Files are
//! read in sorted name order so host declaration order is stable.

use crate::model::{Host, Role, Site};
use crate::plan::{Template, TemplateSet};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the site-level definition inside a site directory
pub const SITE_FILE: &str = "site.yaml";
/// Directory holding per-role templates
pub const TEMPLATE_DIR: &str = "templates";
const TEMPLATE_SUFFIX: &str = ".tmpl";

/// Parse a site definition from YAML text
pub fn parse_site(yaml: &str) -> Result<Site> {
    let site: Site = serde_yaml::from_str(yaml)?;
    Ok(site)
}

/// Parse one host definition; `default_name` applies when no hostname is given
pub fn parse_host(yaml: &str, default_name: &str) -> Result<Host> {
    let mut host: Host = serde_yaml::from_str(yaml)?;
    if host.hostname.is_empty() {
        host.hostname = default_name.to_string();
    }
    Ok(host)
}

/// Files directly inside `dir` with the given suffix, sorted by name
fn sorted_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).wrap_err_with(|| format!("Failed to read directory '{}'", dir.display()))? {
        let path = entry?.path();
        let matches = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(suffix));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load a complete site from a site directory
pub fn load_site(dir: &Path) -> Result<Site> {
    info!("Loading site from: {:?}", dir);
    let site_path = dir.join(SITE_FILE);
    if !site_path.is_file() {
        bail!("Site directory '{}' has no {}", dir.display(), SITE_FILE);
    }

    let text = fs::read_to_string(&site_path).wrap_err_with(|| format!("Failed to read '{}'", site_path.display()))?;
    let mut site = parse_site(&text).wrap_err_with(|| format!("Failed to parse '{}'", site_path.display()))?;
    if site.name.is_empty() {
        site.name = dir
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "site".to_string());
    }

    for path in sorted_files(dir, ".yaml")? {
        if path == site_path {
            continue;
        }
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let text = fs::read_to_string(&path).wrap_err_with(|| format!("Failed to read '{}'", path.display()))?;
        let host = parse_host(&text, &stem).wrap_err_with(|| format!("Failed to parse host file '{}'", path.display()))?;
        debug!("Loaded host '{}' from {:?}", host.hostname, path);
        site.hosts.push(host);
    }

    info!("Loaded site '{}' with {} vswitches and {} hosts", site.name, site.vswitches.len(), site.hosts.len());
    Ok(site)
}

/// Load `templates/<role>/*.tmpl`; a missing template directory means no templates
pub fn load_templates(dir: &Path) -> Result<TemplateSet> {
    let root = dir.join(TEMPLATE_DIR);
    if !root.is_dir() {
        return Ok(TemplateSet::default());
    }

    let mut role_dirs: Vec<PathBuf> = fs::read_dir(&root)
        .wrap_err_with(|| format!("Failed to read directory '{}'", root.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    role_dirs.sort();

    let mut templates = Vec::new();
    for role_dir in role_dirs {
        let name = role_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let Ok(role) = Role::from_str(&name) else {
            warn!("Ignoring template directory '{}': not a role", role_dir.display());
            continue;
        };
        for path in sorted_files(&role_dir, TEMPLATE_SUFFIX)? {
            let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let text = fs::read_to_string(&path).wrap_err_with(|| format!("Failed to read '{}'", path.display()))?;
            templates.push(Template::new(role, file_name.trim_end_matches(TEMPLATE_SUFFIX), text));
        }
    }
    info!("Loaded {} templates", templates.len());
    Ok(TemplateSet::new(templates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_host_defaults_hostname() {
        let host = parse_host("role: dns\n", "dns1").unwrap();
        assert_eq!(host.hostname, "dns1");
        let named = parse_host("hostname: other\n", "dns1").unwrap();
        assert_eq!(named.hostname, "other");
        assert!(parse_host("interfaces: 5\n", "x").is_err());
    }

    #[test]
    fn test_load_site_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SITE_FILE),
            "domain: example.net\nvswitches:\n  - name: switch0\n    vlans:\n      - name: lan\n        ipv4_subnet: 192.168.1.0/24\n",
        )
        .unwrap();
        fs::write(dir.path().join("b-host.yaml"), "interfaces:\n  - vswitch: switch0\n").unwrap();
        fs::write(dir.path().join("a-host.yaml"), "role: dns\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let site = load_site(dir.path()).unwrap();
        let names: Vec<&str> = site.hosts.iter().map(|h| h.hostname.as_str()).collect();
        assert_eq!(names, vec!["a-host", "b-host"]);
        assert!(!site.name.is_empty());
    }

    #[test]
    fn test_missing_site_file() {
        let dir = TempDir::new().unwrap();
        let err = load_site(dir.path()).unwrap_err();
        assert!(err.to_string().contains("site.yaml"));
    }

    #[test]
    fn test_load_templates() {
        let dir = TempDir::new().unwrap();
        assert!(load_templates(dir.path()).unwrap().templates.is_empty());

        let dns = dir.path().join(TEMPLATE_DIR).join("dns");
        fs::create_dir_all(&dns).unwrap();
        fs::create_dir_all(dir.path().join(TEMPLATE_DIR).join("printer")).unwrap();
        fs::write(dns.join("pdns.conf.tmpl"), "${DNS_FORWARDERS}").unwrap();
        fs::write(dns.join("README"), "not a template").unwrap();

        let set = load_templates(dir.path()).unwrap();
        assert_eq!(set.templates, vec![Template::new(Role::Dns, "pdns.conf", "${DNS_FORWARDERS}")]);
    }
}
