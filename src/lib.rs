//! # Siteplan - Configuration compiler for small network sites
//!
//! This library turns a declarative description of a network site (vswitches,
//! vlans, subnets, hosts, firewall policy) into a fully resolved build plan:
//! concrete addresses, expanded firewall rules, a host build order and a flat
//! substitution environment per host for an external template renderer.
//!
//! ## Pipeline
//!
//! Data flows strictly forward and every stage fails closed:
//!
//! 1. `validator`: structural and referential checks, all reported at once
//! 2. `ip`: subnet arithmetic, gateways, static claims, DHCP pools and IPv6
//!    prefix delegation
//! 3. `firewall`: declared and implied rules expanded into sorted,
//!    deduplicated tuples
//! 4. `scheduler`: hosting and routing dependencies sorted into build stages
//! 5. `plan`: per-host environments, DNS/DHCP records and rendered templates
//!
//! ## Architecture
//!
//! - `model`: Typed site definition deserialized from YAML
//! - `config_loader`: Site directory and template loading
//! - `error`: Error types for each stage
//! - `orchestrator`: Runs the pipeline and writes the plan
//! - `utils`: Hostname and MAC address helpers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use siteplan::{config_loader, orchestrator};
//! use std::path::Path;
//!
//! let site = config_loader::load_site(Path::new("sites/home"))?;
//! let templates = config_loader::load_templates(Path::new("sites/home"))?;
//! let plan = orchestrator::compile(&site, &templates)?;
//!
//! // site_output now contains build_plan.json and one directory per host
//! orchestrator::write_plan(&plan, Path::new("site_output"))?;
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Site Format
//!
//! ```yaml
//! domain: example.net
//! vswitches:
//!   - name: switch0
//!     uplink: eno1
//!     vlans:
//!       - name: lan
//!         id: 10
//!         ipv4_subnet: 192.168.10.0/24
//!         ipv6_pd: true
//!         allow_internet: true
//! firewall:
//!   rules:
//!     - comment: admin
//!       source: {vlan: lan}
//!       destination: {vlan: internet}
//!       allow: [ssh, web]
//! ```
//!
//! Hosts live in their own files next to `site.yaml`, one per host.

pub mod config_loader;
pub mod error;
pub mod firewall;
pub mod ip;
pub mod model;
pub mod orchestrator;
pub mod plan;
pub mod scheduler;
pub mod utils;
pub mod validator;

pub use error::CompileError;
