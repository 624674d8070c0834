use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;

use siteplan::{config_loader, orchestrator};

/// Compile a network site definition into a resolved build plan
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Site directory holding site.yaml and one YAML file per host
    #[arg(short, long)]
    site: PathBuf,

    /// Output directory for the build plan and per-host environments
    #[arg(short, long, default_value = "site_output")]
    output: PathBuf,

    /// Validate and compile without writing anything
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    // Initialize logging with default filter level of "info"
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("Site directory: {:?}", args.site);

    let site = config_loader::load_site(&args.site)?;
    let templates = config_loader::load_templates(&args.site)?;

    let plan = match orchestrator::compile(&site, &templates) {
        Ok(plan) => plan,
        Err(e) => {
            for diagnostic in e.diagnostics() {
                error!("{}", diagnostic);
            }
            return Err(e).wrap_err_with(|| format!("Failed to compile site '{}'", site.name));
        }
    };

    if args.check {
        info!("Site '{}' compiled successfully; nothing written", site.name);
        return Ok(());
    }

    info!("Output directory: {:?}", args.output);
    orchestrator::write_plan(&plan, &args.output)?;
    info!("Build plan generation completed successfully");
    Ok(())
}
