use anyhow::Result;
use clap::Parser;
use tracing::info;

use sdmaker::cli::Cli;
use sdmaker::host::LinuxHost;
use sdmaker::image::DiskImage;
use sdmaker::{logging, pipeline, preflight, Settings};

fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_format.map(|f| f.as_str()), cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("? {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let request = cli.into_request()?;
    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut settings)?;

    preflight::require_root()?;
    let image = DiskImage::open(&request.image)?;
    let extends = request.extension_mb(&settings, image.is_device()).is_some();
    preflight::check_required_tools(&preflight::required_tools(request.mode, extends))?;

    let host = LinuxHost::new(&settings);
    let outcome = pipeline::run(&host, &settings, &request)?;

    if let Some(report) = &outcome.extended {
        info!(
            "Root partition is now {} MiB",
            report.root_bytes / (1024 * 1024)
        );
    }
    if outcome.already_customized {
        info!("Image was already customized; use --redo-customize to run again");
    }
    if let Some(target) = &outcome.burned_to {
        info!("Burn to {} complete", target.display());
    }
    Ok(())
}
