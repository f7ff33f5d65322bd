//! Sidecar entry point
//!
//! This is a thin wrapper that delegates to the library crate: it parses the
//! command line, sets up logging and hands the resolved configuration over.

use clap::Parser;
use log::error;

use utility_sidecar_lib::config::{CliArgs, SidecarConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // stdout carries the control channel, so logs go to stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .target(env_logger::Target::Stderr)
        .init();

    std::panic::set_hook(Box::new(|info| {
        error!("Panic: {}", info);
    }));

    let config = SidecarConfig::resolve(&args)?;
    utility_sidecar_lib::run(config).await?;
    Ok(())
}
