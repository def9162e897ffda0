//! lockstep - provider dependency service CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lockstep_core::Config;
use lockstep_rpc::{Cli, Commands, DependenciesService, cmd};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries JSON lines.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let service = DependenciesService::from_config(&config)?;

    match cli.command {
        Commands::Locks {
            bundle,
            address,
            versions,
        } => cmd::locks::locks(&service, &bundle, &address, &versions),
        Commands::Cache { dir, platform } => {
            let dir = dir.unwrap_or_else(|| config.cache_dir.clone());
            cmd::cache::cache(&service, &dir, &platform).await
        }
        Commands::Resolve {
            bundle,
            address,
            versions,
        } => cmd::resolve::resolve(&service, &bundle, &address, &versions),
        Commands::Install {
            bundle,
            lock_file,
            cache_dir,
            local_mirrors,
            network_mirrors,
            direct,
            platform,
        } => {
            let opts = cmd::install::InstallOptions {
                bundle,
                lock_file,
                cache_dir: cache_dir.unwrap_or_else(|| config.cache_dir.clone()),
                local_mirrors,
                network_mirrors,
                direct,
                platform,
            };
            cmd::install::install(&service, opts).await
        }
    }
}
