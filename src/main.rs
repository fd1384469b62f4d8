use std::{process::ExitCode, sync::Arc};

use bootstrap::{
    BootstrapError, Bootstrapper, Collaborators,
    drive::{CommandMounter, DriveMounter},
};
use clap::Parser;
use cli::CodetunCli;
use download::HttpDownloader;
use ports::SocketTable;
use process::{CommandRunner, SystemRunner};
use tracing_subscriber::EnvFilter;

mod bootstrap;
mod cli;
mod config;
mod download;
mod ports;
mod process;
mod storage;
mod tunneling;

#[tokio::main]
pub async fn main() -> ExitCode {
    let cli = CodetunCli::parse();
    let default_level = if cli.verbose { "codetun=debug" } else { "codetun=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match bootstrap(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn bootstrap(cli: &CodetunCli) -> Result<(), BootstrapError> {
    let loaded_config = config::load(cli.config.as_deref())?.with_overrides(cli);
    let bootstrap_config = loaded_config.bootstrap_config()?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let drive: Option<Box<dyn DriveMounter>> = match &loaded_config.drive {
        Some(drive) => Some(Box::new(CommandMounter::new(drive, runner.clone())?)),
        None => None,
    };
    let collaborators = Collaborators {
        runner,
        downloader: Box::new(HttpDownloader::new()?),
        tunneler: tunneling::get_tunneler(&loaded_config.tunnel)?,
        ports: Box::new(SocketTable),
        drive,
    };
    let mut bootstrapper = Bootstrapper::new(bootstrap_config, collaborators)?;
    tracing::debug!("extensions: {:?}", bootstrapper.extensions());

    let result = tokio::select! {
        result = bootstrapper.run() => {
            result.map(|report| tracing::info!("code-server exited ({})", report))
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    };
    if let Some(url) = bootstrapper.public_url() {
        tracing::info!("closing {}", url);
    }
    bootstrapper.dispose().await;
    result
}
