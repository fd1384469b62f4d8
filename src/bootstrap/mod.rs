//! The setup sequence: install, configure, tunnel, serve.

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::{BootstrapConfig, ConfigError, expand_path},
    download::{DownloadError, Downloader},
    ports::PortReleaser,
    process::{CommandRunner, ProcessError},
    tunneling::{TunnelError, TunnelHandle, Tunneler},
};

pub(crate) mod drive;
mod extensions;
mod installer;
pub(crate) mod report;
mod server;
mod settings;

use drive::DriveMounter;
use report::SetupReport;
use settings::Settings;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("download error: {0}")]
    Download(#[from] DownloadError),
    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("could not mount drive: {0}")]
    Drive(ProcessError),
    #[error("could not write {0}: {1}")]
    Io(String, String),
}

/// Everything the bootstrapper talks to. A missing `drive` means mounting is
/// not available on this host.
pub(crate) struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub downloader: Box<dyn Downloader>,
    pub tunneler: Box<dyn Tunneler>,
    pub ports: Box<dyn PortReleaser>,
    pub drive: Option<Box<dyn DriveMounter>>,
}

pub(crate) struct Bootstrapper {
    config: BootstrapConfig,
    extensions: Vec<String>,
    home: PathBuf,
    runner: Arc<dyn CommandRunner>,
    downloader: Box<dyn Downloader>,
    tunneler: Box<dyn Tunneler>,
    ports: Box<dyn PortReleaser>,
    drive: Option<Box<dyn DriveMounter>>,
    /// the tunnel this bootstrapper opened
    tunnel: Option<TunnelHandle>,
    disposed: bool,
}

impl Bootstrapper {
    /// Fails before anything is installed if the extra extensions are invalid.
    pub fn new(
        config: BootstrapConfig,
        collaborators: Collaborators,
    ) -> Result<Bootstrapper, BootstrapError> {
        let extensions = extensions::merge_extensions(config.extra_extensions.as_deref())?;
        Ok(Bootstrapper {
            config,
            extensions,
            home: expand_path("~"),
            runner: collaborators.runner,
            downloader: collaborators.downloader,
            tunneler: collaborators.tunneler,
            ports: collaborators.ports,
            drive: collaborators.drive,
            tunnel: None,
            disposed: false,
        })
    }

    #[cfg(test)]
    fn with_home(mut self, home: PathBuf) -> Self {
        self.home = home;
        self
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn public_url(&self) -> Option<&str> {
        self.tunnel.as_ref().map(|t| t.public_url.as_str())
    }

    /// Sets everything up, then serves until code-server exits.
    pub async fn run(&mut self) -> Result<SetupReport, BootstrapError> {
        let report = self.prepare().await?;
        self.serve().await?;
        Ok(report)
    }

    pub async fn prepare(&mut self) -> Result<SetupReport, BootstrapError> {
        let mut report = SetupReport::default();

        installer::install_code_server(
            self.downloader.as_ref(),
            self.runner.as_ref(),
            &self.config.work_dir,
        )
        .await?;
        report.extensions =
            extensions::install_extensions(self.runner.as_ref(), &self.extensions).await;

        let settings = Settings {
            work_dir: &self.config.work_dir,
            home: &self.home,
            prompt: self.config.prompt,
            zsh: self.config.zsh,
            packages: &self.config.packages,
        };
        let applied =
            settings::apply_settings(self.downloader.as_ref(), self.runner.as_ref(), &settings)
                .await?;
        report.templates = applied.templates;
        report.packages = applied.packages;

        report.public_url = Some(self.start_tunnel().await?);
        for failure in report.failures() {
            warn!("{} was not set up", failure.item);
        }
        info!("setup finished: {}", report);
        Ok(report)
    }

    /// Closes every tunnel the client already serves, then opens ours.
    async fn start_tunnel(&mut self) -> Result<String, BootstrapError> {
        for stale in self.tunneler.list().await? {
            info!("closing stale tunnel {} ({})", stale.name, stale.public_url);
            self.tunneler.close(&stale).await?;
        }
        let handle = self.tunneler.open(self.config.port).await?;
        println!("Code Server can be accessed on: {}", handle.public_url);
        info!("{} forwards to port {}", handle.name, handle.local_port);
        let url = handle.public_url.clone();
        self.tunnel = Some(handle);
        Ok(url)
    }

    pub async fn serve(&mut self) -> Result<(), BootstrapError> {
        server::free_port(self.ports.as_ref(), self.config.port);
        if self.config.mount_drive {
            match &self.drive {
                Some(drive) => {
                    let mount_point = drive.mount().await.map_err(BootstrapError::Drive)?;
                    println!("drive mounted at {}", mount_point.display());
                }
                None => warn!("drive mounting requested but no drive is configured, skipping"),
            }
        }
        let command = server::server_command(self.config.port, self.config.password.as_deref());
        server::stream_server(self.runner.as_ref(), &command).await?;
        Ok(())
    }

    /// Closes our tunnel and stops the tunneling client. Errors are logged,
    /// later calls do nothing.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(handle) = self.tunnel.take() {
            match self.tunneler.close(&handle).await {
                Ok(()) => info!("disconnected {}", handle.public_url),
                Err(e) => warn!("could not close {}: {}", handle.name, e),
            }
        }
        if let Err(e) = self.tunneler.shutdown().await {
            warn!("could not stop the tunneling client: {}", e);
        }
    }
}
