//! Download-once installer scripts.

use std::path::Path;

use tracing::info;

use crate::{
    download::{Downloader, fetch_if_missing},
    process::{CommandRunner, CommandSpec, run_checked},
};

use super::BootstrapError;

pub(crate) const CODE_SERVER_INSTALLER_URL: &str = "https://code-server.dev/install.sh";
pub(crate) const CODE_SERVER_INSTALLER: &str = "code-server-install.sh";
pub(crate) const OH_MY_BASH_INSTALLER_URL: &str =
    "https://raw.githubusercontent.com/ohmybash/oh-my-bash/master/tools/install.sh";
pub(crate) const OH_MY_BASH_INSTALLER: &str = "install_ohmybash.sh";

/// Fetches `url` into `work_dir/script` unless it is cached there, then runs
/// it with `sh`.
pub(crate) async fn fetch_and_run(
    downloader: &dyn Downloader,
    runner: &dyn CommandRunner,
    url: &str,
    script: &Path,
    args: &[&str],
) -> Result<(), BootstrapError> {
    fetch_if_missing(downloader, url, script).await?;
    info!("running {}", script.display());
    let command = CommandSpec::new("sh")
        .arg(script.to_string_lossy())
        .args(args.iter().copied());
    run_checked(runner, &command).await?;
    Ok(())
}

pub(crate) async fn install_code_server(
    downloader: &dyn Downloader,
    runner: &dyn CommandRunner,
    work_dir: &Path,
) -> Result<(), BootstrapError> {
    fetch_and_run(
        downloader,
        runner,
        CODE_SERVER_INSTALLER_URL,
        &work_dir.join(CODE_SERVER_INSTALLER),
        &[],
    )
    .await
}
