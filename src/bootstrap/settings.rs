//! Shell prompt, editor settings and OS packages.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    config::PromptTheme,
    download::Downloader,
    process::{CommandRunner, CommandSpec, run_checked},
};

use super::{
    BootstrapError,
    installer::{OH_MY_BASH_INSTALLER, OH_MY_BASH_INSTALLER_URL, fetch_and_run},
    report::StepOutcome,
};

const SET_THEME_SCRIPT: &str = include_str!("../../templates/set_theme.sh");
const GET_ZSH_SCRIPT: &str = include_str!("../../templates/get_zsh.sh");

/// A file shipped inside the binary and written below the home directory.
pub(crate) struct Template {
    pub name: &'static str,
    pub contents: &'static str,
    /// relative to the home directory
    pub destination: &'static str,
}

pub(crate) const TEMPLATES: [Template; 3] = [
    Template {
        name: "settings.json",
        contents: include_str!("../../templates/settings.json"),
        destination: ".local/share/code-server/User/settings.json",
    },
    Template {
        name: "coder.json",
        contents: include_str!("../../templates/coder.json"),
        destination: ".local/share/code-server/coder.json",
    },
    Template {
        name: ".undu-powerline.bash",
        contents: include_str!("../../templates/.undu-powerline.bash"),
        destination: ".powerline.bash",
    },
];

pub(crate) struct Settings<'a> {
    pub work_dir: &'a Path,
    pub home: &'a Path,
    pub prompt: PromptTheme,
    pub zsh: bool,
    pub packages: &'a [String],
}

#[derive(Debug, Default)]
pub(crate) struct SettingsOutcome {
    pub templates: Vec<StepOutcome>,
    pub packages: Vec<StepOutcome>,
}

/// oh-my-bash, zsh and the theme are required. Templates and packages are not.
pub(crate) async fn apply_settings(
    downloader: &dyn Downloader,
    runner: &dyn CommandRunner,
    settings: &Settings<'_>,
) -> Result<SettingsOutcome, BootstrapError> {
    fetch_and_run(
        downloader,
        runner,
        OH_MY_BASH_INSTALLER_URL,
        &settings.work_dir.join(OH_MY_BASH_INSTALLER),
        &["--unattended"],
    )
    .await?;

    if settings.zsh {
        let script = write_helper(settings.work_dir, "get_zsh.sh", GET_ZSH_SCRIPT).await?;
        info!("installing zsh");
        run_checked(runner, &CommandSpec::new("sh").arg(script.to_string_lossy())).await?;
    }

    let script = write_helper(settings.work_dir, "set_theme.sh", SET_THEME_SCRIPT).await?;
    info!("setting prompt theme {}", settings.prompt.as_str());
    run_checked(
        runner,
        &CommandSpec::new("sh")
            .arg(script.to_string_lossy())
            .arg(settings.prompt.as_str()),
    )
    .await?;

    let templates = copy_templates(settings.home).await;
    let packages = install_packages(runner, settings.packages).await;
    Ok(SettingsOutcome {
        templates,
        packages,
    })
}

async fn write_helper(work_dir: &Path, name: &str, contents: &str) -> Result<PathBuf, BootstrapError> {
    let path = work_dir.join(name);
    let io_err = |e: std::io::Error| BootstrapError::Io(path.display().to_string(), e.to_string());
    tokio::fs::create_dir_all(work_dir).await.map_err(io_err)?;
    tokio::fs::write(&path, contents).await.map_err(io_err)?;
    Ok(path)
}

pub(crate) async fn copy_templates(home: &Path) -> Vec<StepOutcome> {
    let mut outcomes = Vec::with_capacity(TEMPLATES.len());
    for template in &TEMPLATES {
        let destination = home.join(template.destination);
        let result = write_template(&destination, template.contents).await;
        if result.is_ok() {
            info!("{} -> {}", template.name, destination.display());
        }
        outcomes.push(StepOutcome::from_result(template.name, result));
    }
    outcomes
}

async fn write_template(destination: &Path, contents: &str) -> Result<(), std::io::Error> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(destination, contents).await
}

pub(crate) async fn install_packages(
    runner: &dyn CommandRunner,
    packages: &[String],
) -> Vec<StepOutcome> {
    if packages.is_empty() {
        return Vec::new();
    }
    if let Err(e) = run_checked(runner, &CommandSpec::new("apt-get").arg("update")).await {
        warn!("package index refresh failed: {}", e);
    }
    let mut outcomes = Vec::with_capacity(packages.len());
    for package in packages {
        let command = CommandSpec::new("apt-get")
            .args(["install", "-y"])
            .arg(package);
        let result = run_checked(runner, &command).await;
        outcomes.push(StepOutcome::from_result(package, result));
    }
    outcomes
}
