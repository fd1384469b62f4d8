use tracing::info;

use crate::{
    config::ConfigError,
    process::{CommandRunner, CommandSpec, run_checked},
};

use super::report::StepOutcome;

pub(crate) const DEFAULT_EXTENSIONS: [&str; 10] = [
    "ms-python.python",
    "jithurjacob.nbpreviewer",
    "njpwerner.autodocstring",
    "ms-python.vscode-pylance",
    "ms-vscode-remote.remote-wsl",
    "ms-python.anaconda-extension-pack",
    "donjayamanne.githistory",
    "bee.git-temporal-vscode",
    "kiteco.kite",
    "vscode-icons-team.vscode-icons",
];

/// Defaults first, then `extra` in the given order. Duplicates are kept.
pub(crate) fn merge_extensions(extra: Option<&[String]>) -> Result<Vec<String>, ConfigError> {
    let mut extensions: Vec<String> = DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    for extension in extra.unwrap_or_default() {
        if extension.trim().is_empty() {
            return Err(ConfigError::InvalidExtension(extension.clone()));
        }
        extensions.push(extension.clone());
    }
    Ok(extensions)
}

pub(crate) async fn install_extensions(
    runner: &dyn CommandRunner,
    extensions: &[String],
) -> Vec<StepOutcome> {
    let mut outcomes = Vec::with_capacity(extensions.len());
    for extension in extensions {
        info!("installing extension {}", extension);
        let command = CommandSpec::new("code-server")
            .arg("--install-extension")
            .arg(extension);
        let result = run_checked(runner, &command).await;
        outcomes.push(StepOutcome::from_result(extension, result));
    }
    outcomes
}
