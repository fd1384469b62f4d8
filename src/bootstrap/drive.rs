use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use crate::{
    config::{ConfigError, DriveConfig, expand_path},
    process::{CommandRunner, CommandSpec, ProcessError, run_checked},
};

/// Mounts external storage before the server starts. Having one is what
/// enables `mount_drive`.
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait DriveMounter: Send + Sync {
    /// Returns the mount point.
    async fn mount(&self) -> Result<PathBuf, ProcessError>;
}

/// Runs a configured mount command, e.g. a FUSE client.
pub(crate) struct CommandMounter {
    mount_point: PathBuf,
    command: CommandSpec,
    runner: Arc<dyn CommandRunner>,
}
impl CommandMounter {
    pub fn new(config: &DriveConfig, runner: Arc<dyn CommandRunner>) -> Result<Self, ConfigError> {
        let Some((program, args)) = config.command.split_first() else {
            return Err(ConfigError::InvalidDrive(
                "drive.command must not be empty".to_string(),
            ));
        };
        Ok(CommandMounter {
            mount_point: expand_path(&config.mount_point),
            command: CommandSpec::new(program).args(args.iter().cloned()),
            runner,
        })
    }
}

#[async_trait]
impl DriveMounter for CommandMounter {
    async fn mount(&self) -> Result<PathBuf, ProcessError> {
        tokio::fs::create_dir_all(&self.mount_point)
            .await
            .map_err(|e| ProcessError::Io(self.command.to_string(), e.to_string()))?;
        run_checked(self.runner.as_ref(), &self.command).await?;
        info!("drive mounted on {}", self.mount_point.display());
        Ok(self.mount_point.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, MockCommandRunner};

    #[test]
    fn empty_command_is_rejected() {
        let config = DriveConfig {
            mount_point: "/content/drive".to_string(),
            command: vec![],
        };
        let runner: Arc<dyn CommandRunner> = Arc::new(MockCommandRunner::new());
        assert!(matches!(
            CommandMounter::new(&config, runner),
            Err(ConfigError::InvalidDrive(_))
        ));
    }

    #[tokio::test]
    async fn mount_creates_the_mount_point_and_runs_the_command() {
        let root = tempfile::tempdir().unwrap();
        let mount_point = root.path().join("drive");
        let config = DriveConfig {
            mount_point: mount_point.to_string_lossy().into_owned(),
            command: vec![
                "rclone".to_string(),
                "mount".to_string(),
                "gdrive:".to_string(),
                mount_point.to_string_lossy().into_owned(),
                "--daemon".to_string(),
            ],
        };
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|c| c.program == "rclone" && c.has_arg("--daemon"))
            .times(1)
            .returning(|_| {
                Ok(CommandOutput {
                    code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            });

        let mounter = CommandMounter::new(&config, Arc::new(runner)).unwrap();
        assert_eq!(mounter.mount().await.unwrap(), mount_point);
        assert!(mount_point.is_dir());
    }
}
