use std::{fmt, process::Stdio};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::mpsc::Sender,
};

#[cfg(test)]
use mockall::automock;

/// A subprocess invocation. Kept as plain data so launched commands can be
/// inspected before (or instead of) running them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}
impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
    #[cfg(test)]
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
    #[cfg(test)]
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
/// Env values are left out, they may carry the password.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, _) in &self.env {
            write!(f, "{key}=*** ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}
impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to start `{0}`: {1}")]
    Spawn(String, String),
    #[error("io error while running `{0}`: {1}")]
    Io(String, String),
    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => String::from("a signal"),
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait CommandRunner: Send + Sync {
    /// Runs to completion, capturing stdout and stderr.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ProcessError>;
    /// Runs to completion, sending every stdout line to `lines` as it is
    /// printed. stderr goes straight to ours. Returns the exit code.
    async fn stream(
        &self,
        command: &CommandSpec,
        lines: Sender<String>,
    ) -> Result<Option<i32>, ProcessError>;
}

/// Runs `command` and turns a non-zero exit into an error carrying the tool's stderr.
pub(crate) async fn run_checked(
    runner: &dyn CommandRunner,
    command: &CommandSpec,
) -> Result<CommandOutput, ProcessError> {
    let output = runner.run(command).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(ProcessError::Failed {
            command: command.to_string(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

pub(crate) struct SystemRunner;

impl SystemRunner {
    fn command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().cloned())
            .stdin(Stdio::null());
        command
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        tracing::debug!("running {}", command);
        let output = SystemRunner::command(command)
            .output()
            .await
            .map_err(|e| ProcessError::Spawn(command.to_string(), e.to_string()))?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn stream(
        &self,
        command: &CommandSpec,
        lines: Sender<String>,
    ) -> Result<Option<i32>, ProcessError> {
        tracing::debug!("launching {}", command);
        let mut child = SystemRunner::command(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::Spawn(command.to_string(), e.to_string()))?;

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout).lines();
            while let Some(line) = reader
                .next_line()
                .await
                .map_err(|e| ProcessError::Io(command.to_string(), e.to_string()))?
            {
                if lines.send(line).await.is_err() {
                    break;
                }
            }
        }
        let status = child
            .wait()
            .await
            .map_err(|e| ProcessError::Io(command.to_string(), e.to_string()))?;
        Ok(status.code())
    }
}
