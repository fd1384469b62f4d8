use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    ports::PortReleaser,
    process::{CommandRunner, CommandSpec, ProcessError},
};

/// A blank password launches without authentication.
pub(crate) fn server_command(port: u16, password: Option<&str>) -> CommandSpec {
    let command = CommandSpec::new("code-server").args(["--port".to_string(), port.to_string()]);
    let command = match password.filter(|password| !password.is_empty()) {
        Some(password) => command.args(["--auth", "password"]).env("PASSWORD", password),
        None => command.args(["--auth", "none"]),
    };
    command.arg("--disable-telemetry")
}

/// Kills whatever listens on `port`. Never fails, code-server reports the
/// bind error itself if the port is still taken.
pub(crate) fn free_port(ports: &dyn PortReleaser, port: u16) {
    match ports.release(port) {
        Ok(killed) if killed.is_empty() => info!("port {} is free", port),
        Ok(killed) => info!("killed {:?} holding port {}", killed, port),
        Err(e) => warn!("could not free port {}: {}", port, e),
    }
}

/// Launches the server and relays its stdout to ours until it exits.
pub(crate) async fn stream_server(
    runner: &dyn CommandRunner,
    command: &CommandSpec,
) -> Result<(), ProcessError> {
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let relay = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("{line}");
        }
    });
    info!("launching {}", command);
    let code = runner.stream(command, tx).await;
    // the sender is gone once stream returns, the relay drains and stops
    let _ = relay.await;
    match code? {
        Some(code) if code != 0 => Err(ProcessError::Failed {
            command: command.to_string(),
            code: Some(code),
            stderr: String::new(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ports::{MockPortReleaser, PortError},
        process::MockCommandRunner,
    };
    use mockall::predicate::*;

    #[test]
    fn password_enables_password_auth() {
        let command = server_command(10000, Some("hunter2"));
        assert_eq!(command.program, "code-server");
        assert_eq!(
            command.args,
            vec!["--port", "10000", "--auth", "password", "--disable-telemetry"]
        );
        assert_eq!(command.env_var("PASSWORD"), Some("hunter2"));
        assert!(!command.has_arg("none"));
        assert_eq!(
            command.to_string(),
            "PASSWORD=*** code-server --port 10000 --auth password --disable-telemetry"
        );
    }

    #[test]
    fn no_password_disables_auth() {
        let command = server_command(8443, None);
        assert_eq!(
            command.args,
            vec!["--port", "8443", "--auth", "none", "--disable-telemetry"]
        );
        assert_eq!(command.env_var("PASSWORD"), None);
        assert!(command.env.is_empty());
    }

    #[test]
    fn empty_password_disables_auth() {
        let command = server_command(10000, Some(""));
        assert!(command.has_arg("none"));
        assert!(!command.has_arg("password"));
        assert_eq!(command.env_var("PASSWORD"), None);
    }

    #[test]
    fn port_release_failure_is_not_fatal() {
        let mut ports = MockPortReleaser::new();
        ports
            .expect_release()
            .with(eq(10000))
            .times(1)
            .returning(|_| Err(PortError::Sockets("permission denied".to_string())));
        free_port(&ports, 10000);
    }

    #[tokio::test]
    async fn server_output_is_relayed() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_stream()
            .withf(|c, _| c.program == "code-server")
            .times(1)
            .returning(|_, lines| {
                lines
                    .try_send("HTTP server listening on http://127.0.0.1:10000/".to_string())
                    .unwrap();
                Ok(Some(0))
            });
        stream_server(&runner, &server_command(10000, None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let mut runner = MockCommandRunner::new();
        runner.expect_stream().times(1).returning(|_, _| Ok(Some(1)));
        let result = stream_server(&runner, &server_command(10000, None)).await;
        assert!(matches!(result, Err(ProcessError::Failed { code: Some(1), .. })));
    }

    #[tokio::test]
    async fn interrupted_server_is_not_an_error() {
        let mut runner = MockCommandRunner::new();
        runner.expect_stream().times(1).returning(|_, _| Ok(None));
        stream_server(&runner, &server_command(10000, None))
            .await
            .unwrap();
    }
}
