//! Tunnels through a local ngrok agent, driven over the agent's REST api.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
    process::{Child, Command},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::config::{EnvOrValue, NgrokConfig};

use super::{TunnelError, TunnelHandle, Tunneler, tunnel_name};

const AGENT_START_TIMEOUT: Duration = Duration::from_secs(15);
const API_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct NgrokAgent {
    binary: String,
    auth_token: Option<String>,
    region: Option<String>,
    /// where an already running agent would answer
    api_addr: String,
    http: reqwest::Client,
    /// base url of the agent api once an agent is up
    api: Option<String>,
    /// only set when we spawned the agent ourselves
    process: Option<Child>,
    log_drain: Option<JoinHandle<()>>,
    stopped: bool,
}

#[derive(Deserialize, Debug)]
struct TunnelList {
    tunnels: Vec<ApiTunnel>,
}
#[derive(Deserialize, Debug)]
struct ApiTunnel {
    name: String,
    public_url: String,
    config: ApiTunnelConfig,
}
#[derive(Deserialize, Debug)]
struct ApiTunnelConfig {
    addr: String,
}
#[derive(Serialize, Debug)]
struct StartTunnel<'a> {
    name: &'a str,
    addr: String,
    proto: &'a str,
}
#[derive(Deserialize, Debug)]
struct ApiError {
    msg: String,
}
/// One line of the agent's `--log-format json` output.
#[derive(Deserialize, Debug)]
struct AgentLog {
    #[serde(default)]
    lvl: String,
    #[serde(default)]
    msg: String,
    addr: Option<String>,
    err: Option<String>,
}

impl From<ApiTunnel> for TunnelHandle {
    fn from(tunnel: ApiTunnel) -> Self {
        TunnelHandle {
            local_port: port_of(&tunnel.config.addr),
            name: tunnel.name,
            public_url: tunnel.public_url,
        }
    }
}

impl NgrokAgent {
    pub fn new(config: &NgrokConfig) -> Result<Self, TunnelError> {
        let auth_token = config
            .auth_token
            .as_ref()
            .map(EnvOrValue::resolve)
            .transpose()?;
        let http = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;
        Ok(NgrokAgent {
            binary: config.binary.clone(),
            auth_token,
            region: config.region.clone(),
            api_addr: config.api_addr.clone(),
            http,
            api: None,
            process: None,
            log_drain: None,
            stopped: false,
        })
    }

    async fn ensure_agent(&mut self) -> Result<String, TunnelError> {
        if let Some(api) = &self.api {
            return Ok(api.clone());
        }
        let configured = format!("http://{}", self.api_addr);
        let running = self
            .http
            .get(format!("{configured}/api/tunnels"))
            .send()
            .await
            .is_ok_and(|response| response.status().is_success());
        let api = if running {
            info!("reusing the ngrok agent at {}", self.api_addr);
            configured
        } else {
            self.spawn_agent().await?
        };
        self.api = Some(api.clone());
        Ok(api)
    }

    async fn spawn_agent(&mut self) -> Result<String, TunnelError> {
        let mut command = Command::new(&self.binary);
        command.args(["start", "--none", "--log", "stdout", "--log-format", "json"]);
        if let Some(region) = &self.region {
            command.args(["--region", region.as_str()]);
        }
        if let Some(token) = &self.auth_token {
            command.env("NGROK_AUTHTOKEN", token);
        }
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TunnelError::AgentStart(format!("could not run {}: {}", self.binary, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TunnelError::AgentStart(String::from("agent stdout unavailable")))?;

        let mut lines = BufReader::new(stdout).lines();
        let addr = match tokio::time::timeout(AGENT_START_TIMEOUT, wait_for_web_service(&mut lines))
            .await
        {
            Ok(addr) => addr?,
            Err(_) => {
                return Err(TunnelError::AgentStart(format!(
                    "no web service after {}s",
                    AGENT_START_TIMEOUT.as_secs()
                )));
            }
        };
        info!("ngrok agent started, api on {}", addr);

        self.log_drain = Some(tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "ngrok", "{}", line);
            }
        }));
        self.process = Some(child);
        Ok(format!("http://{addr}"))
    }
}

#[async_trait]
impl Tunneler for NgrokAgent {
    async fn list(&mut self) -> Result<Vec<TunnelHandle>, TunnelError> {
        if self.stopped {
            return Ok(Vec::new());
        }
        let api = self.ensure_agent().await?;
        let response = self.http.get(format!("{api}/api/tunnels")).send().await?;
        let list: TunnelList = check(response).await?.json().await?;
        Ok(list.tunnels.into_iter().map(TunnelHandle::from).collect())
    }

    async fn open(&mut self, port: u16) -> Result<TunnelHandle, TunnelError> {
        self.stopped = false;
        let api = self.ensure_agent().await?;
        let name = tunnel_name(port);
        let body = StartTunnel {
            name: &name,
            addr: port.to_string(),
            proto: "http",
        };
        let response = self
            .http
            .post(format!("{api}/api/tunnels"))
            .json(&body)
            .send()
            .await?;
        let tunnel: ApiTunnel = check(response).await?.json().await?;
        info!("tunnel {} open on {}", tunnel.name, tunnel.public_url);
        Ok(tunnel.into())
    }

    async fn close(&mut self, handle: &TunnelHandle) -> Result<(), TunnelError> {
        let Some(api) = self.api.clone() else {
            return Err(TunnelError::UnknownTunnel(handle.name.clone()));
        };
        let response = self
            .http
            .delete(format!("{api}/api/tunnels/{}", handle.name))
            .send()
            .await?;
        check(response).await?;
        info!("disconnected {}", handle.public_url);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TunnelError> {
        if self.process.is_none() && self.api.is_some() {
            // an agent we did not start keeps running, only its tunnels go
            for tunnel in self.list().await? {
                self.close(&tunnel).await?;
            }
        }
        if let Some(mut child) = self.process.take() {
            child.kill().await?;
            info!("ngrok agent stopped");
        }
        if let Some(drain) = self.log_drain.take() {
            drain.abort();
        }
        self.api = None;
        self.stopped = true;
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, TunnelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let reason = serde_json::from_str::<ApiError>(&body)
        .map(|e| e.msg)
        .unwrap_or(body);
    Err(TunnelError::AgentApi(format!("{status}: {}", reason.trim())))
}

/// Reads agent log lines until the api address shows up.
async fn wait_for_web_service<R>(lines: &mut Lines<R>) -> Result<String, TunnelError>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        debug!(target: "ngrok", "{}", line);
        let Ok(log) = serde_json::from_str::<AgentLog>(&line) else {
            continue;
        };
        if matches!(log.lvl.as_str(), "eror" | "crit") {
            return Err(TunnelError::AgentStart(log.err.unwrap_or(log.msg)));
        }
        if log.msg == "starting web service" {
            if let Some(addr) = log.addr {
                return Ok(addr);
            }
        }
    }
    Err(TunnelError::AgentStart(String::from(
        "ngrok exited before starting its web service",
    )))
}

/// "http://localhost:10000" -> 10000
fn port_of(addr: &str) -> u16 {
    addr.trim_end_matches('/')
        .rsplit(':')
        .next()
        .and_then(|port| port.parse().ok())
        .unwrap_or(0)
}
