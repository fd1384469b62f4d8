use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::config::{ConfigError, TunnelProvider, TunnelSettings};

mod handler;
mod ngrok;
mod relay;
mod tunnel_runner;

pub(crate) use ngrok::NgrokAgent;
pub(crate) use relay::SshRelay;

/// An open public tunnel. Returned by [`Tunneler::open`] and handed back to
/// [`Tunneler::close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelHandle {
    pub name: String,
    pub public_url: String,
    pub local_port: u16,
}

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("io error: {1}")]
    Io(std::io::Error, String),
    #[error("private key error: {1}")]
    PrivateKey(russh::keys::Error, String),
    #[error("ssh error: {1}")]
    Ssh(russh::Error, String),
    #[error("config error: {0}")]
    Config(String),
    #[error("storage layer error: {0}")]
    StorageLayer(String),
    #[error("{0:?} host key has changed!")]
    NastyKey(String),
    #[error("{0} rejected authentication for user {1}")]
    AuthRejected(String, String),
    #[error("ngrok agent failed to start: {0}")]
    AgentStart(String),
    #[error("ngrok api request failed: {0}")]
    AgentApi(String),
    #[error("no public url received from {0}")]
    NoPublicUrl(String),
    #[error("no tunnel named {0}")]
    UnknownTunnel(String),
}
impl From<std::io::Error> for TunnelError {
    fn from(value: std::io::Error) -> Self {
        let str = value.to_string();
        Self::Io(value, str)
    }
}
impl From<russh::keys::Error> for TunnelError {
    fn from(value: russh::keys::Error) -> Self {
        let str_val = value.to_string();
        Self::PrivateKey(value, str_val)
    }
}
impl From<russh::Error> for TunnelError {
    fn from(value: russh::Error) -> Self {
        let str_val = value.to_string();
        Self::Ssh(value, str_val)
    }
}
impl From<ConfigError> for TunnelError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
impl From<reqwest::Error> for TunnelError {
    fn from(value: reqwest::Error) -> Self {
        Self::AgentApi(value.to_string())
    }
}

/// A tunneling client. Every tunnel it opens is owned by the caller through
/// its [`TunnelHandle`].
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait Tunneler: Send {
    /// Tunnels currently served by this client.
    async fn list(&mut self) -> Result<Vec<TunnelHandle>, TunnelError>;
    /// Opens a public tunnel to `127.0.0.1:<port>`.
    async fn open(&mut self, port: u16) -> Result<TunnelHandle, TunnelError>;
    async fn close(&mut self, handle: &TunnelHandle) -> Result<(), TunnelError>;
    /// Closes everything and stops the client, `list` is empty afterwards.
    async fn shutdown(&mut self) -> Result<(), TunnelError>;
}

pub(crate) fn tunnel_name(port: u16) -> String {
    format!("codetun-{port}")
}

pub(crate) fn get_tunneler(settings: &TunnelSettings) -> Result<Box<dyn Tunneler>, TunnelError> {
    match settings.provider {
        TunnelProvider::Ngrok => Ok(Box::new(NgrokAgent::new(&settings.ngrok)?)),
        TunnelProvider::Ssh => Ok(Box::new(SshRelay::new(&settings.ssh)?)),
    }
}
