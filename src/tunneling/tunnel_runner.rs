use russh::{Channel, client};
use tokio::net::TcpStream;

use super::TunnelError;

/// Bridges one connection forwarded by the relay to the local service.
pub(super) struct TunnelRunner {
    to_addr: String,
    to_port: u16,
}
impl TunnelRunner {
    pub fn new(to_addr: &str, to_port: u16) -> Self {
        TunnelRunner {
            to_addr: to_addr.to_string(),
            to_port,
        }
    }
    pub fn addr(&self) -> &str {
        &self.to_addr
    }
    pub fn port(&self) -> u16 {
        self.to_port
    }
    /// Copies both ways until either side closes. Returns (bytes in, bytes out).
    pub async fn run(self, channel: Channel<client::Msg>) -> Result<(u64, u64), TunnelError> {
        let mut local = TcpStream::connect((self.to_addr.as_str(), self.to_port)).await?;
        let mut remote = channel.into_stream();
        Ok(tokio::io::copy_bidirectional(&mut remote, &mut local).await?)
    }
}
