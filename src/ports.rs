use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, get_sockets_info};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use thiserror::Error;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("could not list sockets: {0}")]
    Sockets(String),
}

#[cfg_attr(test, automock)]
pub(crate) trait PortReleaser: Send + Sync {
    /// Kills whatever holds `port` and returns the killed pids.
    fn release(&self, port: u16) -> Result<Vec<u32>, PortError>;
}

/// Finds port owners through the OS socket table.
pub(crate) struct SocketTable;

impl SocketTable {
    fn owners(port: u16) -> Result<Vec<u32>, PortError> {
        let af_flags = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
        let sockets = get_sockets_info(af_flags, ProtocolFlags::TCP)
            .map_err(|e| PortError::Sockets(e.to_string()))?;
        let own_pid = std::process::id();
        let mut pids: Vec<u32> = sockets
            .into_iter()
            .filter(|socket| match &socket.protocol_socket_info {
                ProtocolSocketInfo::Tcp(tcp) => tcp.local_port == port,
                ProtocolSocketInfo::Udp(_) => false,
            })
            .flat_map(|socket| socket.associated_pids)
            .filter(|pid| *pid != own_pid)
            .collect();
        pids.sort_unstable();
        pids.dedup();
        Ok(pids)
    }
}

impl PortReleaser for SocketTable {
    fn release(&self, port: u16) -> Result<Vec<u32>, PortError> {
        let mut killed = Vec::new();
        for pid in SocketTable::owners(port)? {
            let Ok(raw) = i32::try_from(pid) else {
                continue;
            };
            match kill(Pid::from_raw(raw), Signal::SIGKILL) {
                Ok(()) => killed.push(pid),
                Err(e) => warn!("could not kill {} holding port {}: {}", pid, port, e),
            }
        }
        Ok(killed)
    }
}
