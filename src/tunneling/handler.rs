use crate::storage::Storage;

use super::{TunnelError, tunnel_runner::TunnelRunner};
use russh::{
    Channel,
    client::{self, Handler},
};
use tokio::sync::mpsc::Sender;
use tracing::info;

pub(super) struct ClientHandler {
    tx: Sender<(TunnelRunner, Channel<client::Msg>)>,
    to_addr: String,
    to_port: u16,
    /// these are needed for the server validation callback
    server_address: String,
    server_port: u16,
    storage: Box<dyn Storage>,
}
impl ClientHandler {
    pub fn new(
        to_addr: &str,
        to_port: u16,
        server_address: &str,
        server_port: u16,
        storage: Box<dyn Storage>,
        tx: Sender<(TunnelRunner, Channel<client::Msg>)>,
    ) -> Self {
        ClientHandler {
            tx,
            to_addr: to_addr.to_string(),
            to_port,
            server_address: server_address.to_string(),
            server_port,
            storage,
        }
    }
}
impl Handler for ClientHandler {
    type Error = TunnelError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let server_fingerprint = server_public_key
            .fingerprint(Default::default())
            .to_string();
        info!(
            "{}:{} got server key: {}",
            self.server_address, self.server_port, server_fingerprint
        );

        match self
            .storage
            .get_server_fingerprint(&self.server_address)
            .await
        {
            Ok(Some(stored_fingerprint)) => {
                if server_fingerprint != stored_fingerprint {
                    tracing::error!("{:?} host key has changed!", self.server_address);
                    return Err(TunnelError::NastyKey(self.server_address.clone()));
                }
                tracing::info!(
                    "host key for {:?} matches the stored one",
                    self.server_address
                );
                Ok(true)
            }
            Ok(None) => {
                // tofu: store the key!
                self.storage
                    .store_server_fingerprint(&self.server_address, &server_fingerprint)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                tracing::error!("{}", e.to_string());
                Err(TunnelError::StorageLayer(e.to_string()))
            }
        }
    }
    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<client::Msg>,
        _connected_address: &str,
        _connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let tunnel_runner = TunnelRunner::new(&self.to_addr, self.to_port);
        tracing::debug!(
            "incoming connection from {originator_address}:{originator_port} -> {}:{}",
            tunnel_runner.addr(),
            tunnel_runner.port()
        );
        // the relay session owner spawns the runner
        if self.tx.send((tunnel_runner, channel)).await.is_err() {
            tracing::warn!("tunnel to {} is closing, dropping connection", self.server_address);
        }
        Ok(())
    }
}
