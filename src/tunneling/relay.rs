use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use russh::{
    Channel, ChannelMsg, Disconnect, client,
    keys::{PrivateKey, PrivateKeyWithHashAlg, load_secret_key},
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    config::{EnvOrValue, SshRelayConfig, expand_path},
    storage::{Storage, local::LocalStorage},
};

use super::{TunnelError, TunnelHandle, Tunneler, handler::ClientHandler, tunnel_name};

const URL_TIMEOUT: Duration = Duration::from_secs(20);

/// Reverse tunnel through an ssh relay such as localhost.run: the relay binds a
/// public endpoint with `tcpip-forward` and prints the url on the shell channel.
pub(crate) struct SshRelay {
    /// public address of the relay
    remote_ssh_address: String,
    remote_ssh_port: u16,
    remote_ssh_user: String,
    /// `none` authentication is used when absent
    private_key: Option<PrivateKey>,
    /// which interface the relay should bind on its side
    remote_interface_address: String,
    remote_interface_port: u16,
    known_hosts_db: PathBuf,
    sessions: Vec<RelaySession>,
}

struct RelaySession {
    handle: TunnelHandle,
    session: client::Handle<ClientHandler>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelaySession {
    async fn close(self, interface_address: &str, interface_port: u16) -> Result<(), TunnelError> {
        if let Err(e) = self
            .session
            .cancel_tcpip_forward(interface_address, interface_port as u32)
            .await
        {
            warn!("could not cancel forwarding for {}: {e}", self.handle.name);
        }
        for task in &self.tasks {
            task.abort();
        }
        self.session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        info!("closed tunnel {}", self.handle.name);
        Ok(())
    }
}

impl SshRelay {
    pub fn new(config: &SshRelayConfig) -> Result<SshRelay, TunnelError> {
        let private_key =
            SshRelay::load_private_key(&config.private_key_path, &config.private_key_passphrase)?;
        Ok(SshRelay {
            remote_ssh_address: config.remote_ssh_address.clone(),
            remote_ssh_port: config.remote_ssh_port,
            remote_ssh_user: config.remote_ssh_user.clone(),
            private_key,
            remote_interface_address: config.remote_interface_address.clone(),
            remote_interface_port: config.remote_interface_port,
            known_hosts_db: expand_path(&config.known_hosts_db),
            sessions: Vec::new(),
        })
    }

    fn load_private_key(
        key_path: &Option<String>,
        passphrase: &Option<EnvOrValue>,
    ) -> Result<Option<PrivateKey>, TunnelError> {
        let Some(key_path) = key_path else {
            return Ok(None);
        };
        let passphrase = passphrase.as_ref().map(EnvOrValue::resolve).transpose()?;
        Ok(Some(load_secret_key(
            expand_path(key_path),
            passphrase.as_deref(),
        )?))
    }

    async fn authenticate(
        &self,
        session: &mut client::Handle<ClientHandler>,
    ) -> Result<(), TunnelError> {
        let auth_result = match &self.private_key {
            Some(key) => {
                let hash_alg = session.best_supported_rsa_hash().await?.flatten();
                session
                    .authenticate_publickey(
                        self.remote_ssh_user.clone(),
                        PrivateKeyWithHashAlg::new(Arc::new(key.clone()), hash_alg),
                    )
                    .await?
            }
            None => {
                session
                    .authenticate_none(self.remote_ssh_user.clone())
                    .await?
            }
        };
        if !auth_result.success() {
            return Err(TunnelError::AuthRejected(
                self.remote_ssh_address.clone(),
                self.remote_ssh_user.clone(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Tunneler for SshRelay {
    async fn list(&mut self) -> Result<Vec<TunnelHandle>, TunnelError> {
        Ok(self.sessions.iter().map(|s| s.handle.clone()).collect())
    }

    async fn open(&mut self, port: u16) -> Result<TunnelHandle, TunnelError> {
        let storage = LocalStorage::new(&self.known_hosts_db)?;
        storage.ensure().await?;

        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        let config = Arc::new(client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let mut session = client::connect(
            config,
            (self.remote_ssh_address.to_owned(), self.remote_ssh_port),
            ClientHandler::new(
                "127.0.0.1",
                port,
                &self.remote_ssh_address,
                self.remote_ssh_port,
                Box::new(storage),
                tx,
            ),
        )
        .await?;
        self.authenticate(&mut session).await?;

        // asks the relay to bind the public side
        session
            .tcpip_forward(
                self.remote_interface_address.to_owned(),
                self.remote_interface_port as u32,
            )
            .await?;
        let mut banner = session.channel_open_session().await?;
        banner.request_shell(true).await?;

        let public_url = tokio::time::timeout(
            URL_TIMEOUT,
            read_public_url(&mut banner, &self.remote_ssh_address),
        )
        .await
        .map_err(|_| TunnelError::NoPublicUrl(self.remote_ssh_address.clone()))??;

        let relay = self.remote_ssh_address.clone();
        let drain = tokio::spawn(async move {
            while let Some(msg) = banner.wait().await {
                if let ChannelMsg::Data { data } = msg {
                    debug!("{relay}: {}", String::from_utf8_lossy(&data).trim_end());
                }
            }
        });
        let forward = tokio::spawn(async move {
            while let Some((runner, channel)) = rx.recv().await {
                tokio::spawn(async move {
                    match runner.run(channel).await {
                        Ok((received, sent)) => {
                            debug!("connection closed: {received} bytes in, {sent} bytes out")
                        }
                        Err(e) => warn!("forwarded connection failed: {e}"),
                    }
                });
            }
        });

        let handle = TunnelHandle {
            name: tunnel_name(port),
            public_url,
            local_port: port,
        };
        info!("tunnel {} is up at {}", handle.name, handle.public_url);
        self.sessions.push(RelaySession {
            handle: handle.clone(),
            session,
            tasks: vec![drain, forward],
        });
        Ok(handle)
    }

    async fn close(&mut self, handle: &TunnelHandle) -> Result<(), TunnelError> {
        let Some(index) = self.sessions.iter().position(|s| s.handle == *handle) else {
            return Err(TunnelError::UnknownTunnel(handle.name.clone()));
        };
        let session = self.sessions.remove(index);
        session
            .close(&self.remote_interface_address, self.remote_interface_port)
            .await
    }

    async fn shutdown(&mut self) -> Result<(), TunnelError> {
        let sessions = std::mem::take(&mut self.sessions);
        let results = join_all(
            sessions
                .into_iter()
                .map(|s| s.close(&self.remote_interface_address, self.remote_interface_port)),
        )
        .await;
        results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }
}

async fn read_public_url(
    channel: &mut Channel<client::Msg>,
    relay: &str,
) -> Result<String, TunnelError> {
    let mut pending = String::new();
    while let Some(msg) = channel.wait().await {
        let data = match msg {
            ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. } => data,
            ChannelMsg::Eof | ChannelMsg::Close => break,
            _ => continue,
        };
        pending.push_str(&String::from_utf8_lossy(&data));
        while let Some(newline) = pending.find('\n') {
            let line: String = pending.drain(..=newline).collect();
            debug!("{relay}: {}", line.trim_end());
            if let Some(url) = public_url_in(&line) {
                return Ok(url);
            }
        }
    }
    public_url_in(&pending).ok_or_else(|| TunnelError::NoPublicUrl(relay.to_string()))
}

/// Picks the public url out of a relay banner line.
fn public_url_in(line: &str) -> Option<String> {
    if !(line.contains("tunneled") || line.contains("Forwarding")) {
        return None;
    }
    line.split(|c: char| c.is_whitespace() || c == '\x1b')
        .filter(|token| token.starts_with("https://"))
        .last()
        .map(|token| {
            token
                .trim_end_matches(|c: char| matches!(c, ',' | '.' | ';' | ')'))
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_from_localhost_run_banner() {
        let line = "7f3a2c1b9e.lhr.life tunneled with tls termination, https://7f3a2c1b9e.lhr.life\r\n";
        assert_eq!(
            public_url_in(line).as_deref(),
            Some("https://7f3a2c1b9e.lhr.life")
        );
    }

    #[test]
    fn url_from_colored_forwarding_line() {
        let line = "\x1b[32mForwarding HTTP traffic from https://quick.serveo.net\x1b[0m\n";
        assert_eq!(
            public_url_in(line).as_deref(),
            Some("https://quick.serveo.net")
        );
    }

    #[test]
    fn unrelated_lines_carry_no_url() {
        assert_eq!(public_url_in("Welcome to localhost.run!"), None);
        assert_eq!(public_url_in("docs at https://localhost.run/docs"), None);
        assert_eq!(public_url_in("tunneled but no url yet"), None);
    }

    #[tokio::test]
    async fn fresh_relay_has_nothing_to_tear_down() {
        let mut relay = SshRelay::new(&SshRelayConfig::default()).unwrap();
        assert!(relay.private_key.is_none());
        assert!(relay.list().await.unwrap().is_empty());
        relay.shutdown().await.unwrap();
        relay.shutdown().await.unwrap();
        assert!(relay.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closing_an_unknown_tunnel_fails() {
        let mut relay = SshRelay::new(&SshRelayConfig::default()).unwrap();
        let handle = TunnelHandle {
            name: tunnel_name(10000),
            public_url: "https://7f3a2c1b9e.lhr.life".to_string(),
            local_port: 10000,
        };
        let result = relay.close(&handle).await;
        assert!(matches!(result, Err(TunnelError::UnknownTunnel(name)) if name == "codetun-10000"));
    }

    #[test]
    fn missing_private_key_is_reported() {
        let config = SshRelayConfig {
            private_key_path: Some("/nonexistent/codetun/id_ed25519".to_string()),
            ..Default::default()
        };
        let result = SshRelay::new(&config);
        assert!(matches!(result, Err(TunnelError::PrivateKey(_, _))));
    }
}
