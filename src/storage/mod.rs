use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::tunneling::TunnelError;
pub(crate) mod local;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite returned an error: {1}")]
    LocalSqlite(rusqlite::Error, String),
    #[error("could not create {0}: {1}")]
    Io(String, String),
    #[error("known hosts connection poisoned")]
    Poisoned,
}

/// Pinned relay host keys, trust on first use.
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait Storage: Send + Sync {
    async fn get_server_fingerprint(&self, address: &str) -> Result<Option<String>, StorageError>;
    async fn store_server_fingerprint(
        &self,
        address: &str,
        fingerprint: &str,
    ) -> Result<(), StorageError>;
    async fn ensure(&self) -> Result<(), StorageError>;
}

impl From<StorageError> for TunnelError {
    fn from(err: StorageError) -> Self {
        TunnelError::StorageLayer(err.to_string())
    }
}
