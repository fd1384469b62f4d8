use std::{path::Path, sync::Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use super::{Storage, StorageError};
pub struct LocalStorage {
    connection: Mutex<Connection>,
}
impl LocalStorage {
    pub fn new(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Io(parent.display().to_string(), e.to_string()))?;
        }
        Ok(LocalStorage {
            connection: Mutex::new(Connection::open(db_path)?),
        })
    }
    #[cfg(test)]
    fn in_memory() -> Result<Self, StorageError> {
        Ok(LocalStorage {
            connection: Mutex::new(Connection::open_in_memory()?),
        })
    }
}
#[async_trait]
impl Storage for LocalStorage {
    async fn get_server_fingerprint(&self, address: &str) -> Result<Option<String>, StorageError> {
        let conn = self.connection.lock().map_err(|_| StorageError::Poisoned)?;
        let fingerprint = conn
            .query_row(
                "select fingerprint from known_hosts where hostname = ?1",
                [address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fingerprint)
    }
    async fn store_server_fingerprint(
        &self,
        address: &str,
        fingerprint: &str,
    ) -> Result<(), StorageError> {
        let conn = self.connection.lock().map_err(|_| StorageError::Poisoned)?;
        tracing::info!("storing fingerprint for {:?}", address);
        conn.execute(
            "insert into known_hosts values (?1, ?2)",
            (address, fingerprint),
        )?;
        Ok(())
    }
    async fn ensure(&self) -> Result<(), StorageError> {
        let conn = self.connection.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute(r#"
            create table if not exists known_hosts(hostname varchar(255) primary key, fingerprint varchar(255) not null);
        "#, ())?;
        Ok(())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        let str_value = value.to_string();
        StorageError::LocalSqlite(value, str_value)
    }
}
