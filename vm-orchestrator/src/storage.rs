//! Last known machine state, kept across restarts.

use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use vm_provider::MachineState;

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, path: &Path) -> Result<Option<MachineState>>;

    async fn set(&self, path: &Path, state: MachineState) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn get(&self, path: &Path) -> Result<Option<MachineState>> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM machine_status WHERE path = ?")
                .bind(path.to_string_lossy().into_owned())
                .fetch_optional(&self.pool)
                .await?;

        Ok(state.map(|s| MachineState::parse(&s)))
    }

    async fn set(&self, path: &Path, state: MachineState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO machine_status (path, state, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
            "#,
        )
        .bind(path.to_string_lossy().into_owned())
        .bind(state.as_str())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Process-local store for tests and for running without a database.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    states: Mutex<HashMap<PathBuf, MachineState>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, path: &Path) -> Result<Option<MachineState>> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(path).copied())
    }

    async fn set(&self, path: &Path, state: MachineState) -> Result<()> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.insert(path.to_path_buf(), state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_db;

    #[tokio::test]
    async fn test_sqlite_store_upserts() {
        let store = SqliteStatusStore::new(create_test_db().await);
        let path = Path::new("/vm/a");

        assert_eq!(store.get(path).await.unwrap(), None);

        store.set(path, MachineState::Running).await.unwrap();
        store.set(path, MachineState::Poweroff).await.unwrap();

        assert_eq!(store.get(path).await.unwrap(), Some(MachineState::Poweroff));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStatusStore::new();
        store
            .set(Path::new("/vm/b"), MachineState::NotCreated)
            .await
            .unwrap();

        assert_eq!(
            store.get(Path::new("/vm/b")).await.unwrap(),
            Some(MachineState::NotCreated)
        );
        assert_eq!(store.get(Path::new("/vm/c")).await.unwrap(), None);
    }
}
