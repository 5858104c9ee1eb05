//! `SQLite` connection pool setup and migration runner.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use ccuhub_app::retry::RetryPolicy;

use crate::error::StorageError;
use crate::state_dir::StateDir;

/// Name of the database file inside the state directory.
pub const DATABASE_FILE: &str = "ccuhub.db";

/// Configuration for the `SQLite` state directory.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the database file. Created if missing.
    pub state_dir: PathBuf,
    /// Retries for a single append before it is reported as failed.
    pub append_retry: RetryPolicy,
    pub max_connections: u32,
    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,
}

impl Config {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            append_retry: RetryPolicy::default(),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Open the state directory and start its writer task.
    ///
    /// Creates the directory and the database file if missing and runs all
    /// pending migrations. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the directory, connection or migrations
    /// fail.
    pub async fn open(self) -> Result<StateDir, StorageError> {
        StateDir::open(self).await
    }

    pub(crate) fn database_path(&self) -> PathBuf {
        self.state_dir.join(DATABASE_FILE)
    }
}

/// Connect to the database inside `config.state_dir` and run migrations.
pub(crate) async fn connect(config: &Config) -> Result<SqlitePool, StorageError> {
    ensure_dir(&config.state_dir).await?;

    let options = SqliteConnectOptions::new()
        .filename(config.database_path())
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::debug!(path = %config.database_path().display(), "database opened");
    Ok(pool)
}

async fn ensure_dir(path: &Path) -> Result<(), StorageError> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::TempStateDir;
    use super::*;

    #[tokio::test]
    async fn should_create_directory_and_run_migrations() {
        let tmp = TempStateDir::new();
        let config = tmp.config();
        let pool = connect(&config).await.unwrap();
        assert!(config.database_path().exists());

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|row| row.0.as_str()).collect();
        assert_eq!(names, vec!["events", "schedules"]);
    }

    #[tokio::test]
    async fn should_reconnect_to_existing_database() {
        let tmp = TempStateDir::new();
        let config = tmp.config();
        connect(&config).await.unwrap().close().await;
        assert!(connect(&config).await.is_ok());
    }

    #[tokio::test]
    async fn should_remove_temp_state_dir_on_drop() {
        let tmp = TempStateDir::new();
        let config = tmp.config();
        connect(&config).await.unwrap().close().await;
        assert!(config.state_dir.exists());

        drop(tmp);
        assert!(!config.state_dir.exists());
    }
}
