//! Embedded SQLite connection management, grounded on `storage::database`'s
//! `PoolSize`/`DatabaseOptions`/`DatabaseManager` (minus its `KeyVault`
//! encryption subsystem, which has no counterpart in this spec).

use std::num::NonZeroU32;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::storage::error::{DatabaseError, DatabaseResult};
use crate::storage::paths::StoragePaths;
use crate::storage::sql_scripts::SqlScriptCatalog;

#[derive(Debug, Clone, Copy)]
pub enum PoolSize {
    Fixed(NonZeroU32),
    Adaptive { min: u32, max: u32 },
}

impl PoolSize {
    pub fn resolve(&self) -> (u32, u32) {
        match self {
            PoolSize::Fixed(n) => (1, n.get()),
            PoolSize::Adaptive { min, max } => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get() as u32)
                    .unwrap_or(2);
                (*min, (cpus * 2).clamp(*min, *max))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub pool_size: PoolSize,
    pub connection_timeout: Duration,
    pub wal: bool,
    pub busy_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            pool_size: PoolSize::Adaptive { min: 2, max: 16 },
            connection_timeout: Duration::from_secs(10),
            wal: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

pub struct DatabaseManager {
    pool: SqlitePool,
    scripts: SqlScriptCatalog,
}

impl DatabaseManager {
    pub async fn new(paths: &StoragePaths, options: &DatabaseOptions) -> DatabaseResult<Self> {
        let db_path = paths.database_file();
        let mut connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .busy_timeout(options.busy_timeout);
        if options.wal {
            connect_options = connect_options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let (min_conns, max_conns) = options.pool_size.resolve();
        let pool = SqlitePoolOptions::new()
            .min_connections(min_conns)
            .max_connections(max_conns)
            .acquire_timeout(options.connection_timeout)
            .idle_timeout(Duration::from_secs(30 * 60))
            .connect_with(connect_options)
            .await
            .map_err(|e| DatabaseError::open(db_path.clone(), e))?;

        let scripts = SqlScriptCatalog::load(&paths.sql_dir)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(%err, "no sql scripts loaded, schema must already exist");
                SqlScriptCatalog::load_empty()
            });

        let manager = Self { pool, scripts };
        manager.initialize().await?;
        Ok(manager)
    }

    async fn initialize(&self) -> DatabaseResult<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await
            .map_err(|source| DatabaseError::Migration { source })?;
        self.execute_sql_scripts().await
    }

    async fn execute_sql_scripts(&self) -> DatabaseResult<()> {
        for script in self.scripts.iter() {
            tracing::info!(name = %script.name, "applying schema script");
            for statement in script.statements.iter() {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|source| DatabaseError::Migration { source })?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fixed_pool_size_resolves_to_itself() {
        let size = PoolSize::Fixed(NonZeroU32::new(8).unwrap());
        assert_eq!(size.resolve(), (1, 8));
    }

    #[test]
    fn adaptive_pool_size_respects_bounds() {
        let size = PoolSize::Adaptive { min: 4, max: 4 };
        assert_eq!(size.resolve(), (4, 4));
    }

    #[tokio::test]
    async fn initializes_schema_from_sql_directory() {
        let root = TempDir::new().unwrap();
        let app_dir = root.path().join("app");
        let paths = StoragePaths::new(app_dir).unwrap();
        tokio::fs::create_dir_all(&paths.sql_dir).await.unwrap();
        tokio::fs::write(
            paths.sql_dir.join("0001_schema.sql"),
            "CREATE TABLE commands (command TEXT PRIMARY KEY);",
        )
        .await
        .unwrap();

        let manager = DatabaseManager::new(&paths, &DatabaseOptions::default())
            .await
            .unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM commands")
            .fetch_one(manager.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
