use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::{error, info, warn};

use crate::{migrate, AppError, AppResult};

/// Handle to the on-device database. Constructed once by the host and passed
/// to everything that persists; there is no global instance.
#[derive(Clone, Debug)]
pub struct LocalStore {
    pool: SqlitePool,
    location: Option<PathBuf>,
}

impl LocalStore {
    /// Opens (creating if missing) the store at `path` and applies pending migrations.
    pub async fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                error!(
                    target: "nestbudget",
                    error = %e,
                    event = "store_dir_create_failed",
                    path = %parent.display()
                );
                AppError::from(e).with_context("path", parent.display().to_string())
            })?;
        }
        info!(target: "nestbudget", event = "store_path", path = %path.display());

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .after_connect(|conn, _| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys=ON;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000;")
                        .execute(&mut *conn)
                        .await?;
                    Ok::<_, sqlx::Error>(())
                })
            })
            .connect_with(opts)
            .await?;

        log_effective_pragmas(&pool).await;
        migrate::apply_migrations(&pool).await?;

        Ok(Self {
            pool,
            location: Some(path.to_path_buf()),
        })
    }

    /// A private in-memory store. A single pinned connection keeps the
    /// database alive for the lifetime of the handle.
    pub async fn open_in_memory() -> AppResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(opts)
            .await?;
        migrate::apply_migrations(&pool).await?;
        Ok(Self {
            pool,
            location: None,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Closes every connection. Operations issued afterwards fail with `STORE/CLOSED`.
    pub async fn close(&self) {
        self.pool.close().await;
        info!(target: "nestbudget", event = "store_closed");
    }
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "nestbudget",
        event = "store_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "nestbudget",
            event = "store_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Run work inside a transaction. Commits on success, rolls back on error.
pub async fn run_in_tx<R, F>(pool: &SqlitePool, f: F) -> AppResult<R>
where
    R: Send,
    F: for<'t> FnOnce(&'t mut SqliteConnection) -> BoxFuture<'t, AppResult<R>>,
{
    let mut tx = pool.begin().await?;
    match f(&mut *tx).await {
        Ok(val) => {
            tx.commit().await?;
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "nestbudget", event = "store_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "nestbudget", event = "store_tx_rollback", code = e.code());
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_on_disk_store_and_applies_schema() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("budget.sqlite3");
        let store = LocalStore::open(&path).await.expect("open store");
        assert_eq!(store.location(), Some(path.as_path()));

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(store.pool())
                .await
                .expect("list tables");
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(names.contains(&"expenses"));
        assert!(names.contains(&"sync_queue"));
        store.close().await;
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let store = LocalStore::open_in_memory().await.expect("open");
        let result: AppResult<()> = run_in_tx(store.pool(), |conn| {
            async move {
                sqlx::query("INSERT INTO families (id, data, updated_at) VALUES ('f1', '{}', 0)")
                    .execute(&mut *conn)
                    .await?;
                Err(AppError::new("TEST/ABORT", "abort"))
            }
            .boxed()
        })
        .await;
        assert!(result.is_err());

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM families")
            .fetch_one(store.pool())
            .await
            .expect("count");
        assert_eq!(count.0, 0);
    }
}
