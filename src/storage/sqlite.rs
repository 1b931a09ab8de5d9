//! SQLite storage handle.
//!
//! Provides async-safe SQLite operations using spawn_blocking. Two
//! connections are held: one writer serialized behind a mutex, and one
//! reader. With WAL journaling the reader sees the last committed state
//! while a batch transaction is open, so queries are never blocked by
//! indexing.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use rusqlite::Connection;
use tokio::task::spawn_blocking;

use crate::error::CoderagErr;
use crate::error::Result;

/// Retry attempts for a busy writer before surfacing `Busy`.
const BUSY_RETRIES: u32 = 3;
/// Base backoff between busy retries; doubles per attempt.
const BUSY_BACKOFF: Duration = Duration::from_millis(50);

/// Async-safe SQLite store.
///
/// rusqlite::Connection is not Sync, so each connection lives behind an
/// `Arc<Mutex<_>>` and all access goes through `spawn_blocking`.
pub struct SqliteStore {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a database, applying connection pragmas.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoderagErr::io(parent, e))?;
        }

        let writer = Self::open_connection(path)?;
        let reader = Self::open_connection(path)?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
            path: path.to_path_buf(),
        })
    }

    fn open_connection(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path).map_err(|e| CoderagErr::sqlite(path, e))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -4000;",
        )
        .map_err(|e| CoderagErr::Sqlite {
            path: path.to_path_buf(),
            cause: format!("pragma init failed: {e}"),
        })?;
        Ok(conn)
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a read-only query on the reader connection.
    pub async fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.reader.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let guard = lock_recovering(&conn, &path);
            f(&guard)
        })
        .await
        .map_err(|e| CoderagErr::Sqlite {
            path: self.path.clone(),
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }

    /// Run a write on the writer connection, outside any transaction.
    pub async fn write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.writer.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let guard = lock_recovering(&conn, &path);
            f(&guard)
        })
        .await
        .map_err(|e| CoderagErr::Sqlite {
            path: self.path.clone(),
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }

    /// Run a closure inside a write transaction.
    ///
    /// The closure may run more than once: a busy database is retried with
    /// capped exponential backoff before surfacing `Busy`.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: Fn(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.writer.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let mut attempt = 0;
            loop {
                let mut guard = lock_recovering(&conn, &path);
                match run_transaction(&mut guard, &path, &f) {
                    Ok(value) => return Ok(value),
                    Err(err) if is_busy(&err) && attempt < BUSY_RETRIES => {
                        drop(guard);
                        attempt += 1;
                        let backoff = BUSY_BACKOFF * 2u32.pow(attempt - 1);
                        tracing::warn!(
                            path = %path.display(),
                            attempt,
                            "database busy, retrying transaction"
                        );
                        std::thread::sleep(backoff);
                    }
                    Err(err) if is_busy(&err) => {
                        return Err(CoderagErr::Busy {
                            attempts: attempt + 1,
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
        })
        .await
        .map_err(|e| CoderagErr::Sqlite {
            path: self.path.clone(),
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }
}

fn run_transaction<F, T>(conn: &mut Connection, path: &Path, f: &F) -> Result<T>
where
    F: Fn(&Connection) -> Result<T>,
{
    let tx = conn.transaction().map_err(|e| CoderagErr::Sqlite {
        path: path.to_path_buf(),
        cause: format!("transaction start failed: {e}"),
    })?;
    let result = f(&tx)?;
    tx.commit().map_err(|e| CoderagErr::Sqlite {
        path: path.to_path_buf(),
        cause: format!("transaction commit failed: {e}"),
    })?;
    Ok(result)
}

/// Lock a connection, recovering from mutex poisoning.
///
/// A panicked holder may have left a transaction open; roll it back so the
/// connection returns to autocommit.
fn lock_recovering<'a>(
    conn: &'a Arc<Mutex<Connection>>,
    path: &Path,
) -> MutexGuard<'a, Connection> {
    conn.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(path = %path.display(), "mutex poisoned, recovering");
        let inner = poisoned.into_inner();
        if !inner.is_autocommit()
            && let Err(e) = inner.execute_batch("ROLLBACK")
        {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "rollback after poisoning recovery failed"
            );
        }
        inner
    })
}

fn is_busy(err: &CoderagErr) -> bool {
    match err {
        CoderagErr::Sqlite { cause, .. } => {
            cause.contains("database is locked") || cause.contains("database table is locked")
        }
        CoderagErr::Busy { .. } => true,
        _ => false,
    }
}

/// Extension trait for optional query results.
pub trait OptionalExt<T> {
    /// Convert QueryReturnedNoRows into None.
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_and_query() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("test.db")).unwrap();

        store
            .write(|conn| {
                conn.execute("CREATE TABLE t (x INTEGER)", [])?;
                conn.execute("INSERT INTO t (x) VALUES (42)", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let value: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT x FROM t", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_transaction_commits() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("test.db")).unwrap();

        store
            .write(|conn| {
                conn.execute("CREATE TABLE t (x INTEGER)", [])?;
                Ok(())
            })
            .await
            .unwrap();

        store
            .transaction(|conn| {
                conn.execute("INSERT INTO t (x) VALUES (1)", [])?;
                conn.execute("INSERT INTO t (x) VALUES (2)", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("test.db")).unwrap();

        store
            .write(|conn| {
                conn.execute("CREATE TABLE t (x INTEGER)", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let result: Result<()> = store
            .transaction(|conn| {
                conn.execute("INSERT INTO t (x) VALUES (1)", [])?;
                Err(CoderagErr::Cancelled)
            })
            .await;
        assert!(result.is_err());

        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_optional_ext() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("test.db")).unwrap();

        let missing: Option<i64> = store
            .read(|conn| {
                conn.query_row("SELECT 1 WHERE 1 = 0", [], |row| row.get(0))
                    .optional()
            })
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
