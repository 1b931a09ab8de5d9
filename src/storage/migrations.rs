//! Schema migrations.
//!
//! A linear list of DDL migrations keyed by the SHA-256 of their SQL. Each
//! migration runs at most once: the hash is recorded in the `migrations`
//! table inside the same transaction as the DDL, and a marker file is
//! dropped under the data directory's `migrations/` folder. Any failure is
//! fatal; the store must not accept writes afterwards.

use std::path::Path;

use sha2::Digest;
use sha2::Sha256;

use crate::error::CoderagErr;
use crate::error::Result;
use crate::storage::sqlite::SqliteStore;
use crate::types::unix_now;

/// One schema migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Human-readable name, recorded in the marker file.
    pub name: &'static str,
    /// DDL to execute.
    pub sql: &'static str,
}

/// All migrations, in order.
pub const MIGRATIONS: &[Migration] = &[Migration {
    name: "0001_initial_schema",
    sql: r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    content_hash TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    language TEXT,
    indexed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_content_hash ON files(content_hash);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    type TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    magnitude REAL NOT NULL DEFAULT 0,
    token_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id);

CREATE TABLE IF NOT EXISTS chunk_terms (
    chunk_id INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    term TEXT NOT NULL,
    raw_freq INTEGER NOT NULL,
    tf REAL NOT NULL,
    tfidf REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (chunk_id, term)
);

CREATE INDEX IF NOT EXISTS idx_chunk_terms_term ON chunk_terms(term, chunk_id);

CREATE TABLE IF NOT EXISTS idf_scores (
    term TEXT NOT NULL UNIQUE,
    idf REAL NOT NULL,
    document_frequency INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS index_metadata (
    key TEXT NOT NULL UNIQUE,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#,
}];

/// Run all pending migrations.
///
/// `records_dir` receives a marker file per applied migration
/// (`<hash>.applied` containing the migration name).
pub async fn run_migrations(store: &SqliteStore, records_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(records_dir)
        .map_err(|e| CoderagErr::MigrationFailed { cause: e.to_string() })?;

    // Bootstrap the bookkeeping table outside the hash-keyed list.
    store
        .write(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS migrations (
                     hash TEXT NOT NULL UNIQUE,
                     created_at INTEGER NOT NULL
                 );",
            )?;
            Ok(())
        })
        .await
        .map_err(|e| CoderagErr::MigrationFailed { cause: e.to_string() })?;

    for migration in MIGRATIONS {
        let hash = migration_hash(migration.sql);

        let applied = {
            let hash = hash.clone();
            store
                .read(move |conn| {
                    let count: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM migrations WHERE hash = ?",
                        [&hash],
                        |row| row.get(0),
                    )?;
                    Ok(count > 0)
                })
                .await
                .map_err(|e| CoderagErr::MigrationFailed { cause: e.to_string() })?
        };
        if applied {
            continue;
        }

        let sql = migration.sql;
        let tx_hash = hash.clone();
        store
            .transaction(move |conn| {
                conn.execute_batch(sql)?;
                conn.execute(
                    "INSERT INTO migrations (hash, created_at) VALUES (?, ?)",
                    rusqlite::params![tx_hash, unix_now()],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| CoderagErr::MigrationFailed {
                cause: format!("{}: {e}", migration.name),
            })?;

        let marker = records_dir.join(format!("{hash}.applied"));
        std::fs::write(&marker, migration.name)
            .map_err(|e| CoderagErr::MigrationFailed { cause: e.to_string() })?;

        tracing::info!(migration = migration.name, "applied migration");
    }

    Ok(())
}

/// SHA-256 of a migration's SQL, hex-encoded.
pub fn migration_hash(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.db")).unwrap();
        let records = dir.path().join("migrations");

        run_migrations(&store, &records).await.unwrap();
        // Second run is a no-op.
        run_migrations(&store, &records).await.unwrap();

        let applied: i64 = store
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);

        // Marker files exist.
        let markers = std::fs::read_dir(&records).unwrap().count();
        assert_eq!(markers, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_schema_tables_exist() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.db")).unwrap();
        run_migrations(&store, &dir.path().join("migrations"))
            .await
            .unwrap();

        let tables: Vec<String> = store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                let mut names = Vec::new();
                for row in rows {
                    names.push(row?);
                }
                Ok(names)
            })
            .await
            .unwrap();

        for table in [
            "files",
            "chunks",
            "chunk_terms",
            "idf_scores",
            "index_metadata",
            "migrations",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing table {table}");
        }
    }

    #[test]
    fn test_hash_is_stable() {
        let a = migration_hash("CREATE TABLE x (y)");
        let b = migration_hash("CREATE TABLE x (y)");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
