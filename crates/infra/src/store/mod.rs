//! SQLite-backed ledger store.
//!
//! `LedgerStore` owns the connection pool and the schema. The ledger
//! components borrow it and run every mutation as one transaction on it.
//!
//! ## Locking
//!
//! File-backed stores run in WAL mode with a busy timeout. Every mutating
//! transaction issues a write as its first statement, so concurrent writers
//! queue on the database lock instead of failing a read-to-write upgrade.
//!
//! ## Thread Safety
//!
//! `LedgerStore` is `Send + Sync` and cheap to clone; clones share the pool.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Connection, Row, Sqlite, SqliteConnection, TypeInfo, ValueRef};
use tracing::{info, instrument, warn};

use labelledger_core::DomainError;

use crate::config::LedgerConfig;
use crate::error::{map_sqlx_error, LedgerError, LedgerResult};

pub(crate) mod schema;

#[derive(Debug, Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
    /// Memory databases cannot ATTACH or `VACUUM INTO` a file: the target
    /// inherits the memory open flag. Backups then go through a separate
    /// file connection instead.
    in_memory: bool,
}

impl LedgerStore {
    /// Open (creating if needed) the database named by `config.database_url`
    /// and bring its schema up to date.
    #[instrument(skip(config), fields(database_url = %config.database_url), err)]
    pub async fn connect(config: &LedgerConfig) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| map_sqlx_error("connect", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self { pool, in_memory: false };
        store.migrate().await?;
        info!(max_connections = config.max_connections, "ledger store opened");
        Ok(store)
    }

    /// Private in-memory database, for tests and dry runs.
    ///
    /// The pool holds exactly one connection that never expires: an in-memory
    /// SQLite database lives only as long as its connection.
    pub async fn in_memory() -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("in_memory", e))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("in_memory", e))?;

        let store = Self { pool, in_memory: true };
        store.migrate().await?;
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the schema. Safe to run repeatedly.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("migrate", e))?;
        for statement in schema::MIGRATIONS {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Fold the write-ahead log back into the main database file.
    #[instrument(skip(self), err)]
    pub async fn checkpoint(&self) -> LedgerResult<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("checkpoint", e))?;
        Ok(())
    }

    /// Write a consistent snapshot of the whole database to `path`.
    ///
    /// The target must not exist yet.
    #[instrument(skip(self), fields(path = %path.display()), err)]
    pub async fn backup_to(&self, path: &Path) -> LedgerResult<()> {
        if path.exists() {
            return Err(DomainError::conflict(format!("backup target {} already exists", path.display())).into());
        }
        self.checkpoint().await?;

        if self.in_memory {
            self.export_rows(path).await?;
        } else {
            sqlx::query("VACUUM INTO ?1")
                .bind(path.to_string_lossy().into_owned())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("backup_to", e))?;
        }

        if !path.is_file() {
            return Err(LedgerError::store(
                "backup_to",
                format!("no backup file was written at {}", path.display()),
            ));
        }

        info!("ledger backup written");
        Ok(())
    }

    /// Write every table into a fresh database file at `path`.
    async fn export_rows(&self, path: &Path) -> LedgerResult<u64> {
        let mut target = open_file(path, true).await?;
        let mut source = self.pool.acquire().await.map_err(|e| map_sqlx_error("backup_to", e))?;

        let mut tx = target.begin().await.map_err(|e| map_sqlx_error("backup_to", e))?;
        for statement in schema::MIGRATIONS {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("backup_to", e))?;
        }
        let rows = copy_rows(&mut source, &mut tx).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("backup_to", e))?;

        target.close().await.map_err(|e| map_sqlx_error("backup_to", e))?;
        Ok(rows)
    }

    /// Replace every row with the contents of a snapshot made by
    /// [`LedgerStore::backup_to`]. All tables are swapped in one transaction:
    /// on failure the live data is left untouched.
    #[instrument(skip(self), fields(path = %path.display()), err)]
    pub async fn restore_from(&self, path: &Path) -> LedgerResult<()> {
        if !path.is_file() {
            return Err(DomainError::not_found("backup", path.display()).into());
        }

        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("restore_from", e))?;

        if self.in_memory {
            let mut source = open_file(path, false).await?;
            let copied = import_rows(&mut source, &mut conn).await;
            if let Err(e) = source.close().await {
                warn!(error = %e, "failed to close backup file after restore");
            }
            let rows = copied?;
            info!(rows, "ledger restored from backup");
            return Ok(());
        }

        // ATTACH is refused inside a transaction.
        sqlx::query("ATTACH DATABASE ?1 AS snapshot")
            .bind(path.to_string_lossy().into_owned())
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("restore_from", e))?;

        let copied = copy_snapshot(&mut conn).await;

        if let Err(e) = sqlx::query("DETACH DATABASE snapshot").execute(&mut *conn).await {
            warn!(error = %e, "failed to detach snapshot after restore");
        }

        let rows = copied?;
        info!(rows, "ledger restored from backup");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn copy_snapshot(conn: &mut sqlx::SqliteConnection) -> LedgerResult<u64> {
    let mut tx = sqlx::Connection::begin(conn)
        .await
        .map_err(|e| map_sqlx_error("restore_from", e))?;

    for table in schema::TABLES.iter().rev() {
        sqlx::query(&format!("DELETE FROM main.{table}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("restore_from", e))?;
    }

    let mut rows = 0;
    for table in schema::TABLES {
        rows += sqlx::query(&format!("INSERT INTO main.{table} SELECT * FROM snapshot.{table}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("restore_from", e))?
            .rows_affected();
    }

    tx.commit().await.map_err(|e| map_sqlx_error("restore_from", e))?;
    Ok(rows)
}

/// Plain file connection, independent of the pool's open flags.
async fn open_file(path: &Path, create: bool) -> LedgerResult<SqliteConnection> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .read_only(!create)
        .foreign_keys(true);
    SqliteConnection::connect_with(&options)
        .await
        .map_err(|e| map_sqlx_error("open_backup", e))
}

/// Replace every table on `target` with the rows read from `source`, in one
/// transaction on `target`.
async fn import_rows(source: &mut SqliteConnection, target: &mut SqliteConnection) -> LedgerResult<u64> {
    let mut tx = target.begin().await.map_err(|e| map_sqlx_error("restore_from", e))?;

    for table in schema::TABLES.iter().rev() {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("restore_from", e))?;
    }
    let rows = copy_rows(source, &mut tx).await?;

    tx.commit().await.map_err(|e| map_sqlx_error("restore_from", e))?;
    Ok(rows)
}

/// Copy each table row by row, parents first. Columns are read and written
/// by position, so both sides must share the same schema.
async fn copy_rows(source: &mut SqliteConnection, target: &mut SqliteConnection) -> LedgerResult<u64> {
    let mut copied = 0;
    for table in schema::TABLES {
        let rows = sqlx::query(&format!("SELECT * FROM {table}"))
            .fetch_all(&mut *source)
            .await
            .map_err(|e| map_sqlx_error("copy_rows", e))?;
        let Some(first) = rows.first() else {
            continue;
        };

        let placeholders = vec!["?"; first.len()].join(", ");
        let insert = format!("INSERT INTO {table} VALUES ({placeholders})");
        for row in &rows {
            let mut query = sqlx::query(&insert);
            for index in 0..row.len() {
                query = bind_column(query, row, index).map_err(|e| map_sqlx_error("copy_rows", e))?;
            }
            query
                .execute(&mut *target)
                .await
                .map_err(|e| map_sqlx_error("copy_rows", e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn bind_column<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    row: &SqliteRow,
    index: usize,
) -> Result<Query<'q, Sqlite, SqliteArguments<'q>>, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(query.bind(None::<i64>));
    }
    let storage = raw.type_info().name().to_string();
    Ok(match storage.as_str() {
        "INTEGER" | "BOOLEAN" => query.bind(row.try_get::<i64, _>(index)?),
        "REAL" => query.bind(row.try_get::<f64, _>(index)?),
        "BLOB" => query.bind(row.try_get::<Vec<u8>, _>(index)?),
        _ => query.bind(row.try_get::<String, _>(index)?),
    })
}

/// Wall-clock time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width text form of a timestamp. Lexical order equals time order.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use chrono::TimeZone;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = LedgerStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn checkpoint_on_memory_store_is_harmless() {
        let store = LedgerStore::in_memory().await.unwrap();
        store.checkpoint().await.unwrap();
    }

    #[tokio::test]
    async fn backup_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("existing.db");
        std::fs::write(&target, b"keep me").unwrap();

        let store = LedgerStore::in_memory().await.unwrap();
        let err = store.backup_to(&target).await.unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::Conflict(_))));
        assert_eq!(std::fs::read(&target).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn memory_store_backup_writes_a_real_file() {
        use crate::balance::BalanceLedger;
        use crate::users::UserDirectory;
        use labelledger_core::Money;
        use labelledger_royalties::UserRole;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("memory.db");

        let source = LedgerStore::in_memory().await.unwrap();
        let user = UserDirectory::new(source.clone())
            .register("artist@label.com", UserRole::Artist, now())
            .await
            .unwrap();
        BalanceLedger::new(source.clone()).credit(user.id, Money::from_cents(4_200)).await.unwrap();

        source.backup_to(&target).await.unwrap();
        assert!(target.is_file());

        let copy = LedgerStore::in_memory().await.unwrap();
        copy.restore_from(&target).await.unwrap();
        let restored = UserDirectory::new(copy.clone()).get(user.id).await.unwrap();
        assert_eq!(restored.email, user.email);
        assert_eq!(restored.created_at, user.created_at);
        assert_eq!(BalanceLedger::new(copy).balance(user.id).await.unwrap(), Money::from_cents(4_200));
    }

    #[tokio::test]
    async fn restore_from_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::in_memory().await.unwrap();
        let err = store.restore_from(&dir.path().join("nope.db")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        assert_eq!(timestamp(a), "2024-01-02T03:04:05.000000Z");
        assert!(timestamp(a) < timestamp(b));
    }

    #[test]
    fn now_is_truncated_to_micros() {
        assert_eq!(now().timestamp_subsec_nanos() % 1_000, 0);
    }
}
