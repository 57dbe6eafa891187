//! Account deletion.
//!
//! Removing a user walks every table that references them, children before
//! parents, inside one transaction. Stored files (artwork, audio) are not
//! touched here; the caller schedules their cleanup after a successful delete.

use std::collections::BTreeMap;

use sqlx::SqliteConnection;
use tracing::{info, instrument};

use labelledger_core::{Entity, UserId};
use labelledger_royalties::User;

use crate::error::{map_sqlx_error, LedgerResult};
use crate::store::LedgerStore;

/// Deletion steps in execution order: (table, statement). Every statement
/// binds the user id as `?1`.
const STEPS: &[(&str, &str)] = &[
    (
        "team_members",
        "DELETE FROM team_members WHERE team_id IN (SELECT id FROM teams WHERE owner_id = ?1)",
    ),
    (
        "team_invites",
        "DELETE FROM team_invites WHERE team_id IN (SELECT id FROM teams WHERE owner_id = ?1)",
    ),
    ("teams", "DELETE FROM teams WHERE owner_id = ?1"),
    ("team_members", "DELETE FROM team_members WHERE user_id = ?1"),
    (
        "tracks",
        "DELETE FROM tracks WHERE release_id IN (SELECT id FROM releases WHERE user_id = ?1)",
    ),
    (
        "release_artists",
        "DELETE FROM release_artists WHERE release_id IN (SELECT id FROM releases WHERE user_id = ?1)",
    ),
    (
        "release_writers",
        "DELETE FROM release_writers WHERE release_id IN (SELECT id FROM releases WHERE user_id = ?1)",
    ),
    (
        "contracts",
        "DELETE FROM contracts WHERE release_id IN (SELECT id FROM releases WHERE user_id = ?1)",
    ),
    ("releases", "DELETE FROM releases WHERE user_id = ?1"),
    // Credits of the user's library entries on other users' releases.
    (
        "release_artists",
        "DELETE FROM release_artists WHERE artist_id IN (SELECT id FROM artists WHERE user_id = ?1)",
    ),
    (
        "release_writers",
        "DELETE FROM release_writers WHERE writer_id IN (SELECT id FROM writers WHERE user_id = ?1)",
    ),
    ("artists", "DELETE FROM artists WHERE user_id = ?1"),
    ("writers", "DELETE FROM writers WHERE user_id = ?1"),
    ("earnings", "DELETE FROM earnings WHERE user_id = ?1"),
    ("withdrawals", "DELETE FROM withdrawals WHERE user_id = ?1"),
    ("payment_methods", "DELETE FROM payment_methods WHERE user_id = ?1"),
    (
        "ticket_responses",
        "DELETE FROM ticket_responses WHERE user_id = ?1 OR ticket_id IN (SELECT id FROM tickets WHERE user_id = ?1)",
    ),
    ("tickets", "DELETE FROM tickets WHERE user_id = ?1"),
    ("notifications", "DELETE FROM notifications WHERE user_id = ?1"),
    ("applications", "DELETE FROM applications WHERE user_id = ?1"),
    ("profiles", "DELETE FROM profiles WHERE user_id = ?1"),
];

/// Tables and columns holding a user reference, for verification.
const USER_REFERENCES: &[(&str, &str)] = &[
    ("profiles", "user_id"),
    ("applications", "user_id"),
    ("notifications", "user_id"),
    ("tickets", "user_id"),
    ("ticket_responses", "user_id"),
    ("artists", "user_id"),
    ("writers", "user_id"),
    ("releases", "user_id"),
    ("earnings", "user_id"),
    ("withdrawals", "user_id"),
    ("payment_methods", "user_id"),
    ("teams", "owner_id"),
    ("team_members", "user_id"),
];

/// Rows removed per table by one account deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub user_id: Option<UserId>,
    pub deleted: BTreeMap<&'static str, u64>,
}

impl CascadeReport {
    fn record(&mut self, table: &'static str, rows: u64) {
        *self.deleted.entry(table).or_default() += rows;
    }

    pub fn rows(&self, table: &str) -> u64 {
        self.deleted.get(table).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.deleted.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct CascadeDeletion {
    store: LedgerStore,
}

impl CascadeDeletion {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Delete the user and everything hanging off them. `NotFound` if there
    /// is no such user; any failure leaves every row in place.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn delete_user(&self, user_id: UserId) -> LedgerResult<CascadeReport> {
        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("delete_user", e))?;

        let mut report = CascadeReport {
            user_id: Some(user_id),
            ..CascadeReport::default()
        };
        for (table, statement) in STEPS {
            let rows = sqlx::query(statement)
                .bind(user_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_user", e))?
                .rows_affected();
            report.record(table, rows);
        }

        let users = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?
            .rows_affected();
        if users == 0 {
            return Err(User::not_found(user_id).into());
        }
        report.record("users", users);

        tx.commit().await.map_err(|e| map_sqlx_error("delete_user", e))?;

        info!(rows = report.total(), deleted = ?report.deleted, "user deleted");
        Ok(report)
    }

    /// Rows anywhere in the ledger that still point at `user_id`.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn remaining_references(&self, user_id: UserId) -> LedgerResult<u64> {
        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("remaining_references", e))?;
        count_references(&mut conn, user_id).await
    }
}

async fn count_references(conn: &mut SqliteConnection, user_id: UserId) -> LedgerResult<u64> {
    let mut total = 0u64;
    for (table, column) in USER_REFERENCES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"))
            .bind(user_id.as_uuid())
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("remaining_references", e))?;
        total += count.unsigned_abs();
    }
    Ok(total)
}
