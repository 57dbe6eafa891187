//! Withdrawal requests and their administrative resolution.
//!
//! Requesting escrows the amount immediately: the debit and the `PENDING` row
//! are written together. Resolving moves a pending row to a terminal state
//! exactly once; a rejection refunds the escrow in the same transaction.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::{info, instrument};

use labelledger_core::{DomainError, Entity, Money, UserId, WithdrawalId};
use labelledger_royalties::{NewWithdrawal, Withdrawal, WithdrawalDecision, WithdrawalStatus, WithdrawalTransition};

use crate::balance;
use crate::error::{corrupt_row, map_sqlx_error, LedgerResult};
use crate::store::{timestamp, LedgerStore};

const WITHDRAWAL_COLUMNS: &str = "id, user_id, amount_cents, method, details, status, note, requested_at, processed_at";

/// Result of applying a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub withdrawal: Withdrawal,
    /// `AlreadyResolved` when the same decision had been applied before and
    /// nothing was written this time.
    pub transition: WithdrawalTransition,
}

impl Resolution {
    pub fn changed(&self) -> bool {
        matches!(self.transition, WithdrawalTransition::Resolve { .. })
    }
}

#[derive(Debug, Clone)]
pub struct WithdrawalProcessor {
    store: LedgerStore,
}

impl WithdrawalProcessor {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    #[instrument(
        skip(self, new),
        fields(user_id = %new.user_id, amount = %new.amount, method = %new.method),
        err
    )]
    pub async fn request(&self, new: NewWithdrawal, at: DateTime<Utc>) -> LedgerResult<Withdrawal> {
        new.validate()?;

        let withdrawal = Withdrawal {
            id: WithdrawalId::new(),
            user_id: new.user_id,
            amount: new.amount,
            method: new.method.trim().to_string(),
            details: new.details,
            status: WithdrawalStatus::Pending,
            note: None,
            requested_at: at,
            processed_at: None,
        };

        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("request_withdrawal", e))?;

        let balance = balance::debit(&mut tx, withdrawal.user_id, withdrawal.amount).await?;

        sqlx::query(
            r#"
            INSERT INTO withdrawals (id, user_id, amount_cents, method, details, status, note, requested_at, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, NULL)
            "#,
        )
        .bind(withdrawal.id.as_uuid())
        .bind(withdrawal.user_id.as_uuid())
        .bind(withdrawal.amount.cents())
        .bind(&withdrawal.method)
        .bind(&withdrawal.details)
        .bind(withdrawal.status.as_str())
        .bind(timestamp(at))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("request_withdrawal", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("request_withdrawal", e))?;

        info!(withdrawal_id = %withdrawal.id, balance = %balance, "withdrawal requested");
        Ok(withdrawal)
    }

    /// Apply an admin decision to a withdrawal.
    ///
    /// Repeating the decision already on record is a no-op; asking for the
    /// other terminal state is `InvalidState`.
    #[instrument(skip(self, decision), fields(withdrawal_id = %withdrawal_id, target = %decision.target()), err)]
    pub async fn resolve(
        &self,
        withdrawal_id: WithdrawalId,
        decision: WithdrawalDecision,
        at: DateTime<Utc>,
    ) -> LedgerResult<Resolution> {
        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("resolve_withdrawal", e))?;

        // Claim the row while it is still pending. Losing a race to another
        // admin shows up here as no row.
        let claimed = sqlx::query(&format!(
            r#"
            UPDATE withdrawals SET status = ?1, note = ?2, processed_at = ?3
            WHERE id = ?4 AND status = 'PENDING'
            RETURNING {WITHDRAWAL_COLUMNS}
            "#
        ))
        .bind(decision.target().as_str())
        .bind(decision.note())
        .bind(timestamp(at))
        .bind(withdrawal_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("resolve_withdrawal", e))?;

        let Some(row) = claimed else {
            let current = load(&mut tx, withdrawal_id).await?;
            let transition = WithdrawalTransition::decide(current.status, &decision)?;
            return Ok(Resolution {
                withdrawal: current,
                transition,
            });
        };

        let withdrawal = decode_withdrawal(&row)?;
        let transition = WithdrawalTransition::decide(WithdrawalStatus::Pending, &decision)?;
        if let WithdrawalTransition::Resolve { refund: true } = transition {
            balance::credit(&mut tx, withdrawal.user_id, withdrawal.amount).await?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("resolve_withdrawal", e))?;

        info!(user_id = %withdrawal.user_id, status = %withdrawal.status, "withdrawal resolved");
        Ok(Resolution { withdrawal, transition })
    }

    #[instrument(skip(self), fields(withdrawal_id = %withdrawal_id), err)]
    pub async fn get(&self, withdrawal_id: WithdrawalId) -> LedgerResult<Withdrawal> {
        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("get_withdrawal", e))?;
        load(&mut conn, withdrawal_id).await
    }

    /// A user's withdrawals, newest first, optionally narrowed to one status.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        status: Option<WithdrawalStatus>,
    ) -> LedgerResult<Vec<Withdrawal>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals
            WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY requested_at DESC
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(status.map(WithdrawalStatus::as_str))
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| map_sqlx_error("list_withdrawals", e))?;

        rows.iter().map(decode_withdrawal).collect()
    }

    /// The admin queue: every pending request, oldest first.
    #[instrument(skip(self), err)]
    pub async fn list_pending(&self) -> LedgerResult<Vec<Withdrawal>> {
        let rows = sqlx::query(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE status = 'PENDING' ORDER BY requested_at ASC"
        ))
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| map_sqlx_error("list_pending_withdrawals", e))?;

        rows.iter().map(decode_withdrawal).collect()
    }
}

async fn load(conn: &mut SqliteConnection, withdrawal_id: WithdrawalId) -> LedgerResult<Withdrawal> {
    let row = sqlx::query(&format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = ?1"))
        .bind(withdrawal_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("get_withdrawal", e))?
        .ok_or_else(|| Withdrawal::not_found(withdrawal_id))?;
    decode_withdrawal(&row)
}

struct WithdrawalRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    amount_cents: i64,
    method: String,
    details: String,
    status: String,
    note: Option<String>,
    requested_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for WithdrawalRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(WithdrawalRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            amount_cents: row.try_get("amount_cents")?,
            method: row.try_get("method")?,
            details: row.try_get("details")?,
            status: row.try_get("status")?,
            note: row.try_get("note")?,
            requested_at: row.try_get("requested_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

impl TryFrom<WithdrawalRow> for Withdrawal {
    type Error = DomainError;

    fn try_from(row: WithdrawalRow) -> Result<Self, Self::Error> {
        Ok(Withdrawal {
            id: WithdrawalId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            amount: Money::from_cents(row.amount_cents),
            method: row.method,
            details: row.details,
            status: WithdrawalStatus::parse(&row.status)?,
            note: row.note,
            requested_at: row.requested_at,
            processed_at: row.processed_at,
        })
    }
}

fn decode_withdrawal(row: &SqliteRow) -> LedgerResult<Withdrawal> {
    let row = WithdrawalRow::from_row(row).map_err(|e| corrupt_row("decode_withdrawal", e))?;
    Withdrawal::try_from(row).map_err(|e| corrupt_row("decode_withdrawal", e))
}
