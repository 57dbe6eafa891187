//! Earnings posting and reversal.
//!
//! Posting writes the earning row and credits the balance in one
//! transaction. Deleting removes the row and debits the same amount back;
//! if the money has already been spent the delete is refused.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use tracing::{info, instrument};

use labelledger_core::{DomainError, Entity, EarningId, Money, UserId};
use labelledger_royalties::{Earning, EarningsSummary, Month, NewEarning};

use crate::balance;
use crate::error::{corrupt_row, map_sqlx_error, LedgerResult};
use crate::store::{timestamp, LedgerStore};

const EARNING_COLUMNS: &str = "id, user_id, month, amount_cents, streams, downloads, created_at";

#[derive(Debug, Clone)]
pub struct EarningsPoster {
    store: LedgerStore,
}

impl EarningsPoster {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    #[instrument(
        skip(self, new),
        fields(user_id = %new.user_id, month = %new.month, amount = %new.amount),
        err
    )]
    pub async fn post(&self, new: NewEarning, at: DateTime<Utc>) -> LedgerResult<Earning> {
        new.validate()?;
        let earning = new.into_earning(EarningId::new(), at);

        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("post_earning", e))?;

        let balance = balance::credit(&mut tx, earning.user_id, earning.amount).await?;

        sqlx::query(
            r#"
            INSERT INTO earnings (id, user_id, month, amount_cents, streams, downloads, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(earning.id.as_uuid())
        .bind(earning.user_id.as_uuid())
        .bind(earning.month.as_str())
        .bind(earning.amount.cents())
        .bind(earning.streams)
        .bind(earning.downloads)
        .bind(timestamp(at))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("post_earning", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("post_earning", e))?;

        info!(earning_id = %earning.id, balance = %balance, "earning posted");
        Ok(earning)
    }

    /// Delete an earning and take its amount back off the balance.
    #[instrument(skip(self), fields(earning_id = %earning_id), err)]
    pub async fn delete(&self, earning_id: EarningId) -> LedgerResult<Earning> {
        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("delete_earning", e))?;

        let row = sqlx::query(&format!("DELETE FROM earnings WHERE id = ?1 RETURNING {EARNING_COLUMNS}"))
            .bind(earning_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_earning", e))?
            .ok_or_else(|| Earning::not_found(earning_id))?;
        let earning = decode_earning(&row)?;

        // Dropping `tx` on error rolls the delete back.
        let balance = balance::debit(&mut tx, earning.user_id, earning.amount).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("delete_earning", e))?;

        info!(user_id = %earning.user_id, balance = %balance, "earning reversed");
        Ok(earning)
    }

    #[instrument(skip(self), fields(earning_id = %earning_id), err)]
    pub async fn get(&self, earning_id: EarningId) -> LedgerResult<Earning> {
        let row = sqlx::query(&format!("SELECT {EARNING_COLUMNS} FROM earnings WHERE id = ?1"))
            .bind(earning_id.as_uuid())
            .fetch_optional(self.store.pool())
            .await
            .map_err(|e| map_sqlx_error("get_earning", e))?
            .ok_or_else(|| Earning::not_found(earning_id))?;
        decode_earning(&row)
    }

    /// Newest month first; within a month, newest posting first.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn list_for_user(&self, user_id: UserId) -> LedgerResult<Vec<Earning>> {
        let rows = sqlx::query(&format!(
            "SELECT {EARNING_COLUMNS} FROM earnings WHERE user_id = ?1 ORDER BY month DESC, created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| map_sqlx_error("list_earnings", e))?;

        rows.iter().map(decode_earning).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn summary(&self, user_id: UserId) -> LedgerResult<EarningsSummary> {
        let earnings = self.list_for_user(user_id).await?;
        Ok(EarningsSummary::from_earnings(&earnings)?)
    }
}

struct EarningRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    month: String,
    amount_cents: i64,
    streams: i64,
    downloads: i64,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for EarningRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(EarningRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            month: row.try_get("month")?,
            amount_cents: row.try_get("amount_cents")?,
            streams: row.try_get("streams")?,
            downloads: row.try_get("downloads")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<EarningRow> for Earning {
    type Error = DomainError;

    fn try_from(row: EarningRow) -> Result<Self, Self::Error> {
        Ok(Earning {
            id: EarningId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            month: Month::parse(&row.month)?,
            amount: Money::from_cents(row.amount_cents),
            streams: row.streams,
            downloads: row.downloads,
            created_at: row.created_at,
        })
    }
}

fn decode_earning(row: &SqliteRow) -> LedgerResult<Earning> {
    let row = EarningRow::from_row(row).map_err(|e| corrupt_row("decode_earning", e))?;
    Earning::try_from(row).map_err(|e| corrupt_row("decode_earning", e))
}
