//! Balance primitives.
//!
//! `credit` and `debit` are the only statements in the crate that change
//! `users.balance_cents`. Both run on a caller-supplied connection so they
//! join the caller's transaction, and both are single conditional updates:
//! the balance check and the write cannot interleave with another writer.

use sqlx::{Row, SqliteConnection};
use tracing::{debug, instrument};

use labelledger_core::{DomainError, Entity, Money, UserId};
use labelledger_royalties::User;

use crate::error::{map_sqlx_error, LedgerResult};
use crate::store::LedgerStore;

/// Add `amount` to the user's balance. Returns the new balance.
pub(crate) async fn credit(conn: &mut SqliteConnection, user_id: UserId, amount: Money) -> LedgerResult<Money> {
    amount.ensure_positive("credit amount")?;

    let row = sqlx::query("UPDATE users SET balance_cents = balance_cents + ?1 WHERE id = ?2 RETURNING balance_cents")
        .bind(amount.cents())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("credit", e))?
        .ok_or_else(|| User::not_found(user_id))?;

    let balance = Money::from_cents(row.try_get("balance_cents").map_err(|e| map_sqlx_error("credit", e))?);
    debug!(user_id = %user_id, amount = %amount, balance = %balance, "balance credited");
    Ok(balance)
}

/// Take `amount` from the user's balance, refusing to go below zero.
/// Returns the new balance.
pub(crate) async fn debit(conn: &mut SqliteConnection, user_id: UserId, amount: Money) -> LedgerResult<Money> {
    amount.ensure_positive("debit amount")?;

    let row = sqlx::query(
        r#"
        UPDATE users SET balance_cents = balance_cents - ?1
        WHERE id = ?2 AND balance_cents >= ?1
        RETURNING balance_cents
        "#,
    )
    .bind(amount.cents())
    .bind(user_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("debit", e))?;

    match row {
        Some(row) => {
            let balance = Money::from_cents(row.try_get("balance_cents").map_err(|e| map_sqlx_error("debit", e))?);
            debug!(user_id = %user_id, amount = %amount, balance = %balance, "balance debited");
            Ok(balance)
        }
        // Nothing matched: either no such user or not enough money.
        None => {
            let available = read_balance(conn, user_id).await?;
            Err(DomainError::insufficient_funds(amount, available).into())
        }
    }
}

async fn read_balance(conn: &mut SqliteConnection, user_id: UserId) -> LedgerResult<Money> {
    let cents: Option<i64> = sqlx::query_scalar("SELECT balance_cents FROM users WHERE id = ?1")
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("balance", e))?;

    cents
        .map(Money::from_cents)
        .ok_or_else(|| User::not_found(user_id).into())
}

/// Standalone balance access for reads and manual adjustments.
#[derive(Debug, Clone)]
pub struct BalanceLedger {
    store: LedgerStore,
}

impl BalanceLedger {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn balance(&self, user_id: UserId) -> LedgerResult<Money> {
        let mut conn = self.store.pool().acquire().await.map_err(|e| map_sqlx_error("balance", e))?;
        read_balance(&mut conn, user_id).await
    }

    #[instrument(skip(self), fields(user_id = %user_id, amount = %amount), err)]
    pub async fn credit(&self, user_id: UserId, amount: Money) -> LedgerResult<Money> {
        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("credit", e))?;
        let balance = credit(&mut tx, user_id, amount).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("credit", e))?;
        Ok(balance)
    }

    #[instrument(skip(self), fields(user_id = %user_id, amount = %amount), err)]
    pub async fn debit(&self, user_id: UserId, amount: Money) -> LedgerResult<Money> {
        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("debit", e))?;
        let balance = debit(&mut tx, user_id, amount).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("debit", e))?;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::store::now;
    use crate::users::UserDirectory;
    use labelledger_royalties::UserRole;

    async fn ledger_with_user() -> (BalanceLedger, UserId) {
        let store = LedgerStore::in_memory().await.unwrap();
        let user = UserDirectory::new(store.clone())
            .register("artist@label.com", UserRole::Artist, now())
            .await
            .unwrap();
        (BalanceLedger::new(store), user.id)
    }

    #[tokio::test]
    async fn credit_then_debit() {
        let (ledger, user) = ledger_with_user().await;
        assert_eq!(ledger.credit(user, Money::from_cents(10_000)).await.unwrap(), Money::from_cents(10_000));
        assert_eq!(ledger.debit(user, Money::from_cents(2_500)).await.unwrap(), Money::from_cents(7_500));
        assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(7_500));
    }

    #[tokio::test]
    async fn overdraft_reports_available_balance() {
        let (ledger, user) = ledger_with_user().await;
        ledger.credit(user, Money::from_cents(100)).await.unwrap();

        let err = ledger.debit(user, Money::from_cents(101)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::InsufficientFunds { requested, available })
                if requested == Money::from_cents(101) && available == Money::from_cents(100)
        ));
        assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(100));
    }

    #[tokio::test]
    async fn debit_to_exactly_zero_is_allowed() {
        let (ledger, user) = ledger_with_user().await;
        ledger.credit(user, Money::from_cents(500)).await.unwrap();
        assert_eq!(ledger.debit(user, Money::from_cents(500)).await.unwrap(), Money::ZERO);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (ledger, _) = ledger_with_user().await;
        let ghost = UserId::new();
        assert!(ledger.credit(ghost, Money::from_cents(1)).await.unwrap_err().is_not_found());
        assert!(ledger.debit(ghost, Money::from_cents(1)).await.unwrap_err().is_not_found());
        assert!(ledger.balance(ghost).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let (ledger, user) = ledger_with_user().await;
        for amount in [Money::ZERO, Money::from_cents(-5)] {
            let err = ledger.credit(user, amount).await.unwrap_err();
            assert!(matches!(err, LedgerError::Domain(DomainError::Validation(_))));
            let err = ledger.debit(user, amount).await.unwrap_err();
            assert!(matches!(err, LedgerError::Domain(DomainError::Validation(_))));
        }
    }
}
