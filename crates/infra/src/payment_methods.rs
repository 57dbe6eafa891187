//! Stored payout bank details.
//!
//! At most one method per user carries the default flag. The flag only moves
//! by clearing every default for the user and then setting one, inside a
//! single transaction; the partial unique index `payment_methods_one_default`
//! rejects anything else.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::{info, instrument};

use labelledger_core::{DomainError, Entity, PaymentMethodId, UserId};
use labelledger_royalties::{Iban, NewPaymentMethod, PaymentMethod, PaymentMethodUpdate, SwiftBic, User};

use crate::error::{corrupt_row, is_foreign_key_violation, map_sqlx_error, LedgerResult};
use crate::store::{timestamp, LedgerStore};

const METHOD_COLUMNS: &str = "id, user_id, bank_name, account_holder, iban, swift_bic, is_default, created_at";

#[derive(Debug, Clone)]
pub struct PaymentMethodRegistry {
    store: LedgerStore,
}

impl PaymentMethodRegistry {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    #[instrument(skip(self, new), fields(user_id = %new.user_id, iban = %new.iban.masked(), is_default = new.is_default), err)]
    pub async fn create(&self, new: NewPaymentMethod, at: DateTime<Utc>) -> LedgerResult<PaymentMethod> {
        new.validate()?;
        let method = PaymentMethod {
            id: PaymentMethodId::new(),
            user_id: new.user_id,
            bank_name: new.bank_name.trim().to_string(),
            account_holder: new.account_holder.trim().to_string(),
            iban: new.iban,
            swift_bic: new.swift_bic,
            is_default: new.is_default,
            created_at: at,
        };

        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("create_payment_method", e))?;

        if method.is_default {
            clear_defaults(&mut tx, method.user_id).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO payment_methods (id, user_id, bank_name, account_holder, iban, swift_bic, is_default, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(method.id.as_uuid())
        .bind(method.user_id.as_uuid())
        .bind(&method.bank_name)
        .bind(&method.account_holder)
        .bind(method.iban.as_str())
        .bind(method.swift_bic.as_ref().map(SwiftBic::as_str))
        .bind(method.is_default)
        .bind(timestamp(at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                User::not_found(method.user_id).into()
            } else {
                map_sqlx_error("create_payment_method", e)
            }
        })?;

        tx.commit().await.map_err(|e| map_sqlx_error("create_payment_method", e))?;

        info!(payment_method_id = %method.id, "payment method added");
        Ok(method)
    }

    /// Make `method_id` the user's only default. `NotFound`, with nothing
    /// changed, if the method does not exist or belongs to someone else.
    #[instrument(skip(self), fields(user_id = %user_id, payment_method_id = %method_id), err)]
    pub async fn set_default(&self, user_id: UserId, method_id: PaymentMethodId) -> LedgerResult<PaymentMethod> {
        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("set_default_payment_method", e))?;

        clear_defaults(&mut tx, user_id).await?;

        let row = sqlx::query(&format!(
            "UPDATE payment_methods SET is_default = 1 WHERE id = ?1 AND user_id = ?2 RETURNING {METHOD_COLUMNS}"
        ))
        .bind(method_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_default_payment_method", e))?
        .ok_or_else(|| PaymentMethod::not_found(method_id))?;
        let method = decode_method(&row)?;

        tx.commit().await.map_err(|e| map_sqlx_error("set_default_payment_method", e))?;

        info!("default payment method changed");
        Ok(method)
    }

    /// Edit bank details. The default flag is left alone.
    #[instrument(skip(self, update), fields(payment_method_id = %method_id), err)]
    pub async fn update(&self, method_id: PaymentMethodId, update: PaymentMethodUpdate) -> LedgerResult<PaymentMethod> {
        update.validate()?;

        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("update_payment_method", e))?;

        // A no-op write takes the write lock and hands back the current row.
        let row = sqlx::query(&format!(
            "UPDATE payment_methods SET id = id WHERE id = ?1 RETURNING {METHOD_COLUMNS}"
        ))
        .bind(method_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_payment_method", e))?
        .ok_or_else(|| PaymentMethod::not_found(method_id))?;
        let mut method = decode_method(&row)?;

        if update.is_empty() {
            return Ok(method);
        }
        update.apply_to(&mut method);

        sqlx::query(
            r#"
            UPDATE payment_methods
            SET bank_name = ?1, account_holder = ?2, iban = ?3, swift_bic = ?4
            WHERE id = ?5
            "#,
        )
        .bind(&method.bank_name)
        .bind(&method.account_holder)
        .bind(method.iban.as_str())
        .bind(method.swift_bic.as_ref().map(SwiftBic::as_str))
        .bind(method.id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_payment_method", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("update_payment_method", e))?;

        info!(iban = %method.iban.masked(), "payment method updated");
        Ok(method)
    }

    /// Remove a method. Pending withdrawals keep the details they captured.
    #[instrument(skip(self), fields(payment_method_id = %method_id), err)]
    pub async fn delete(&self, method_id: PaymentMethodId) -> LedgerResult<PaymentMethod> {
        let row = sqlx::query(&format!("DELETE FROM payment_methods WHERE id = ?1 RETURNING {METHOD_COLUMNS}"))
            .bind(method_id.as_uuid())
            .fetch_optional(self.store.pool())
            .await
            .map_err(|e| map_sqlx_error("delete_payment_method", e))?
            .ok_or_else(|| PaymentMethod::not_found(method_id))?;

        let method = decode_method(&row)?;
        info!(user_id = %method.user_id, "payment method deleted");
        Ok(method)
    }

    #[instrument(skip(self), fields(payment_method_id = %method_id), err)]
    pub async fn get(&self, method_id: PaymentMethodId) -> LedgerResult<PaymentMethod> {
        let row = sqlx::query(&format!("SELECT {METHOD_COLUMNS} FROM payment_methods WHERE id = ?1"))
            .bind(method_id.as_uuid())
            .fetch_optional(self.store.pool())
            .await
            .map_err(|e| map_sqlx_error("get_payment_method", e))?
            .ok_or_else(|| PaymentMethod::not_found(method_id))?;
        decode_method(&row)
    }

    /// Default first, then oldest first.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn list_for_user(&self, user_id: UserId) -> LedgerResult<Vec<PaymentMethod>> {
        let rows = sqlx::query(&format!(
            "SELECT {METHOD_COLUMNS} FROM payment_methods WHERE user_id = ?1 ORDER BY is_default DESC, created_at ASC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| map_sqlx_error("list_payment_methods", e))?;

        rows.iter().map(decode_method).collect()
    }
}

async fn clear_defaults(conn: &mut SqliteConnection, user_id: UserId) -> LedgerResult<u64> {
    let result = sqlx::query("UPDATE payment_methods SET is_default = 0 WHERE user_id = ?1 AND is_default = 1")
        .bind(user_id.as_uuid())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("clear_default_payment_methods", e))?;
    Ok(result.rows_affected())
}

struct PaymentMethodRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    bank_name: String,
    account_holder: String,
    iban: String,
    swift_bic: Option<String>,
    is_default: bool,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for PaymentMethodRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(PaymentMethodRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            bank_name: row.try_get("bank_name")?,
            account_holder: row.try_get("account_holder")?,
            iban: row.try_get("iban")?,
            swift_bic: row.try_get("swift_bic")?,
            is_default: row.try_get("is_default")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<PaymentMethodRow> for PaymentMethod {
    type Error = DomainError;

    fn try_from(row: PaymentMethodRow) -> Result<Self, Self::Error> {
        Ok(PaymentMethod {
            id: PaymentMethodId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            bank_name: row.bank_name,
            account_holder: row.account_holder,
            iban: Iban::parse(&row.iban)?,
            swift_bic: row.swift_bic.as_deref().map(SwiftBic::parse).transpose()?,
            is_default: row.is_default,
            created_at: row.created_at,
        })
    }
}

fn decode_method(row: &SqliteRow) -> LedgerResult<PaymentMethod> {
    let row = PaymentMethodRow::from_row(row).map_err(|e| corrupt_row("decode_payment_method", e))?;
    PaymentMethod::try_from(row).map_err(|e| corrupt_row("decode_payment_method", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::store::now;
    use crate::users::UserDirectory;
    use labelledger_royalties::UserRole;

    const DE_IBAN: &str = "DE89370400440532013000";
    const GB_IBAN: &str = "GB82WEST12345698765432";

    async fn fixture() -> (PaymentMethodRegistry, UserId, UserId) {
        let store = LedgerStore::in_memory().await.unwrap();
        let users = UserDirectory::new(store.clone());
        let a = users.register("a@label.com", UserRole::Artist, now()).await.unwrap();
        let b = users.register("b@label.com", UserRole::Artist, now()).await.unwrap();
        (PaymentMethodRegistry::new(store), a.id, b.id)
    }

    fn new_method(user_id: UserId, iban: &str, is_default: bool) -> NewPaymentMethod {
        NewPaymentMethod {
            user_id,
            bank_name: "Deutsche Bank".to_string(),
            account_holder: "A. Artist".to_string(),
            iban: Iban::parse(iban).unwrap(),
            swift_bic: Some(SwiftBic::parse("DEUTDEFF").unwrap()),
            is_default,
        }
    }

    async fn defaults(registry: &PaymentMethodRegistry, user: UserId) -> Vec<PaymentMethodId> {
        registry
            .list_for_user(user)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.is_default)
            .map(|m| m.id)
            .collect()
    }

    #[tokio::test]
    async fn new_default_replaces_old_default() {
        let (registry, user, _) = fixture().await;
        let first = registry.create(new_method(user, DE_IBAN, true), now()).await.unwrap();
        let second = registry.create(new_method(user, GB_IBAN, true), now()).await.unwrap();

        assert_eq!(defaults(&registry, user).await, [second.id]);
        assert!(!registry.get(first.id).await.unwrap().is_default);
    }

    #[tokio::test]
    async fn set_default_leaves_exactly_one() {
        let (registry, user, _) = fixture().await;
        let a = registry.create(new_method(user, DE_IBAN, true), now()).await.unwrap();
        let b = registry.create(new_method(user, GB_IBAN, false), now()).await.unwrap();

        let updated = registry.set_default(user, b.id).await.unwrap();
        assert!(updated.is_default);
        assert_eq!(defaults(&registry, user).await, [b.id]);

        registry.set_default(user, a.id).await.unwrap();
        assert_eq!(defaults(&registry, user).await, [a.id]);
    }

    #[tokio::test]
    async fn set_default_on_someone_elses_method_changes_nothing() {
        let (registry, alice, bob) = fixture().await;
        let mine = registry.create(new_method(alice, DE_IBAN, true), now()).await.unwrap();
        let theirs = registry.create(new_method(bob, GB_IBAN, false), now()).await.unwrap();

        let err = registry.set_default(alice, theirs.id).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(defaults(&registry, alice).await, [mine.id]);
        assert!(defaults(&registry, bob).await.is_empty());
    }

    #[tokio::test]
    async fn store_rejects_a_second_default_written_directly() {
        let (registry, user, _) = fixture().await;
        registry.create(new_method(user, DE_IBAN, true), now()).await.unwrap();
        let second = registry.create(new_method(user, GB_IBAN, false), now()).await.unwrap();
        let err = sqlx::query("UPDATE payment_methods SET is_default = 1 WHERE id = ?1")
            .bind(second.id.as_uuid())
            .execute(registry.store.pool())
            .await
            .map_err(|e| map_sqlx_error("test", e))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let (registry, user, _) = fixture().await;
        let method = registry.create(new_method(user, DE_IBAN, true), now()).await.unwrap();

        let updated = registry
            .update(
                method.id,
                PaymentMethodUpdate {
                    iban: Some(Iban::parse("gb82 west 1234 5698 7654 32").unwrap()),
                    swift_bic: Some(None),
                    ..PaymentMethodUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.iban.as_str(), GB_IBAN);
        assert_eq!(updated.swift_bic, None);
        assert_eq!(updated.bank_name, "Deutsche Bank");
        assert!(updated.is_default);
        assert_eq!(registry.get(method.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let (registry, user, _) = fixture().await;
        let method = registry.create(new_method(user, DE_IBAN, false), now()).await.unwrap();
        registry.delete(method.id).await.unwrap();
        assert!(registry.get(method.id).await.unwrap_err().is_not_found());
        assert!(registry.delete(method.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (registry, _, _) = fixture().await;
        let err = registry
            .create(new_method(UserId::new(), DE_IBAN, false), now())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
