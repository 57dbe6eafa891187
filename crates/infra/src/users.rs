//! User rows: registration and lookup.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use tracing::{info, instrument};

use labelledger_core::{DomainError, Entity, Money, UserId};
use labelledger_royalties::user::normalize_email;
use labelledger_royalties::{User, UserRole};

use crate::error::{corrupt_row, map_sqlx_error, LedgerResult};
use crate::store::{timestamp, LedgerStore};

#[derive(Debug, Clone)]
pub struct UserDirectory {
    store: LedgerStore,
}

impl UserDirectory {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Create a user with a zero balance. Emails are unique, case-insensitively.
    #[instrument(skip(self), fields(role = role.as_str()), err)]
    pub async fn register(&self, email: &str, role: UserRole, at: DateTime<Utc>) -> LedgerResult<User> {
        let email = normalize_email(email)?;
        let user = User {
            id: UserId::new(),
            email,
            role,
            balance: Money::ZERO,
            created_at: at,
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, email, role, balance_cents, created_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(timestamp(at))
        .execute(self.store.pool())
        .await
        .map_err(|e| map_sqlx_error("register_user", e))?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get(&self, user_id: UserId) -> LedgerResult<User> {
        let row = sqlx::query("SELECT id, email, role, balance_cents, created_at FROM users WHERE id = ?1")
            .bind(user_id.as_uuid())
            .fetch_optional(self.store.pool())
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?
            .ok_or_else(|| User::not_found(user_id))?;

        decode_user(&row)
    }

    #[instrument(skip(self), err)]
    pub async fn find_by_email(&self, email: &str) -> LedgerResult<Option<User>> {
        let email = normalize_email(email)?;
        let row = sqlx::query("SELECT id, email, role, balance_cents, created_at FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(self.store.pool())
            .await
            .map_err(|e| map_sqlx_error("find_user_by_email", e))?;

        row.as_ref().map(decode_user).transpose()
    }
}

struct UserRow {
    id: uuid::Uuid,
    email: String,
    role: String,
    balance_cents: i64,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for UserRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            role: row.try_get("role")?,
            balance_cents: row.try_get("balance_cents")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = DomainError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId::from_uuid(row.id),
            email: row.email,
            role: UserRole::parse(&row.role)?,
            balance: Money::from_cents(row.balance_cents),
            created_at: row.created_at,
        })
    }
}

fn decode_user(row: &SqliteRow) -> LedgerResult<User> {
    let row = UserRow::from_row(row).map_err(|e| corrupt_row("decode_user", e))?;
    User::try_from(row).map_err(|e| corrupt_row("decode_user", e))
}
