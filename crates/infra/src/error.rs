//! Ledger error model for the storage-backed components.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `LedgerError` as follows:
//!
//! | SQLx Error | SQLite extended code | LedgerError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (unique) | `2067` / `1555` | `Domain(Conflict)` | Duplicate email, membership, invite code, second default method |
//! | Database (foreign key) | `787` | `Domain(InvalidState)` | Row still referenced, or references a missing parent |
//! | Database (check) | `275` | `Domain(InvalidState)` | Negative balance, bad status, share out of range |
//! | Database (other) | Any other | `Store` | Busy, I/O, corruption |
//! | Anything else | N/A | `Store` | Pool closed, decode failures, connection errors |

use labelledger_core::DomainError;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Deterministic business failure; nothing was written.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Storage failure; the enclosing transaction was rolled back.
    #[error("store error in {operation}: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },
}

impl LedgerError {
    pub fn store(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Store {
            operation,
            message: message.into(),
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Domain(err) => Some(err),
            LedgerError::Store { .. } => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.domain().is_some_and(DomainError::is_not_found)
    }

    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, LedgerError::Domain(DomainError::InsufficientFunds { .. }))
    }
}

pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("2067") | Some("1555") => DomainError::conflict(msg).into(),
                Some("787") | Some("275") => DomainError::invalid_state(msg).into(),
                _ => LedgerError::store(operation, db_err.message()),
            }
        }
        sqlx::Error::PoolClosed => LedgerError::store(operation, "connection pool closed"),
        other => LedgerError::store(operation, other.to_string()),
    }
}

/// Check if an error is a foreign key violation.
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "787";
        }
    }
    false
}

/// Row decoding failed after the query succeeded; the stored data is not
/// something the domain types accept.
pub(crate) fn corrupt_row(operation: &'static str, err: impl core::fmt::Display) -> LedgerError {
    LedgerError::store(operation, format!("corrupt row: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelledger_core::Money;

    #[test]
    fn domain_errors_pass_through() {
        let err: LedgerError = DomainError::insufficient_funds(Money::from_cents(10), Money::ZERO).into();
        assert!(err.is_insufficient_funds());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "insufficient funds: requested 0.10, available 0.00");
    }

    #[test]
    fn non_database_errors_become_store_errors() {
        let err = map_sqlx_error("get_user", sqlx::Error::PoolClosed);
        assert!(matches!(err, LedgerError::Store { operation: "get_user", .. }));
        assert!(err.domain().is_none());
    }
}
