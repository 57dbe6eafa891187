use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labelledger_core::{DomainError, Entity, Money, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Artist,
    Admin,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Artist => "artist",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "artist" => Ok(UserRole::Artist),
            "admin" => Ok(UserRole::Admin),
            other => Err(DomainError::validation(format!("unknown role: {other}"))),
        }
    }
}

/// The ledger's view of a user: identity plus the spendable balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub role: UserRole,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
}

impl Entity for User {
    type Id = UserId;
    const KIND: &'static str = "user";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Lower-cases and trims an email, rejecting obviously malformed input.
pub fn normalize_email(email: &str) -> Result<String, DomainError> {
    let email = email.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => {
            Ok(email)
        }
        _ => Err(DomainError::validation(format!("invalid email: {email:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized() {
        assert_eq!(normalize_email("  Artist@Label.COM ").unwrap(), "artist@label.com");
    }

    #[test]
    fn malformed_email_is_rejected() {
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@label.com").is_err());
        assert!(normalize_email("artist@localhost").is_err());
    }

    #[test]
    fn role_round_trips() {
        for role in [UserRole::Artist, UserRole::Admin] {
            assert_eq!(UserRole::parse(role.as_str()).unwrap(), role);
        }
    }
}
