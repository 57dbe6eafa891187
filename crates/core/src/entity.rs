//! Entity trait: identity + continuity across state changes.

use crate::error::DomainError;

/// Entity marker + minimal interface.
///
/// Ledger rows (earnings, withdrawals, payment methods, teams) are entities:
/// two rows with identical fields but different ids are different records.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Name used when a lookup for this entity comes back empty.
    const KIND: &'static str;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// The `NotFound` error for a missing row of this entity.
    fn not_found(id: impl core::fmt::Display) -> DomainError {
        DomainError::not_found(Self::KIND, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::UserId;

    struct Account {
        id: UserId,
    }

    impl Entity for Account {
        type Id = UserId;
        const KIND: &'static str = "account";

        fn id(&self) -> &UserId {
            &self.id
        }
    }

    #[test]
    fn missing_rows_are_reported_under_the_entity_kind() {
        let id = UserId::new();
        match Account::not_found(id) {
            DomainError::NotFound { entity, id: reported } => {
                assert_eq!(entity, "account");
                assert_eq!(reported, id.to_string());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
