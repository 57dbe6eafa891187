//! `labelledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the ledger error taxonomy, and the fixed-point `Money` type.

pub mod entity;
pub mod error;
pub mod id;
pub mod money;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{EarningId, InviteId, PaymentMethodId, TeamId, TeamMemberId, UserId, WithdrawalId};
pub use money::Money;
