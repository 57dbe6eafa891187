//! Royalty ledger domain (earnings, withdrawals, payment methods, split teams).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. The
//! infrastructure crate persists these types and enforces the transactional
//! half of every invariant.

pub mod earning;
pub mod notification;
pub mod payment_method;
pub mod team;
pub mod user;
pub mod withdrawal;

pub use earning::{Earning, EarningsSummary, Month, NewEarning};
pub use notification::LedgerNotification;
pub use payment_method::{Iban, NewPaymentMethod, PaymentMethod, PaymentMethodUpdate, SwiftBic};
pub use team::{
    InviteCode, InviteStatus, MemberStatus, SharePercent, Team, TeamInvite, TeamMember, TeamRole,
    DEFAULT_INVITE_TTL_DAYS, MAX_INVITE_TTL_DAYS,
};
pub use user::{normalize_email, User, UserRole};
pub use withdrawal::{
    NewWithdrawal, Withdrawal, WithdrawalDecision, WithdrawalStatus, WithdrawalTransition,
};
