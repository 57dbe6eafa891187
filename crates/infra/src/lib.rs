//! Infrastructure layer: the SQLite ledger store, the components that run
//! ledger transactions on it, configuration, and the service facade.

pub mod balance;
pub mod cascade;
pub mod config;
pub mod earnings;
pub mod error;
pub mod payment_methods;
pub mod service;
pub mod store;
pub mod teams;
pub mod users;
pub mod withdrawals;

#[cfg(test)]
mod integration_tests;

pub use balance::BalanceLedger;
pub use cascade::{CascadeDeletion, CascadeReport};
pub use config::{ConfigError, LedgerConfig};
pub use earnings::EarningsPoster;
pub use error::{LedgerError, LedgerResult};
pub use payment_methods::PaymentMethodRegistry;
pub use service::{LedgerService, NotificationBus};
pub use store::LedgerStore;
pub use teams::{TeamDeletion, TeamSplitEngine};
pub use users::UserDirectory;
pub use withdrawals::{Resolution, WithdrawalProcessor};
