//! Post-commit notifications and the in-process bus that carries them.
//!
//! Ledger operations commit first and publish afterwards. Nothing on this bus
//! is ever part of a ledger transaction.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
