use chrono::{DateTime, Utc};

/// A fact that something already happened (and was committed).
///
/// Events are immutable and versioned. They describe the ledger change after
/// the fact; consumers (notification inboxes, analytics caches) react to them
/// but can never undo the change they describe.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "ledger.withdrawal.resolved").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the underlying change was committed.
    fn occurred_at(&self) -> DateTime<Utc>;
}
