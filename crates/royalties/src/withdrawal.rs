use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labelledger_core::{DomainError, Entity, Money, UserId, WithdrawalId};

/// Withdrawal lifecycle.
///
/// `Pending` is the only non-terminal state. The escrowed amount leaves the
/// balance at request time; `Rejected` gives it back, `Completed` keeps it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Completed => "COMPLETED",
            WithdrawalStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "PENDING" => Ok(WithdrawalStatus::Pending),
            "COMPLETED" => Ok(WithdrawalStatus::Completed),
            "REJECTED" => Ok(WithdrawalStatus::Rejected),
            other => Err(DomainError::validation(format!("unknown withdrawal status: {other}"))),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, WithdrawalStatus::Pending)
    }
}

impl core::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub amount: Money,
    pub method: String,
    pub details: String,
    pub status: WithdrawalStatus,
    pub note: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Entity for Withdrawal {
    type Id = WithdrawalId;
    const KIND: &'static str = "withdrawal";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Payout request as submitted by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWithdrawal {
    pub user_id: UserId,
    pub amount: Money,
    /// Payout channel, e.g. `bank_transfer`.
    pub method: String,
    /// Free-form payout details captured at request time.
    pub details: String,
}

impl NewWithdrawal {
    pub fn validate(&self) -> Result<(), DomainError> {
        self.amount.ensure_positive("withdrawal amount")?;
        if self.method.trim().is_empty() {
            return Err(DomainError::validation("withdrawal method is required"));
        }
        Ok(())
    }
}

/// Administrative resolution of a pending withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalDecision {
    Completed { note: Option<String> },
    Rejected { note: Option<String> },
}

impl WithdrawalDecision {
    pub fn complete(note: Option<String>) -> Self {
        Self::Completed { note }
    }

    pub fn reject(note: Option<String>) -> Self {
        Self::Rejected { note }
    }

    pub fn target(&self) -> WithdrawalStatus {
        match self {
            WithdrawalDecision::Completed { .. } => WithdrawalStatus::Completed,
            WithdrawalDecision::Rejected { .. } => WithdrawalStatus::Rejected,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            WithdrawalDecision::Completed { note } | WithdrawalDecision::Rejected { note } => {
                note.as_deref()
            }
        }
    }

    /// Builds a decision from the raw status string an admin endpoint receives.
    pub fn from_status(status: &str, note: Option<String>) -> Result<Self, DomainError> {
        match WithdrawalStatus::parse(status)? {
            WithdrawalStatus::Completed => Ok(Self::Completed { note }),
            WithdrawalStatus::Rejected => Ok(Self::Rejected { note }),
            WithdrawalStatus::Pending => Err(DomainError::invalid_state(
                "a withdrawal cannot be moved back to PENDING",
            )),
        }
    }
}

/// What applying a decision to a stored withdrawal amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalTransition {
    /// First resolution: write status + processed_at, refunding when rejected.
    Resolve { refund: bool },
    /// Same terminal status requested again: nothing changes.
    AlreadyResolved,
}

impl WithdrawalTransition {
    /// Decide the transition from the currently stored status.
    ///
    /// Repeating a terminal status is a no-op (so a retried reject never
    /// refunds twice). Switching between terminal states is refused.
    pub fn decide(current: WithdrawalStatus, decision: &WithdrawalDecision) -> Result<Self, DomainError> {
        let target = decision.target();
        match current {
            WithdrawalStatus::Pending => Ok(Self::Resolve {
                refund: target == WithdrawalStatus::Rejected,
            }),
            done if done == target => Ok(Self::AlreadyResolved),
            done => Err(DomainError::invalid_state(format!(
                "withdrawal already {done}, cannot mark {target}"
            ))),
        }
    }
}
