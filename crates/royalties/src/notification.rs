use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labelledger_core::{EarningId, InviteId, Money, TeamId, UserId, WithdrawalId};
use labelledger_events::Event;

use crate::earning::Month;
use crate::withdrawal::WithdrawalStatus;

/// Something a user should be told about, published only after the ledger
/// change it describes has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerNotification {
    EarningPosted {
        user_id: UserId,
        earning_id: EarningId,
        month: Month,
        amount: Money,
        at: DateTime<Utc>,
    },
    EarningReversed {
        user_id: UserId,
        earning_id: EarningId,
        amount: Money,
        at: DateTime<Utc>,
    },
    WithdrawalRequested {
        user_id: UserId,
        withdrawal_id: WithdrawalId,
        amount: Money,
        at: DateTime<Utc>,
    },
    WithdrawalResolved {
        user_id: UserId,
        withdrawal_id: WithdrawalId,
        status: WithdrawalStatus,
        amount: Money,
        note: Option<String>,
        at: DateTime<Utc>,
    },
    InviteCreated {
        team_id: TeamId,
        invite_id: InviteId,
        email: String,
        at: DateTime<Utc>,
    },
    InviteAccepted {
        team_id: TeamId,
        user_id: UserId,
        at: DateTime<Utc>,
    },
    MemberRemoved {
        team_id: TeamId,
        user_id: UserId,
        at: DateTime<Utc>,
    },
    TeamDeleted {
        team_id: TeamId,
        at: DateTime<Utc>,
    },
    UserDeleted {
        user_id: UserId,
        at: DateTime<Utc>,
    },
}

impl LedgerNotification {
    /// The user whose inbox this lands in, when there is exactly one.
    pub fn recipient(&self) -> Option<UserId> {
        match self {
            LedgerNotification::EarningPosted { user_id, .. }
            | LedgerNotification::EarningReversed { user_id, .. }
            | LedgerNotification::WithdrawalRequested { user_id, .. }
            | LedgerNotification::WithdrawalResolved { user_id, .. }
            | LedgerNotification::InviteAccepted { user_id, .. }
            | LedgerNotification::MemberRemoved { user_id, .. } => Some(*user_id),
            LedgerNotification::InviteCreated { .. }
            | LedgerNotification::TeamDeleted { .. }
            | LedgerNotification::UserDeleted { .. } => None,
        }
    }
}

impl Event for LedgerNotification {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerNotification::EarningPosted { .. } => "ledger.earning.posted",
            LedgerNotification::EarningReversed { .. } => "ledger.earning.reversed",
            LedgerNotification::WithdrawalRequested { .. } => "ledger.withdrawal.requested",
            LedgerNotification::WithdrawalResolved { .. } => "ledger.withdrawal.resolved",
            LedgerNotification::InviteCreated { .. } => "teams.invite.created",
            LedgerNotification::InviteAccepted { .. } => "teams.invite.accepted",
            LedgerNotification::MemberRemoved { .. } => "teams.member.removed",
            LedgerNotification::TeamDeleted { .. } => "teams.team.deleted",
            LedgerNotification::UserDeleted { .. } => "users.user.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerNotification::EarningPosted { at, .. }
            | LedgerNotification::EarningReversed { at, .. }
            | LedgerNotification::WithdrawalRequested { at, .. }
            | LedgerNotification::WithdrawalResolved { at, .. }
            | LedgerNotification::InviteCreated { at, .. }
            | LedgerNotification::InviteAccepted { at, .. }
            | LedgerNotification::MemberRemoved { at, .. }
            | LedgerNotification::TeamDeleted { at, .. }
            | LedgerNotification::UserDeleted { at, .. } => *at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_withdrawal_is_addressed_to_its_owner() {
        let user_id = UserId::new();
        let note = LedgerNotification::WithdrawalResolved {
            user_id,
            withdrawal_id: WithdrawalId::new(),
            status: WithdrawalStatus::Rejected,
            amount: Money::from_cents(6000),
            note: Some("IBAN mismatch".to_string()),
            at: Utc::now(),
        };
        assert_eq!(note.recipient(), Some(user_id));
        assert_eq!(note.event_type(), "ledger.withdrawal.resolved");
    }

    #[test]
    fn serializes_with_type_tag() {
        let note = LedgerNotification::TeamDeleted {
            team_id: TeamId::new(),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["type"], "team_deleted");
    }
}
