//! Ledger service facade.
//!
//! One handle over all ledger components, sharing a single store. Each
//! operation applies boundary policy (minimum withdrawal, invite lifetime),
//! stamps the current time, runs the component's transaction, and only after
//! it commits publishes a [`LedgerNotification`]. Publishing is best-effort:
//! a bus failure is logged and never turns a committed change into an error.

use std::sync::Arc;

use tracing::warn;

use labelledger_core::{DomainError, EarningId, InviteId, Money, PaymentMethodId, TeamId, UserId, WithdrawalId};
use labelledger_events::{Event, EventBus, InMemoryEventBus, Subscription};
use labelledger_royalties::{
    Earning, EarningsSummary, InviteCode, LedgerNotification, NewEarning, NewPaymentMethod, NewWithdrawal,
    PaymentMethod, PaymentMethodUpdate, SharePercent, Team, TeamInvite, TeamMember, User, UserRole, Withdrawal,
    WithdrawalDecision, WithdrawalStatus,
};

use crate::balance::BalanceLedger;
use crate::cascade::{CascadeDeletion, CascadeReport};
use crate::config::LedgerConfig;
use crate::earnings::EarningsPoster;
use crate::error::LedgerResult;
use crate::payment_methods::PaymentMethodRegistry;
use crate::store::{now, LedgerStore};
use crate::teams::{TeamDeletion, TeamSplitEngine};
use crate::users::UserDirectory;
use crate::withdrawals::{Resolution, WithdrawalProcessor};

/// Bus used when none is supplied.
pub type NotificationBus = Arc<InMemoryEventBus<LedgerNotification>>;

#[derive(Debug, Clone)]
pub struct LedgerService<B = NotificationBus> {
    store: LedgerStore,
    users: UserDirectory,
    balances: BalanceLedger,
    earnings: EarningsPoster,
    withdrawals: WithdrawalProcessor,
    payment_methods: PaymentMethodRegistry,
    teams: TeamSplitEngine,
    cascade: CascadeDeletion,
    bus: B,
    min_withdrawal: Money,
}

impl LedgerService<NotificationBus> {
    /// Connect to the configured database with an in-process bus.
    pub async fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        let store = LedgerStore::connect(config).await?;
        Ok(Self::new(store, config, NotificationBus::default()))
    }

    /// Fresh in-memory ledger with default policy.
    pub async fn in_memory() -> LedgerResult<Self> {
        let store = LedgerStore::in_memory().await?;
        Ok(Self::new(store, &LedgerConfig::default(), NotificationBus::default()))
    }
}

impl<B> LedgerService<B>
where
    B: EventBus<LedgerNotification>,
{
    pub fn new(store: LedgerStore, config: &LedgerConfig, bus: B) -> Self {
        Self {
            users: UserDirectory::new(store.clone()),
            balances: BalanceLedger::new(store.clone()),
            earnings: EarningsPoster::new(store.clone()),
            withdrawals: WithdrawalProcessor::new(store.clone()),
            payment_methods: PaymentMethodRegistry::new(store.clone()),
            teams: TeamSplitEngine::new(store.clone()).with_invite_ttl_days(config.invite_ttl_days),
            cascade: CascadeDeletion::new(store.clone()),
            store,
            bus,
            min_withdrawal: config.min_withdrawal,
        }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn subscribe(&self) -> Subscription<LedgerNotification> {
        self.bus.subscribe()
    }

    fn notify(&self, note: LedgerNotification) {
        let event_type = note.event_type();
        if let Err(err) = self.bus.publish(note) {
            warn!(event_type, error = ?err, "failed to publish ledger notification");
        }
    }

    // Users and balances

    pub async fn register_user(&self, email: &str, role: UserRole) -> LedgerResult<User> {
        self.users.register(email, role, now()).await
    }

    pub async fn get_user(&self, user_id: UserId) -> LedgerResult<User> {
        self.users.get(user_id).await
    }

    pub async fn balance(&self, user_id: UserId) -> LedgerResult<Money> {
        self.balances.balance(user_id).await
    }

    /// Remove a user and every row that references them.
    pub async fn delete_user(&self, user_id: UserId) -> LedgerResult<CascadeReport> {
        let report = self.cascade.delete_user(user_id).await?;
        self.notify(LedgerNotification::UserDeleted { user_id, at: now() });
        Ok(report)
    }

    // Earnings

    pub async fn create_earning(&self, new: NewEarning) -> LedgerResult<Earning> {
        let at = now();
        let earning = self.earnings.post(new, at).await?;
        self.notify(LedgerNotification::EarningPosted {
            user_id: earning.user_id,
            earning_id: earning.id,
            month: earning.month.clone(),
            amount: earning.amount,
            at,
        });
        Ok(earning)
    }

    pub async fn delete_earning(&self, earning_id: EarningId) -> LedgerResult<Earning> {
        let earning = self.earnings.delete(earning_id).await?;
        self.notify(LedgerNotification::EarningReversed {
            user_id: earning.user_id,
            earning_id,
            amount: earning.amount,
            at: now(),
        });
        Ok(earning)
    }

    pub async fn list_earnings(&self, user_id: UserId) -> LedgerResult<Vec<Earning>> {
        self.earnings.list_for_user(user_id).await
    }

    pub async fn earnings_summary(&self, user_id: UserId) -> LedgerResult<EarningsSummary> {
        self.earnings.summary(user_id).await
    }

    // Withdrawals

    /// Request a payout. Amounts under the configured minimum are refused
    /// before anything is written.
    pub async fn create_withdrawal(&self, new: NewWithdrawal) -> LedgerResult<Withdrawal> {
        if new.amount < self.min_withdrawal {
            return Err(DomainError::validation(format!(
                "minimum withdrawal is {}, requested {}",
                self.min_withdrawal, new.amount
            ))
            .into());
        }

        let at = now();
        let withdrawal = self.withdrawals.request(new, at).await?;
        self.notify(LedgerNotification::WithdrawalRequested {
            user_id: withdrawal.user_id,
            withdrawal_id: withdrawal.id,
            amount: withdrawal.amount,
            at,
        });
        Ok(withdrawal)
    }

    /// Resolve a withdrawal. A repeated decision returns the stored row and
    /// publishes nothing.
    pub async fn update_withdrawal_status(
        &self,
        withdrawal_id: WithdrawalId,
        decision: WithdrawalDecision,
    ) -> LedgerResult<Resolution> {
        let at = now();
        let resolution = self.withdrawals.resolve(withdrawal_id, decision, at).await?;
        if resolution.changed() {
            let w = &resolution.withdrawal;
            self.notify(LedgerNotification::WithdrawalResolved {
                user_id: w.user_id,
                withdrawal_id,
                status: w.status,
                amount: w.amount,
                note: w.note.clone(),
                at,
            });
        }
        Ok(resolution)
    }

    pub async fn get_withdrawal(&self, withdrawal_id: WithdrawalId) -> LedgerResult<Withdrawal> {
        self.withdrawals.get(withdrawal_id).await
    }

    pub async fn list_withdrawals(
        &self,
        user_id: UserId,
        status: Option<WithdrawalStatus>,
    ) -> LedgerResult<Vec<Withdrawal>> {
        self.withdrawals.list_for_user(user_id, status).await
    }

    pub async fn list_pending_withdrawals(&self) -> LedgerResult<Vec<Withdrawal>> {
        self.withdrawals.list_pending().await
    }

    // Payment methods

    pub async fn create_payment_method(&self, new: NewPaymentMethod) -> LedgerResult<PaymentMethod> {
        self.payment_methods.create(new, now()).await
    }

    pub async fn set_default_payment_method(
        &self,
        user_id: UserId,
        method_id: PaymentMethodId,
    ) -> LedgerResult<PaymentMethod> {
        self.payment_methods.set_default(user_id, method_id).await
    }

    pub async fn update_payment_method(
        &self,
        method_id: PaymentMethodId,
        update: PaymentMethodUpdate,
    ) -> LedgerResult<PaymentMethod> {
        self.payment_methods.update(method_id, update).await
    }

    pub async fn delete_payment_method(&self, method_id: PaymentMethodId) -> LedgerResult<PaymentMethod> {
        self.payment_methods.delete(method_id).await
    }

    pub async fn list_payment_methods(&self, user_id: UserId) -> LedgerResult<Vec<PaymentMethod>> {
        self.payment_methods.list_for_user(user_id).await
    }

    // Teams

    pub async fn create_team(&self, owner_id: UserId, name: &str) -> LedgerResult<(Team, TeamMember)> {
        self.teams.create_team(owner_id, name, now()).await
    }

    pub async fn delete_team(&self, team_id: TeamId) -> LedgerResult<TeamDeletion> {
        let deleted = self.teams.delete_team(team_id).await?;
        self.notify(LedgerNotification::TeamDeleted { team_id, at: now() });
        Ok(deleted)
    }

    pub async fn invite_to_team(&self, team_id: TeamId, email: &str, share: SharePercent) -> LedgerResult<TeamInvite> {
        let at = now();
        let invite = self.teams.invite(team_id, email, share, at).await?;
        self.notify(LedgerNotification::InviteCreated {
            team_id,
            invite_id: invite.id,
            email: invite.email.clone(),
            at,
        });
        Ok(invite)
    }

    pub async fn accept_team_invite(&self, code: &InviteCode, user_id: UserId) -> LedgerResult<TeamMember> {
        let at = now();
        let member = self.teams.accept_invite(code, user_id, at).await?;
        self.notify(LedgerNotification::InviteAccepted {
            team_id: member.team_id,
            user_id,
            at,
        });
        Ok(member)
    }

    pub async fn remove_team_member(&self, team_id: TeamId, user_id: UserId) -> LedgerResult<TeamMember> {
        let member = self.teams.remove_member(team_id, user_id).await?;
        self.notify(LedgerNotification::MemberRemoved {
            team_id,
            user_id,
            at: now(),
        });
        Ok(member)
    }

    pub async fn update_member_share(
        &self,
        team_id: TeamId,
        user_id: UserId,
        share: SharePercent,
    ) -> LedgerResult<TeamMember> {
        self.teams.update_member_share(team_id, user_id, share).await
    }

    pub async fn revoke_invite(&self, invite_id: InviteId) -> LedgerResult<TeamInvite> {
        self.teams.revoke_invite(invite_id).await
    }

    pub async fn expire_stale_invites(&self) -> LedgerResult<u64> {
        self.teams.expire_stale_invites(now()).await
    }

    pub async fn get_team(&self, team_id: TeamId) -> LedgerResult<Team> {
        self.teams.get_team(team_id).await
    }

    pub async fn list_members(&self, team_id: TeamId) -> LedgerResult<Vec<TeamMember>> {
        self.teams.list_members(team_id).await
    }

    pub async fn list_invites(&self, team_id: TeamId) -> LedgerResult<Vec<TeamInvite>> {
        self.teams.list_invites(team_id).await
    }

    pub async fn teams_for_user(&self, user_id: UserId) -> LedgerResult<Vec<Team>> {
        self.teams.teams_for_user(user_id).await
    }
}
