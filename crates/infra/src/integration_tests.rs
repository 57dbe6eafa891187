//! Integration tests across the whole ledger.
//!
//! Tests: LedgerService → components → LedgerStore → notification bus
//!
//! Verifies:
//! - End-to-end balance scenarios
//! - Concurrent requests against a file-backed store serialize correctly
//! - Notifications are published only for committed operations
//! - Backup and restore round the whole database

use std::path::Path;
use std::sync::mpsc;

use labelledger_core::{DomainError, Money, UserId};
use labelledger_events::{EventBus, Subscription};
use labelledger_royalties::{
    LedgerNotification, Month, NewEarning, NewWithdrawal, SharePercent, UserRole, WithdrawalDecision, WithdrawalStatus,
};
use proptest::prelude::*;

use crate::balance::BalanceLedger;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::service::{LedgerService, NotificationBus};
use crate::store::{now, LedgerStore};
use crate::users::UserDirectory;

fn earning(user_id: UserId, cents: i64) -> NewEarning {
    NewEarning {
        user_id,
        month: Month::parse("2024-06").unwrap(),
        amount: Money::from_cents(cents),
        streams: 42_000,
        downloads: 12,
    }
}

fn withdrawal(user_id: UserId, cents: i64) -> NewWithdrawal {
    NewWithdrawal {
        user_id,
        amount: Money::from_cents(cents),
        method: "bank_transfer".to_string(),
        details: "DE89370400440532013000".to_string(),
    }
}

async fn file_service(dir: &Path) -> LedgerService {
    let config = LedgerConfig {
        database_url: format!("sqlite://{}", dir.join("ledger.db").display()),
        max_connections: 4,
        ..LedgerConfig::default()
    };
    LedgerService::open(&config).await.unwrap()
}

#[tokio::test]
async fn earn_withdraw_reject_overdraw() {
    let ledger = LedgerService::in_memory().await.unwrap();
    let user = ledger.register_user("artist@label.com", UserRole::Artist).await.unwrap().id;
    assert_eq!(ledger.balance(user).await.unwrap(), Money::ZERO);

    ledger.create_earning(earning(user, 10_000)).await.unwrap();
    assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(10_000));

    let w = ledger.create_withdrawal(withdrawal(user, 6_000)).await.unwrap();
    assert_eq!(w.status, WithdrawalStatus::Pending);
    assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(4_000));

    ledger
        .update_withdrawal_status(w.id, WithdrawalDecision::reject(Some("IBAN mismatch".to_string())))
        .await
        .unwrap();
    assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(10_000));

    let err = ledger.create_withdrawal(withdrawal(user, 15_000)).await.unwrap_err();
    assert!(err.is_insufficient_funds());
    assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(10_000));
}

#[tokio::test]
async fn earning_round_trip_restores_balance() {
    let ledger = LedgerService::in_memory().await.unwrap();
    let user = ledger.register_user("artist@label.com", UserRole::Artist).await.unwrap().id;
    ledger.create_earning(earning(user, 2_500)).await.unwrap();
    let before = ledger.balance(user).await.unwrap();

    let e = ledger.create_earning(earning(user, 7_777)).await.unwrap();
    ledger.delete_earning(e.id).await.unwrap();
    assert_eq!(ledger.balance(user).await.unwrap(), before);
}

#[tokio::test]
async fn withdrawal_below_minimum_is_refused() {
    let ledger = LedgerService::in_memory().await.unwrap();
    let user = ledger.register_user("artist@label.com", UserRole::Artist).await.unwrap().id;
    ledger.create_earning(earning(user, 10_000)).await.unwrap();

    let err = ledger.create_withdrawal(withdrawal(user, 4_999)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Domain(DomainError::Validation(_))));
    assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(10_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_withdrawals_cannot_overdraw() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = file_service(dir.path()).await;
    let user = ledger.register_user("artist@label.com", UserRole::Artist).await.unwrap().id;
    ledger.create_earning(earning(user, 10_000)).await.unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.create_withdrawal(withdrawal(user, 6_000)).await })
        })
        .collect();

    let mut ok = 0;
    let mut refused = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) if e.is_insufficient_funds() => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok, refused), (1, 1));
    assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(4_000));
    assert_eq!(ledger.list_withdrawals(user, None).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rejections_refund_once() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = file_service(dir.path()).await;
    let user = ledger.register_user("artist@label.com", UserRole::Artist).await.unwrap().id;
    ledger.create_earning(earning(user, 10_000)).await.unwrap();
    let w = ledger.create_withdrawal(withdrawal(user, 6_000)).await.unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .update_withdrawal_status(w.id, WithdrawalDecision::reject(None))
                    .await
            })
        })
        .collect();

    let mut changed = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().changed() {
            changed += 1;
        }
    }
    assert_eq!(changed, 1);
    assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(10_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invite_acceptance_adds_one_member() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = file_service(dir.path()).await;
    let owner = ledger.register_user("owner@label.com", UserRole::Artist).await.unwrap().id;
    let a = ledger.register_user("a@label.com", UserRole::Artist).await.unwrap().id;
    let b = ledger.register_user("b@label.com", UserRole::Artist).await.unwrap().id;

    let (team, _) = ledger.create_team(owner, "Band").await.unwrap();
    let invite = ledger
        .invite_to_team(team.id, "a@label.com", SharePercent::from_percent(20).unwrap())
        .await
        .unwrap();

    let tasks: Vec<_> = [a, b]
        .into_iter()
        .map(|user| {
            let ledger = ledger.clone();
            let code = invite.code.clone();
            tokio::spawn(async move { ledger.accept_team_invite(&code, user).await })
        })
        .collect();

    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(LedgerError::Domain(DomainError::AlreadyConsumed)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(ledger.list_members(team.id).await.unwrap().len(), 2);
}

fn received(sub: &Subscription<LedgerNotification>) -> Vec<&'static str> {
    use labelledger_events::Event;
    sub.drain().iter().map(|n| n.event_type()).collect()
}

#[tokio::test]
async fn notifications_follow_commits_only() {
    let ledger = LedgerService::in_memory().await.unwrap();
    let sub = ledger.subscribe();
    let user = ledger.register_user("artist@label.com", UserRole::Artist).await.unwrap().id;

    let e = ledger.create_earning(earning(user, 10_000)).await.unwrap();
    let w = ledger.create_withdrawal(withdrawal(user, 6_000)).await.unwrap();
    assert_eq!(received(&sub), ["ledger.earning.posted", "ledger.withdrawal.requested"]);

    // Failed operations stay silent.
    ledger.create_withdrawal(withdrawal(user, 50_000)).await.unwrap_err();
    ledger.delete_earning(e.id).await.unwrap_err();
    assert!(received(&sub).is_empty());

    ledger
        .update_withdrawal_status(w.id, WithdrawalDecision::reject(None))
        .await
        .unwrap();
    ledger
        .update_withdrawal_status(w.id, WithdrawalDecision::reject(None))
        .await
        .unwrap();
    let notes = sub.drain();
    assert_eq!(notes.len(), 1);
    assert!(matches!(
        &notes[0],
        LedgerNotification::WithdrawalResolved { status: WithdrawalStatus::Rejected, user_id, .. } if *user_id == user
    ));
}

#[tokio::test]
async fn user_deletion_is_announced() {
    let ledger = LedgerService::in_memory().await.unwrap();
    let user = ledger.register_user("artist@label.com", UserRole::Artist).await.unwrap().id;
    let sub = ledger.subscribe();

    let report = ledger.delete_user(user).await.unwrap();
    assert_eq!(report.rows("users"), 1);
    assert_eq!(received(&sub), ["users.user.deleted"]);

    assert!(ledger.delete_user(user).await.unwrap_err().is_not_found());
    assert!(received(&sub).is_empty());
}

/// A bus that refuses every message.
#[derive(Debug, Clone)]
struct BrokenBus;

impl EventBus<LedgerNotification> for BrokenBus {
    type Error = &'static str;

    fn publish(&self, _message: LedgerNotification) -> Result<(), Self::Error> {
        Err("bus unavailable")
    }

    fn subscribe(&self) -> Subscription<LedgerNotification> {
        let (_tx, rx) = mpsc::channel();
        Subscription::new(rx)
    }
}

#[tokio::test]
async fn bus_failure_does_not_undo_committed_work() {
    let store = LedgerStore::in_memory().await.unwrap();
    let ledger = LedgerService::new(store, &LedgerConfig::default(), BrokenBus);
    let user = ledger.register_user("artist@label.com", UserRole::Artist).await.unwrap().id;

    ledger.create_earning(earning(user, 10_000)).await.unwrap();
    assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(10_000));
}

#[tokio::test]
async fn restore_brings_back_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = file_service(dir.path()).await;
    let user = ledger.register_user("artist@label.com", UserRole::Artist).await.unwrap().id;
    ledger.create_earning(earning(user, 10_000)).await.unwrap();

    let snapshot = dir.path().join("snapshot.db");
    ledger.store().backup_to(&snapshot).await.unwrap();

    ledger.create_earning(earning(user, 5_000)).await.unwrap();
    let late = ledger.register_user("late@label.com", UserRole::Artist).await.unwrap().id;
    assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(15_000));

    ledger.store().restore_from(&snapshot).await.unwrap();

    assert_eq!(ledger.balance(user).await.unwrap(), Money::from_cents(10_000));
    assert_eq!(ledger.list_earnings(user).await.unwrap().len(), 1);
    assert!(ledger.get_user(late).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn memory_store_can_be_backed_up_into_a_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let source = LedgerService::in_memory().await.unwrap();
    let user = source.register_user("artist@label.com", UserRole::Artist).await.unwrap().id;
    source.create_earning(earning(user, 1_234)).await.unwrap();

    let snapshot = dir.path().join("memory.db");
    source.store().backup_to(&snapshot).await.unwrap();

    let target = file_service(dir.path()).await;
    target.store().restore_from(&snapshot).await.unwrap();
    assert_eq!(target.balance(user).await.unwrap(), Money::from_cents(1_234));
}

#[tokio::test]
async fn stale_invites_are_swept_through_the_service() {
    let config = LedgerConfig {
        invite_ttl_days: 1,
        ..LedgerConfig::default()
    };
    let store = LedgerStore::in_memory().await.unwrap();
    let ledger = LedgerService::new(store, &config, NotificationBus::default());
    let owner = ledger.register_user("owner@label.com", UserRole::Artist).await.unwrap().id;
    let (team, _) = ledger.create_team(owner, "Band").await.unwrap();
    let invite = ledger
        .invite_to_team(team.id, "guest@label.com", SharePercent::from_percent(10).unwrap())
        .await
        .unwrap();

    assert_eq!(invite.expires_at - invite.created_at, chrono::Duration::days(1));
    // Nothing is due yet.
    assert_eq!(ledger.expire_stale_invites().await.unwrap(), 0);
}

#[derive(Debug, Clone)]
enum Op {
    Credit(i64),
    Debit(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(1i64..5_000).prop_map(Op::Credit), (1i64..5_000).prop_map(Op::Debit)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn balance_never_goes_negative(ops in prop::collection::vec(op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let store = LedgerStore::in_memory().await.unwrap();
            let user = UserDirectory::new(store.clone())
                .register("artist@label.com", UserRole::Artist, now())
                .await
                .unwrap()
                .id;
            let ledger = BalanceLedger::new(store);
            let mut expected = 0i64;

            for op in ops {
                match op {
                    Op::Credit(cents) => {
                        ledger.credit(user, Money::from_cents(cents)).await.unwrap();
                        expected += cents;
                    }
                    Op::Debit(cents) => match ledger.debit(user, Money::from_cents(cents)).await {
                        Ok(_) => expected -= cents,
                        Err(e) => assert!(e.is_insufficient_funds() && cents > expected),
                    },
                }
                let balance = ledger.balance(user).await.unwrap();
                assert!(!balance.is_negative());
                assert_eq!(balance, Money::from_cents(expected));
            }
        });
    }
}

