mod common;

use chrono::Utc;
use classbook_credits::domain::{
    AccountState, AdminPolicy, Category, CreditOperations, LedgerEventKind, Reconciler,
};
use classbook_credits::storage::CreditAccountRepository;
use classbook_credits::CreditsError;
use common::{date, key, package, TestContext};
use futures::future::join_all;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_bookings_never_overdraw() {
    let ctx = TestContext::new(date(2025, 1, 15), AdminPolicy::Override).await;
    let account = key("busy-client", Category::Group);

    ctx.ledger
        .create_package_record(package(
            "busy-client",
            Category::Group,
            8,
            date(2025, 1, 1),
            date(2025, 1, 31),
            false,
            0,
        ))
        .await
        .unwrap();

    let attempts = (0..20).map(|_| {
        let ledger = ctx.ledger.clone();
        let account = account.clone();
        tokio::spawn(async move { ledger.deduct(&account).await })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let booked = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(CreditsError::InsufficientCredit { .. })))
        .count();

    assert_eq!(booked, 8);
    assert_eq!(rejected, 12);
    assert_eq!(ctx.repository.balance(&account).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_bookings_and_cancellations_balance_out() {
    let ctx = TestContext::new(date(2025, 1, 15), AdminPolicy::Override).await;
    let account = key("mixed-client", Category::Private);

    ctx.ledger
        .create_package_record(package(
            "mixed-client",
            Category::Private,
            50,
            date(2025, 1, 1),
            date(2025, 1, 31),
            false,
            0,
        ))
        .await
        .unwrap();

    let tasks = (0..30).map(|i| {
        let ledger = ctx.ledger.clone();
        let account = account.clone();
        tokio::spawn(async move {
            if i % 3 == 0 {
                ledger.restore(&account).await.map(|_| ())
            } else {
                ledger.deduct(&account).await.map(|_| ())
            }
        })
    });

    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }

    // 20 deductions, 10 restorations
    assert_eq!(ctx.repository.balance(&account).await.unwrap(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_reconciles_apply_one_renewal() {
    let ctx = TestContext::new(date(2025, 1, 10), AdminPolicy::Override).await;
    let account = key("lapsed-client", Category::Group);

    ctx.ledger
        .create_package_record(package(
            "lapsed-client",
            Category::Group,
            4,
            date(2025, 1, 1),
            date(2025, 1, 20),
            true,
            3,
        ))
        .await
        .unwrap();
    ctx.clock.set(date(2025, 1, 25));

    let attempts = (0..10).map(|_| {
        let ledger = ctx.ledger.clone();
        let account = account.clone();
        tokio::spawn(async move { ledger.reconcile(&account).await })
    });

    let states: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().state)
        .collect();

    assert_eq!(
        states
            .iter()
            .filter(|s| **s == AccountState::RenewedActive)
            .count(),
        1
    );

    let record = ctx.ledger.active_package(&account).await.unwrap().unwrap();
    assert_eq!(record.renewal_months_remaining, 2);
    assert_eq!(record.end_date, date(2025, 1, 31));

    let renewals = ctx
        .ledger
        .ledger_events(&account, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == LedgerEventKind::Renewed)
        .count();
    assert_eq!(renewals, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_processes_cannot_double_renew() {
    let ctx = TestContext::new(date(2025, 1, 10), AdminPolicy::Override).await;
    let other = ctx.second_process(AdminPolicy::Override);
    let account = key("shared-client", Category::Private);

    ctx.ledger
        .create_package_record(package(
            "shared-client",
            Category::Private,
            6,
            date(2025, 1, 1),
            date(2025, 1, 20),
            true,
            4,
        ))
        .await
        .unwrap();
    ctx.clock.set(date(2025, 1, 25));

    let ledgers = [ctx.ledger.clone(), other.clone(), ctx.ledger.clone(), other];
    let attempts = ledgers.into_iter().map(|ledger| {
        let account = account.clone();
        tokio::spawn(async move { ledger.reconcile(&account).await })
    });

    let mut renewed = 0;
    for joined in join_all(attempts).await {
        match joined.unwrap() {
            Ok(reconciliation) if reconciliation.state == AccountState::RenewedActive => {
                renewed += 1
            }
            Ok(_) => {}
            Err(CreditsError::ConcurrentModification { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(renewed, 1);

    let record = ctx
        .repository
        .active_record(&account)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.renewal_months_remaining, 3);
    assert_eq!(ctx.repository.balance(&account).await.unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_accounts_proceed_independently() {
    let ctx = TestContext::new(date(2025, 1, 15), AdminPolicy::Override).await;

    let users: Vec<String> = (0..8).map(|i| format!("client-{i}")).collect();
    for user in &users {
        for category in Category::ALL {
            ctx.ledger
                .create_package_record(package(
                    user,
                    category,
                    3,
                    date(2025, 1, 1),
                    date(2025, 1, 31),
                    false,
                    0,
                ))
                .await
                .unwrap();
        }
    }

    let mut tasks = Vec::new();
    for user in &users {
        for category in Category::ALL {
            let ledger = ctx.ledger.clone();
            let account = key(user, category);
            tasks.push(tokio::spawn(async move {
                for _ in 0..3 {
                    ledger.deduct(&account).await?;
                }
                Ok::<_, CreditsError>(())
            }));
        }
    }

    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }

    for user in &users {
        for category in Category::ALL {
            assert_eq!(
                ctx.repository.balance(&key(user, category)).await.unwrap(),
                0
            );
        }
    }
}

#[tokio::test]
async fn test_stale_orphan_clear_cannot_wipe_new_package() {
    let ctx = TestContext::new(date(2025, 1, 15), AdminPolicy::Override).await;
    let account = key("returning-client", Category::Group);

    for _ in 0..8 {
        ctx.repository.restore(&account).await.unwrap();
    }

    // Plan read before another process assigns a package with the same counter
    let before = ctx.repository.load_account(&account).await.unwrap();
    let plan = Reconciler::reconcile(&before, date(2025, 1, 15), AdminPolicy::Override);
    assert_eq!(plan.state, AccountState::NoActivePackage);
    let changes = plan.changes.expect("stray counter must be cleared");

    let created = ctx
        .repository
        .create_record(
            &package(
                "returning-client",
                Category::Group,
                8,
                date(2025, 1, 15),
                date(2025, 2, 14),
                false,
                0,
            ),
            Utc::now(),
        )
        .await
        .unwrap();

    let err = ctx
        .repository
        .apply_reconciliation(&before, &changes)
        .await
        .unwrap_err();
    assert!(matches!(err, CreditsError::ConcurrentModification { .. }));

    let active = ctx.repository.active_record(&account).await.unwrap().unwrap();
    assert_eq!(active.id, created.id);
    assert_eq!(ctx.repository.balance(&account).await.unwrap(), 8);

    let cleared = ctx
        .ledger
        .ledger_events(&account, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == LedgerEventKind::OrphanCleared)
        .count();
    assert_eq!(cleared, 0);
}

#[tokio::test]
async fn test_orphan_clear_lands_when_account_is_unchanged() {
    let ctx = TestContext::new(date(2025, 1, 15), AdminPolicy::Override).await;
    let account = key("lapsed-client", Category::Private);

    for _ in 0..3 {
        ctx.repository.restore(&account).await.unwrap();
    }

    let before = ctx.repository.load_account(&account).await.unwrap();
    let plan = Reconciler::reconcile(&before, date(2025, 1, 15), AdminPolicy::Override);
    let changes = plan.changes.expect("stray counter must be cleared");

    ctx.repository
        .apply_reconciliation(&before, &changes)
        .await
        .unwrap();
    assert_eq!(ctx.repository.balance(&account).await.unwrap(), 0);
}
