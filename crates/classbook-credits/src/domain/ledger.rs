use crate::domain::clock::Clock;
use crate::domain::credits::{CreditAccount, LedgerEvent};
use crate::domain::packages::{NewPackageRecord, PackageRecord};
use crate::domain::policy::AdminPolicyHandle;
use crate::domain::reconciler::{AccountState, Reconciler, Reconciliation};
use crate::domain::types::{AccountKey, Category, PackageId, PackageStatus, UserId};
use crate::error::{CreditsError, Result};
use crate::storage::{AccountLocks, CreditAccountRepository};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of reconciling a batch of lapsed accounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: usize,
    pub renewed: usize,
    pub expired: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, state: AccountState) {
        match state {
            AccountState::RenewedActive => self.renewed += 1,
            AccountState::ExhaustedExpired => self.expired += 1,
            AccountState::NoActivePackage | AccountState::ValidActive => {}
        }
    }
}

/// Current Active package of a user in one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePackage {
    pub category: Category,
    pub record: Option<PackageRecord>,
}

/// Entry point for every booking, cancellation and administrative flow.
///
/// Every credit-sensitive call reconciles the account first, under a lock
/// held for the whole reconcile, check, mutate sequence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CreditOperations: Send + Sync {
    async fn reconcile(&self, key: &AccountKey) -> Result<Reconciliation>;
    async fn get_available_credits(&self, key: &AccountKey) -> Result<i64>;
    async fn get_account(&self, key: &AccountKey) -> Result<CreditAccount>;
    /// Consumes one credit for a confirmed booking. Returns the new counter.
    async fn deduct(&self, key: &AccountKey) -> Result<i64>;
    /// Gives one credit back for a cancelled booking. Returns the new counter.
    async fn restore(&self, key: &AccountKey) -> Result<i64>;
    async fn create_package_record(&self, new: NewPackageRecord) -> Result<PackageRecord>;
    async fn set_status(&self, id: &PackageId, status: PackageStatus) -> Result<PackageRecord>;
    async fn package_history(&self, user_id: &UserId) -> Result<Vec<PackageRecord>>;
    async fn active_package(&self, key: &AccountKey) -> Result<Option<PackageRecord>>;
    async fn active_packages(&self, user_id: &UserId) -> Result<Vec<ActivePackage>>;
    async fn ledger_events(&self, key: &AccountKey, limit: i64) -> Result<Vec<LedgerEvent>>;
    async fn reconcile_lapsed(&self, limit: i64) -> Result<SweepReport>;
}

pub struct CreditLedgerService {
    repository: Arc<dyn CreditAccountRepository>,
    clock: Arc<dyn Clock>,
    policy: AdminPolicyHandle,
    locks: AccountLocks,
}

impl CreditLedgerService {
    pub fn new(
        repository: Arc<dyn CreditAccountRepository>,
        clock: Arc<dyn Clock>,
        policy: AdminPolicyHandle,
    ) -> Self {
        Self {
            repository,
            clock,
            policy,
            locks: AccountLocks::new(),
        }
    }

    pub fn policy(&self) -> &AdminPolicyHandle {
        &self.policy
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Runs one reconciliation step. The caller must hold the account lock.
    async fn reconcile_locked(&self, key: &AccountKey) -> Result<(CreditAccount, Reconciliation)> {
        let account = self.repository.load_account(key).await?;
        let today = self.clock.today();
        let policy = self.policy.get();
        let reconciliation = Reconciler::reconcile(&account, today, policy);

        let Some(changes) = &reconciliation.changes else {
            debug!("Account {} is {} on {}", key, reconciliation.state, today);
            return Ok((account, reconciliation));
        };

        self.repository
            .apply_reconciliation(&account, changes)
            .await?;

        match (reconciliation.state, &changes.record) {
            (AccountState::RenewedActive, Some(record)) => info!(
                "Renewed package {} for {}: {} cycle(s) left, valid until {}, counter {} -> {} ({} policy)",
                record.id,
                key,
                record.renewal_months_remaining,
                record.end_date,
                account.counter,
                changes.counter,
                policy
            ),
            (AccountState::ExhaustedExpired, Some(record)) => info!(
                "Expired package {} for {} (ended {}), counter {} -> 0",
                record.id, key, record.end_date, account.counter
            ),
            _ => info!(
                "Cleared counter {} for {} with no active package",
                account.counter, key
            ),
        }

        Ok((account, reconciliation))
    }
}

#[async_trait]
impl CreditOperations for CreditLedgerService {
    async fn reconcile(&self, key: &AccountKey) -> Result<Reconciliation> {
        let _guard = self.locks.lock(key).await;
        let (_, reconciliation) = self.reconcile_locked(key).await?;
        Ok(reconciliation)
    }

    async fn get_available_credits(&self, key: &AccountKey) -> Result<i64> {
        let _guard = self.locks.lock(key).await;
        let (account, reconciliation) = self.reconcile_locked(key).await?;
        Ok(reconciliation.counter_after(&account).max(0))
    }

    async fn get_account(&self, key: &AccountKey) -> Result<CreditAccount> {
        let _guard = self.locks.lock(key).await;
        let (account, reconciliation) = self.reconcile_locked(key).await?;
        if reconciliation.is_noop() {
            return Ok(account);
        }
        self.repository.load_account(key).await
    }

    async fn deduct(&self, key: &AccountKey) -> Result<i64> {
        let _guard = self.locks.lock(key).await;
        let (account, reconciliation) = self.reconcile_locked(key).await?;

        let insufficient = || CreditsError::InsufficientCredit {
            user_id: key.user_id.to_string(),
            category: key.category,
        };

        let available = reconciliation.counter_after(&account);
        if available <= 0 {
            warn!(
                "Rejected deduct for {}: counter is {} ({})",
                key, available, reconciliation.state
            );
            return Err(insufficient());
        }

        match self.repository.deduct(key).await? {
            Some(counter) => {
                debug!("Deducted one credit from {}, {} left", key, counter);
                Ok(counter)
            }
            None => {
                warn!("Rejected deduct for {}: counter dropped to 0", key);
                Err(insufficient())
            }
        }
    }

    async fn restore(&self, key: &AccountKey) -> Result<i64> {
        let _guard = self.locks.lock(key).await;
        let (account, _) = self.reconcile_locked(key).await?;

        let counter = self.repository.restore(key).await?;
        if let Some(active) = &account.active {
            if counter > active.classes_included && !active.is_unlimited() {
                debug!(
                    "Counter for {} is {} after restore, above the {} included classes",
                    key, counter, active.classes_included
                );
            }
        }
        debug!("Restored one credit to {}, now {}", key, counter);
        Ok(counter)
    }

    async fn create_package_record(&self, new: NewPackageRecord) -> Result<PackageRecord> {
        new.validate()?;
        let key = new.key();

        let _guard = self.locks.lock(&key).await;
        let record = self.repository.create_record(&new, Utc::now()).await?;

        info!(
            "Created package {} for {}: {} classes, {} to {}, auto_renew={}, {} renewal cycle(s)",
            record.id,
            key,
            record.classes_included,
            record.start_date,
            record.end_date,
            record.auto_renew,
            record.renewal_months_remaining
        );
        Ok(record)
    }

    async fn set_status(&self, id: &PackageId, status: PackageStatus) -> Result<PackageRecord> {
        let current = self
            .repository
            .get_record(id)
            .await?
            .ok_or_else(|| CreditsError::RecordNotFound { id: id.to_string() })?;

        if !current.status.can_transition_to(status) {
            return Err(CreditsError::InvalidStatusTransition {
                id: id.to_string(),
                from: current.status,
                to: status,
            });
        }

        let key = current.key();
        let _guard = self.locks.lock(&key).await;
        let record = self.repository.set_status(id, status).await?;

        info!(
            "Package {} for {} moved from {} to {}, counter forced to 0",
            id, key, current.status, status
        );
        Ok(record)
    }

    async fn package_history(&self, user_id: &UserId) -> Result<Vec<PackageRecord>> {
        self.repository.package_history(user_id).await
    }

    async fn active_package(&self, key: &AccountKey) -> Result<Option<PackageRecord>> {
        self.repository.active_record(key).await
    }

    async fn active_packages(&self, user_id: &UserId) -> Result<Vec<ActivePackage>> {
        let mut packages = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let key = AccountKey::new(user_id.clone(), category);
            packages.push(ActivePackage {
                category,
                record: self.repository.active_record(&key).await?,
            });
        }
        Ok(packages)
    }

    async fn ledger_events(&self, key: &AccountKey, limit: i64) -> Result<Vec<LedgerEvent>> {
        self.repository.ledger_events(key, limit).await
    }

    async fn reconcile_lapsed(&self, limit: i64) -> Result<SweepReport> {
        let today = self.clock.today();
        let keys = self.repository.lapsed_accounts(today, limit).await?;

        let mut report = SweepReport {
            examined: keys.len(),
            ..SweepReport::default()
        };

        for key in keys {
            match self.reconcile(&key).await {
                Ok(reconciliation) => report.record(reconciliation.state),
                Err(e) => {
                    error!("Failed to reconcile {}: {}", key, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
