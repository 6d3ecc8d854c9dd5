//! Date-driven state machine that brings a package record and its credit
//! counter back into agreement.
//!
//! The functions here are pure: they take the account as loaded, the
//! current date and the admin policy, and describe the writes needed.
//! Persisting those writes atomically is the repository's job.
//!
//! Per (user, category) an account is in one of these states:
//!
//! - `NoActivePackage`: no Active record; the counter must be 0.
//! - `ValidActive`: Active record with `end_date >= today`.
//! - `LapsedActive`: Active record with `end_date < today`. Only ever an
//!   input; reconciling it yields one of the two states below.
//! - `RenewedActive`: a renewal cycle was consumed and the counter reset.
//! - `ExhaustedExpired`: the record was expired and the counter left at 0.
//!
//! One call applies at most one renewal step, even when several periods
//! have elapsed since the account was last reconciled.

use crate::domain::credits::{CreditAccount, LedgerEventKind};
use crate::domain::packages::PackageRecord;
use crate::domain::types::{AdminPolicy, PackageStatus, RENEWAL_PERIOD_DAYS};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    NoActivePackage,
    ValidActive,
    RenewedActive,
    ExhaustedExpired,
}

impl std::fmt::Display for AccountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountState::NoActivePackage => write!(f, "no_active_package"),
            AccountState::ValidActive => write!(f, "valid_active"),
            AccountState::RenewedActive => write!(f, "renewed_active"),
            AccountState::ExhaustedExpired => write!(f, "exhausted_expired"),
        }
    }
}

/// Writes a reconciliation needs, committed as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountChanges {
    /// Updated record, `None` when only the counter changes
    pub record: Option<PackageRecord>,
    pub counter: i64,
    pub event: LedgerEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub state: AccountState,
    pub changes: Option<AccountChanges>,
}

impl Reconciliation {
    fn unchanged(state: AccountState) -> Self {
        Self {
            state,
            changes: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.changes.is_none()
    }

    /// Counter the account holds once the changes are applied.
    pub fn counter_after(&self, account: &CreditAccount) -> i64 {
        self.changes
            .as_ref()
            .map(|c| c.counter)
            .unwrap_or(account.counter)
    }
}

/// End date after `renewals_applied` renewal cycles, always measured from the
/// original start date rather than compounded from the previous end date.
pub fn renewal_end_date(start_date: NaiveDate, renewals_applied: i64) -> NaiveDate {
    start_date + Duration::days(RENEWAL_PERIOD_DAYS * renewals_applied)
}

/// The reconciliation engine. Stateless; the admin policy is passed in per call.
pub struct Reconciler;

impl Reconciler {
    pub fn reconcile(
        account: &CreditAccount,
        today: NaiveDate,
        policy: AdminPolicy,
    ) -> Reconciliation {
        let Some(active) = account.active.as_ref() else {
            if account.counter == 0 {
                return Reconciliation::unchanged(AccountState::NoActivePackage);
            }
            return Reconciliation {
                state: AccountState::NoActivePackage,
                changes: Some(AccountChanges {
                    record: None,
                    counter: 0,
                    event: LedgerEventKind::OrphanCleared,
                }),
            };
        };

        if active.covers(today) {
            return Reconciliation::unchanged(AccountState::ValidActive);
        }

        // Lapsed: the entitlement ends the moment the date passes, renewal or not.
        let previous_counter = account.counter;
        let mut record = active.clone();

        if !record.can_renew() {
            record.status = PackageStatus::Expired;
            return Self::exhausted(record);
        }

        record.renewal_months_remaining -= 1;
        record.end_date = renewal_end_date(record.start_date, record.renewals_applied());
        record.last_renewal_date = Some(today);

        if record.renewal_months_remaining == 0 {
            record.status = PackageStatus::Expired;
            return Self::exhausted(record);
        }

        let counter = policy.renewed_counter(record.classes_included, previous_counter);
        Reconciliation {
            state: AccountState::RenewedActive,
            changes: Some(AccountChanges {
                record: Some(record),
                counter,
                event: LedgerEventKind::Renewed,
            }),
        }
    }

    fn exhausted(record: PackageRecord) -> Reconciliation {
        Reconciliation {
            state: AccountState::ExhaustedExpired,
            changes: Some(AccountChanges {
                record: Some(record),
                counter: 0,
                event: LedgerEventKind::Expired,
            }),
        }
    }
}
