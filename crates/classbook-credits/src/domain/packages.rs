use crate::domain::types::{
    AccountKey, Category, PackageId, PackageStatus, UserId, UNLIMITED_CLASSES,
};
use crate::error::{CreditsError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One purchased entitlement period for a (user, category) pool.
///
/// Records are never deleted: once Expired or Cancelled they stay as history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub id: PackageId,
    pub user_id: UserId,
    pub category: Category,
    pub classes_included: i64,
    /// First day of the paid window (inclusive)
    pub start_date: NaiveDate,
    /// Last day of the paid window (inclusive)
    pub end_date: NaiveDate,
    pub status: PackageStatus,
    pub auto_renew: bool,
    /// Renewal cycles bought with the package, kept as the basis for end date arithmetic
    pub renewal_months_purchased: i64,
    pub renewal_months_remaining: i64,
    pub last_renewal_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PackageRecord {
    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.user_id.clone(), self.category)
    }

    pub fn is_active(&self) -> bool {
        self.status == PackageStatus::Active
    }

    pub fn is_unlimited(&self) -> bool {
        self.classes_included >= UNLIMITED_CLASSES
    }

    /// The paid window still covers `today`.
    pub fn covers(&self, today: NaiveDate) -> bool {
        self.end_date >= today
    }

    pub fn can_renew(&self) -> bool {
        self.auto_renew && self.renewal_months_remaining > 0
    }

    /// Renewal cycles consumed so far, never less than one once a renewal has happened.
    pub fn renewals_applied(&self) -> i64 {
        (self.renewal_months_purchased - self.renewal_months_remaining).max(1)
    }
}

/// Input of the purchase/assignment flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPackageRecord {
    pub user_id: UserId,
    pub category: Category,
    pub classes_included: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub auto_renew: bool,
    pub renewal_months: i64,
}

impl NewPackageRecord {
    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.user_id.clone(), self.category)
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.as_str().trim().is_empty() {
            return Err(CreditsError::InvalidPackage {
                reason: "user id must not be empty".to_string(),
            });
        }
        if self.classes_included <= 0 {
            return Err(CreditsError::InvalidPackage {
                reason: format!(
                    "classes included must be positive, got {}",
                    self.classes_included
                ),
            });
        }
        if self.start_date > self.end_date {
            return Err(CreditsError::InvalidPackage {
                reason: format!(
                    "start date {} is after end date {}",
                    self.start_date, self.end_date
                ),
            });
        }
        if self.renewal_months < 0 {
            return Err(CreditsError::InvalidPackage {
                reason: format!(
                    "renewal months must not be negative, got {}",
                    self.renewal_months
                ),
            });
        }
        Ok(())
    }

    pub fn into_record(self, created_at: DateTime<Utc>) -> PackageRecord {
        PackageRecord {
            id: PackageId::new(),
            user_id: self.user_id,
            category: self.category,
            classes_included: self.classes_included,
            start_date: self.start_date,
            end_date: self.end_date,
            status: PackageStatus::Active,
            auto_renew: self.auto_renew,
            renewal_months_purchased: self.renewal_months,
            renewal_months_remaining: self.renewal_months,
            last_renewal_date: None,
            created_at,
            updated_at: created_at,
        }
    }
}
