use crate::domain::packages::PackageRecord;
use crate::domain::types::{AccountKey, Category, PackageId, UserId};
use crate::error::CreditsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregate of the Active package record and the credit counter for one
/// (user, category) pair. Both halves are always loaded and written together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    pub key: AccountKey,
    pub active: Option<PackageRecord>,
    pub counter: i64,
}

impl CreditAccount {
    pub fn empty(key: AccountKey) -> Self {
        Self {
            key,
            active: None,
            counter: 0,
        }
    }

    /// Credits a client may book, never negative.
    pub fn available_credits(&self) -> i64 {
        self.counter.max(0)
    }

    /// Counter as stored, including any overdraft.
    pub fn raw_counter(&self) -> i64 {
        self.counter
    }

    pub fn is_unlimited(&self) -> bool {
        self.active
            .as_ref()
            .map(PackageRecord::is_unlimited)
            .unwrap_or(false)
    }
}

/// What caused a counter mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    PackageCreated,
    Deducted,
    Restored,
    Renewed,
    Expired,
    Cancelled,
    /// Counter left over with no Active package behind it
    OrphanCleared,
}

impl LedgerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEventKind::PackageCreated => "package_created",
            LedgerEventKind::Deducted => "deducted",
            LedgerEventKind::Restored => "restored",
            LedgerEventKind::Renewed => "renewed",
            LedgerEventKind::Expired => "expired",
            LedgerEventKind::Cancelled => "cancelled",
            LedgerEventKind::OrphanCleared => "orphan_cleared",
        }
    }
}

impl fmt::Display for LedgerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerEventKind {
    type Err = CreditsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "package_created" => Ok(LedgerEventKind::PackageCreated),
            "deducted" => Ok(LedgerEventKind::Deducted),
            "restored" => Ok(LedgerEventKind::Restored),
            "renewed" => Ok(LedgerEventKind::Renewed),
            "expired" => Ok(LedgerEventKind::Expired),
            "cancelled" => Ok(LedgerEventKind::Cancelled),
            "orphan_cleared" => Ok(LedgerEventKind::OrphanCleared),
            other => Err(CreditsError::InvalidPackage {
                reason: format!("unknown ledger event kind '{other}'"),
            }),
        }
    }
}

/// One row of the append-only ledger audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: i64,
    pub user_id: UserId,
    pub category: Category,
    pub kind: LedgerEventKind,
    pub package_id: Option<PackageId>,
    pub counter_after: i64,
    pub created_at: DateTime<Utc>,
}
