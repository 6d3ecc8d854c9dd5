use crate::error::CreditsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of one renewal window, measured from the package start date.
pub const RENEWAL_PERIOD_DAYS: i64 = 30;

/// `classes_included` value that stands for an unlimited package.
pub const UNLIMITED_CLASSES: i64 = 9999;

/// Client identifier as issued by the booking application
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Package record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageId(Uuid);

impl PackageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PackageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PackageId {
    type Err = CreditsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CreditsError::RecordNotFound { id: s.to_string() })
    }
}

/// Independent credit pools a client can hold packages in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Group,
    Private,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Group, Category::Private];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Group => "group",
            Category::Private => "private",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CreditsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "group" => Ok(Category::Group),
            "private" => Ok(Category::Private),
            _ => Err(CreditsError::InvalidCategory {
                value: s.to_string(),
            }),
        }
    }
}

/// Package record lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Active,
    Expired,
    Cancelled,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Active => "active",
            PackageStatus::Expired => "expired",
            PackageStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: PackageStatus) -> bool {
        matches!(
            (self, next),
            (PackageStatus::Active, PackageStatus::Expired)
                | (PackageStatus::Active, PackageStatus::Cancelled)
        )
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageStatus {
    type Err = CreditsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PackageStatus::Active),
            "expired" => Ok(PackageStatus::Expired),
            "cancelled" => Ok(PackageStatus::Cancelled),
            other => Err(CreditsError::InvalidPackage {
                reason: format!("unknown package status '{other}'"),
            }),
        }
    }
}

/// How a negative balance is carried across a renewal boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminPolicy {
    /// The renewed counter is the full allotment, any debt is forgiven.
    #[default]
    Override,
    /// Debt from the previous period reduces the fresh allotment.
    Deduct,
}

impl AdminPolicy {
    pub fn renewed_counter(&self, classes_included: i64, previous_counter: i64) -> i64 {
        match self {
            AdminPolicy::Override => classes_included,
            AdminPolicy::Deduct => classes_included + previous_counter.min(0),
        }
    }
}

impl fmt::Display for AdminPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminPolicy::Override => write!(f, "override"),
            AdminPolicy::Deduct => write!(f, "deduct"),
        }
    }
}

impl FromStr for AdminPolicy {
    type Err = CreditsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "override" => Ok(AdminPolicy::Override),
            "deduct" => Ok(AdminPolicy::Deduct),
            other => Err(CreditsError::Config {
                message: format!("unknown admin policy '{other}'"),
            }),
        }
    }
}

/// Identity of one credit account: a user's pool for one category
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub user_id: UserId,
    pub category: Category,
}

impl AccountKey {
    pub fn new(user_id: UserId, category: Category) -> Self {
        Self { user_id, category }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parsing() {
        assert_eq!("group".parse::<Category>().unwrap(), Category::Group);
        assert_eq!(" Private ".parse::<Category>().unwrap(), Category::Private);

        let err = "yoga".parse::<Category>().unwrap_err();
        assert!(matches!(err, CreditsError::InvalidCategory { value } if value == "yoga"));
    }

    #[test]
    fn test_package_status_transitions() {
        assert!(PackageStatus::Active.can_transition_to(PackageStatus::Expired));
        assert!(PackageStatus::Active.can_transition_to(PackageStatus::Cancelled));
        assert!(!PackageStatus::Expired.can_transition_to(PackageStatus::Active));
        assert!(!PackageStatus::Cancelled.can_transition_to(PackageStatus::Expired));
        assert!(!PackageStatus::Active.can_transition_to(PackageStatus::Active));
    }

    #[test]
    fn test_policy_renewed_counter() {
        assert_eq!(AdminPolicy::Override.renewed_counter(5, -3), 5);
        assert_eq!(AdminPolicy::Deduct.renewed_counter(5, -3), 2);
        assert_eq!(AdminPolicy::Deduct.renewed_counter(5, 2), 5);
        assert_eq!("DEDUCT".parse::<AdminPolicy>().unwrap(), AdminPolicy::Deduct);
    }
}
