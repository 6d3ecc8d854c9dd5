pub mod clock;
pub mod credits;
pub mod ledger;
pub mod packages;
pub mod policy;
pub mod reconciler;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use credits::{CreditAccount, LedgerEvent, LedgerEventKind};
pub use ledger::{ActivePackage, CreditLedgerService, CreditOperations, SweepReport};
pub use packages::{NewPackageRecord, PackageRecord};
pub use policy::AdminPolicyHandle;
pub use reconciler::{AccountChanges, AccountState, Reconciler, Reconciliation};
pub use types::{
    AccountKey, AdminPolicy, Category, PackageId, PackageStatus, UserId, RENEWAL_PERIOD_DAYS,
    UNLIMITED_CLASSES,
};
