pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod storage;
pub mod sweep;

pub use config::CreditsConfig;
pub use domain::{CreditLedgerService, CreditOperations};
pub use error::{CreditsError, Result};
