pub mod accounts;
pub mod connection;
pub mod locks;

pub use accounts::{CreditAccountRepository, SqlCreditAccountRepository};

pub use connection::{connect_and_migrate, create_pool, run_migrations};

pub use locks::{AccountGuard, AccountLocks};
