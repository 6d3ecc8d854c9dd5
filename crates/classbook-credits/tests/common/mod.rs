#![allow(dead_code)]

use chrono::NaiveDate;
use classbook_credits::config::DatabaseConfig;
use classbook_credits::domain::{
    AccountKey, AdminPolicy, AdminPolicyHandle, Category, CreditLedgerService, FixedClock,
    NewPackageRecord, UserId,
};
use classbook_credits::storage::{connect_and_migrate, SqlCreditAccountRepository};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub struct TestContext {
    pub ledger: Arc<CreditLedgerService>,
    pub repository: Arc<SqlCreditAccountRepository>,
    pub clock: Arc<FixedClock>,
    pub pool: SqlitePool,
    _db_file: NamedTempFile,
}

impl TestContext {
    pub async fn new(today: NaiveDate, policy: AdminPolicy) -> Self {
        let db_file = NamedTempFile::new().expect("Failed to create database file");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", db_file.path().display()),
            max_connections: 4,
            busy_timeout_seconds: 5,
        };

        let pool = connect_and_migrate(&config)
            .await
            .expect("Failed to open test database");
        let repository = Arc::new(SqlCreditAccountRepository::new(pool.clone()));
        let clock = Arc::new(FixedClock::new(today));
        let ledger = Arc::new(CreditLedgerService::new(
            repository.clone(),
            clock.clone(),
            AdminPolicyHandle::new(policy),
        ));

        Self {
            ledger,
            repository,
            clock,
            pool,
            _db_file: db_file,
        }
    }

    /// A second ledger over the same database with its own lock table,
    /// standing in for another process.
    pub fn second_process(&self, policy: AdminPolicy) -> Arc<CreditLedgerService> {
        Arc::new(CreditLedgerService::new(
            Arc::new(SqlCreditAccountRepository::new(self.pool.clone())),
            self.clock.clone(),
            AdminPolicyHandle::new(policy),
        ))
    }

    /// Overwrites a counter behind the ledger's back.
    pub async fn force_counter(&self, key: &AccountKey, counter: i64) {
        sqlx::query("UPDATE credit_ledger SET counter = ? WHERE user_id = ? AND category = ?")
            .bind(counter)
            .bind(key.user_id.as_str())
            .bind(key.category.as_str())
            .execute(&self.pool)
            .await
            .expect("Failed to force counter");
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn key(user: &str, category: Category) -> AccountKey {
    AccountKey::new(UserId::new(user), category)
}

pub fn package(
    user: &str,
    category: Category,
    classes: i64,
    start: NaiveDate,
    end: NaiveDate,
    auto_renew: bool,
    renewal_months: i64,
) -> NewPackageRecord {
    NewPackageRecord {
        user_id: UserId::new(user),
        category,
        classes_included: classes,
        start_date: start,
        end_date: end,
        auto_renew,
        renewal_months,
    }
}
