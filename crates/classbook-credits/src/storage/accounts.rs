use crate::domain::credits::{CreditAccount, LedgerEvent, LedgerEventKind};
use crate::domain::packages::{NewPackageRecord, PackageRecord};
use crate::domain::reconciler::AccountChanges;
use crate::domain::types::{AccountKey, Category, PackageId, PackageStatus, UserId};
use crate::error::{CreditsError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{debug, warn};

const RECORD_COLUMNS: &str = r#"
    id, user_id, category, classes_included, start_date, end_date, status,
    auto_renew, renewal_months_purchased, renewal_months_remaining,
    last_renewal_date, created_at, updated_at
"#;

/// Persistence of the credit account aggregate: package records and the
/// ledger counter, always written together.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CreditAccountRepository: Send + Sync {
    async fn load_account(&self, key: &AccountKey) -> Result<CreditAccount>;

    /// Commits a reconciliation, provided the account still looks like `before`.
    async fn apply_reconciliation(
        &self,
        before: &CreditAccount,
        changes: &AccountChanges,
    ) -> Result<()>;

    /// Inserts a new Active record, expiring any previous Active record for
    /// the same key and resetting the counter to the new allotment.
    async fn create_record(
        &self,
        new: &NewPackageRecord,
        created_at: DateTime<Utc>,
    ) -> Result<PackageRecord>;

    /// Closes an Active record and forces its counter to 0.
    async fn set_status(&self, id: &PackageId, status: PackageStatus) -> Result<PackageRecord>;

    async fn get_record(&self, id: &PackageId) -> Result<Option<PackageRecord>>;
    async fn active_record(&self, key: &AccountKey) -> Result<Option<PackageRecord>>;
    async fn package_history(&self, user_id: &UserId) -> Result<Vec<PackageRecord>>;
    async fn balance(&self, key: &AccountKey) -> Result<i64>;

    /// Decrements a positive counter. `None` when the counter was not positive.
    async fn deduct(&self, key: &AccountKey) -> Result<Option<i64>>;

    /// Increments the counter without an upper bound.
    async fn restore(&self, key: &AccountKey) -> Result<i64>;

    /// Accounts whose Active record ended before `today`.
    async fn lapsed_accounts(&self, today: NaiveDate, limit: i64) -> Result<Vec<AccountKey>>;

    async fn ledger_events(&self, key: &AccountKey, limit: i64) -> Result<Vec<LedgerEvent>>;
}

pub struct SqlCreditAccountRepository {
    pool: SqlitePool,
}

impl SqlCreditAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| CreditsError::persistence(operation, e))
    }

    async fn commit(tx: Transaction<'static, Sqlite>, operation: &str) -> Result<()> {
        tx.commit()
            .await
            .map_err(|e| CreditsError::persistence(operation, e))
    }

    async fn write_counter(
        tx: &mut Transaction<'static, Sqlite>,
        key: &AccountKey,
        counter: i64,
        now: DateTime<Utc>,
        operation: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_ledger (user_id, category, counter, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, category) DO UPDATE SET
                counter = excluded.counter,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .bind(counter)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| CreditsError::persistence(operation, e))?;

        Ok(())
    }

    /// Appends an audit row. Without an explicit package id the key's Active
    /// record, if any, is attributed.
    async fn record_event(
        tx: &mut Transaction<'static, Sqlite>,
        key: &AccountKey,
        kind: LedgerEventKind,
        package_id: Option<&PackageId>,
        counter_after: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_events (user_id, category, kind, package_id, counter_after, created_at)
            VALUES (?, ?, ?, COALESCE(?, (
                SELECT id FROM package_records
                WHERE user_id = ? AND category = ? AND status = 'active'
            )), ?, ?)
            "#,
        )
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .bind(kind.as_str())
        .bind(package_id.map(|id| id.to_string()))
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .bind(counter_after)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| CreditsError::persistence("record_event", e))?;

        Ok(())
    }

    fn conflict(key: &AccountKey) -> CreditsError {
        CreditsError::ConcurrentModification {
            user_id: key.user_id.to_string(),
            category: key.category,
        }
    }
}

fn decode<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column)
        .map_err(|e| CreditsError::persistence(format!("decode {column}"), e))
}

/// Parses a stored text column. A value the domain rejects is corrupt data,
/// not a caller error.
fn parse<T>(value: &str, column: &str) -> Result<T>
where
    T: FromStr<Err = CreditsError>,
{
    value
        .parse()
        .map_err(|e| CreditsError::persistence(format!("decode {column}"), e))
}

fn record_from_row(row: &SqliteRow) -> Result<PackageRecord> {
    let id: String = decode(row, "id")?;
    let category: String = decode(row, "category")?;
    let status: String = decode(row, "status")?;

    Ok(PackageRecord {
        id: parse(&id, "id")?,
        user_id: UserId::new(decode::<String>(row, "user_id")?),
        category: parse(&category, "category")?,
        classes_included: decode(row, "classes_included")?,
        start_date: decode(row, "start_date")?,
        end_date: decode(row, "end_date")?,
        status: parse(&status, "status")?,
        auto_renew: decode(row, "auto_renew")?,
        renewal_months_purchased: decode(row, "renewal_months_purchased")?,
        renewal_months_remaining: decode(row, "renewal_months_remaining")?,
        last_renewal_date: decode(row, "last_renewal_date")?,
        created_at: decode(row, "created_at")?,
        updated_at: decode(row, "updated_at")?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<LedgerEvent> {
    let category: String = decode(row, "category")?;
    let kind: String = decode(row, "kind")?;
    let package_id: Option<String> = decode(row, "package_id")?;

    Ok(LedgerEvent {
        id: decode(row, "id")?,
        user_id: UserId::new(decode::<String>(row, "user_id")?),
        category: parse(&category, "category")?,
        kind: parse(&kind, "kind")?,
        package_id: package_id
            .map(|id| parse(&id, "package_id"))
            .transpose()?,
        counter_after: decode(row, "counter_after")?,
        created_at: decode(row, "created_at")?,
    })
}

#[async_trait]
impl CreditAccountRepository for SqlCreditAccountRepository {
    async fn load_account(&self, key: &AccountKey) -> Result<CreditAccount> {
        let mut tx = self.begin("load_account").await?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM package_records
            WHERE user_id = ? AND category = ? AND status = 'active'
            ORDER BY start_date DESC, created_at DESC
            LIMIT 1
            "#
        ))
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CreditsError::persistence("load_account", e))?;

        let counter: Option<i64> = sqlx::query_scalar(
            "SELECT counter FROM credit_ledger WHERE user_id = ? AND category = ?",
        )
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CreditsError::persistence("load_account", e))?;

        Self::commit(tx, "load_account").await?;

        let mut account = CreditAccount::empty(key.clone());
        account.active = row.as_ref().map(record_from_row).transpose()?;
        if let Some(counter) = counter {
            account.counter = counter;
        }
        Ok(account)
    }

    async fn apply_reconciliation(
        &self,
        before: &CreditAccount,
        changes: &AccountChanges,
    ) -> Result<()> {
        let key = &before.key;
        let now = Utc::now();
        let mut tx = self.begin("apply_reconciliation").await?;

        if let Some(record) = &changes.record {
            let Some(previous) = before.active.as_ref() else {
                return Err(Self::conflict(key));
            };

            let updated = sqlx::query(
                r#"
                UPDATE package_records SET
                    status = ?,
                    end_date = ?,
                    renewal_months_remaining = ?,
                    last_renewal_date = ?,
                    updated_at = ?
                WHERE id = ?
                  AND status = ?
                  AND end_date = ?
                  AND renewal_months_remaining = ?
                "#,
            )
            .bind(record.status.as_str())
            .bind(record.end_date)
            .bind(record.renewal_months_remaining)
            .bind(record.last_renewal_date)
            .bind(now)
            .bind(previous.id.to_string())
            .bind(previous.status.as_str())
            .bind(previous.end_date)
            .bind(previous.renewal_months_remaining)
            .execute(&mut *tx)
            .await
            .map_err(|e| CreditsError::persistence("apply_reconciliation", e))?;

            if updated.rows_affected() != 1 {
                warn!(
                    "Package {} for {} changed since it was read, reconciliation dropped",
                    previous.id, key
                );
                return Err(Self::conflict(key));
            }
        }

        // A missing ledger row is only consistent with a counter of 0 having been read.
        // Without a record change the plan assumed no Active record, so one
        // created since the read voids it.
        let written = sqlx::query(
            r#"
            INSERT INTO credit_ledger (user_id, category, counter, updated_at)
            SELECT ?, ?, ?, ?
            WHERE ? OR NOT EXISTS (
                SELECT 1 FROM package_records
                WHERE user_id = ? AND category = ? AND status = 'active'
            )
            ON CONFLICT (user_id, category) DO UPDATE SET
                counter = excluded.counter,
                updated_at = excluded.updated_at
            WHERE credit_ledger.counter = ?
            "#,
        )
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .bind(changes.counter)
        .bind(now)
        .bind(changes.record.is_some())
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .bind(before.counter)
        .execute(&mut *tx)
        .await
        .map_err(|e| CreditsError::persistence("apply_reconciliation", e))?;

        if written.rows_affected() != 1 {
            warn!(
                "Counter for {} changed since it was read, reconciliation dropped",
                key
            );
            return Err(Self::conflict(key));
        }

        let package_id = changes.record.as_ref().map(|r| &r.id);
        Self::record_event(&mut tx, key, changes.event, package_id, changes.counter, now).await?;

        Self::commit(tx, "apply_reconciliation").await
    }

    async fn create_record(
        &self,
        new: &NewPackageRecord,
        created_at: DateTime<Utc>,
    ) -> Result<PackageRecord> {
        let record = new.clone().into_record(created_at);
        let key = record.key();
        let mut tx = self.begin("create_record").await?;

        let closed = sqlx::query(
            r#"
            UPDATE package_records SET status = 'expired', updated_at = ?
            WHERE user_id = ? AND category = ? AND status = 'active'
            "#,
        )
        .bind(created_at)
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| CreditsError::persistence("create_record", e))?;

        if closed.rows_affected() > 0 {
            debug!(
                "Closed {} previous active package(s) for {}",
                closed.rows_affected(),
                key
            );
        }

        sqlx::query(
            r#"
            INSERT INTO package_records (
                id, user_id, category, classes_included, start_date, end_date, status,
                auto_renew, renewal_months_purchased, renewal_months_remaining,
                last_renewal_date, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id.as_str())
        .bind(record.category.as_str())
        .bind(record.classes_included)
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(record.status.as_str())
        .bind(record.auto_renew)
        .bind(record.renewal_months_purchased)
        .bind(record.renewal_months_remaining)
        .bind(record.last_renewal_date)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| CreditsError::persistence("create_record", e))?;

        Self::write_counter(&mut tx, &key, record.classes_included, created_at, "create_record")
            .await?;
        Self::record_event(
            &mut tx,
            &key,
            LedgerEventKind::PackageCreated,
            Some(&record.id),
            record.classes_included,
            created_at,
        )
        .await?;

        Self::commit(tx, "create_record").await?;
        Ok(record)
    }

    async fn set_status(&self, id: &PackageId, status: PackageStatus) -> Result<PackageRecord> {
        let kind = match status {
            PackageStatus::Expired => LedgerEventKind::Expired,
            PackageStatus::Cancelled => LedgerEventKind::Cancelled,
            PackageStatus::Active => {
                let current = self
                    .get_record(id)
                    .await?
                    .ok_or_else(|| CreditsError::RecordNotFound { id: id.to_string() })?;
                return Err(CreditsError::InvalidStatusTransition {
                    id: id.to_string(),
                    from: current.status,
                    to: status,
                });
            }
        };

        let now = Utc::now();
        let mut tx = self.begin("set_status").await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE package_records SET status = ?, updated_at = ?
            WHERE id = ? AND status = 'active'
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(status.as_str())
        .bind(now)
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CreditsError::persistence("set_status", e))?;

        let Some(row) = row else {
            drop(tx);
            let current = self
                .get_record(id)
                .await?
                .ok_or_else(|| CreditsError::RecordNotFound { id: id.to_string() })?;
            return Err(CreditsError::InvalidStatusTransition {
                id: id.to_string(),
                from: current.status,
                to: status,
            });
        };
        let record = record_from_row(&row)?;
        let key = record.key();

        Self::write_counter(&mut tx, &key, 0, now, "set_status").await?;
        Self::record_event(&mut tx, &key, kind, Some(&record.id), 0, now).await?;

        Self::commit(tx, "set_status").await?;
        Ok(record)
    }

    async fn get_record(&self, id: &PackageId) -> Result<Option<PackageRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM package_records WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CreditsError::persistence("get_record", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn active_record(&self, key: &AccountKey) -> Result<Option<PackageRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM package_records
            WHERE user_id = ? AND category = ? AND status = 'active'
            ORDER BY start_date DESC, created_at DESC
            LIMIT 1
            "#
        ))
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CreditsError::persistence("active_record", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn package_history(&self, user_id: &UserId) -> Result<Vec<PackageRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM package_records
            WHERE user_id = ?
            ORDER BY start_date DESC, created_at DESC
            "#
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CreditsError::persistence("package_history", e))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn balance(&self, key: &AccountKey) -> Result<i64> {
        let counter: Option<i64> = sqlx::query_scalar(
            "SELECT counter FROM credit_ledger WHERE user_id = ? AND category = ?",
        )
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CreditsError::persistence("balance", e))?;

        Ok(counter.unwrap_or(0))
    }

    async fn deduct(&self, key: &AccountKey) -> Result<Option<i64>> {
        let now = Utc::now();
        let mut tx = self.begin("deduct").await?;

        let counter: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE credit_ledger SET counter = counter - 1, updated_at = ?
            WHERE user_id = ? AND category = ? AND counter > 0
            RETURNING counter
            "#,
        )
        .bind(now)
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CreditsError::persistence("deduct", e))?;

        let Some(counter) = counter else {
            return Ok(None);
        };

        Self::record_event(&mut tx, key, LedgerEventKind::Deducted, None, counter, now).await?;
        Self::commit(tx, "deduct").await?;
        Ok(Some(counter))
    }

    async fn restore(&self, key: &AccountKey) -> Result<i64> {
        let now = Utc::now();
        let mut tx = self.begin("restore").await?;

        let counter: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO credit_ledger (user_id, category, counter, updated_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT (user_id, category) DO UPDATE SET
                counter = credit_ledger.counter + 1,
                updated_at = excluded.updated_at
            RETURNING counter
            "#,
        )
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CreditsError::persistence("restore", e))?;

        Self::record_event(&mut tx, key, LedgerEventKind::Restored, None, counter, now).await?;
        Self::commit(tx, "restore").await?;
        Ok(counter)
    }

    async fn lapsed_accounts(&self, today: NaiveDate, limit: i64) -> Result<Vec<AccountKey>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, category
            FROM package_records
            WHERE status = 'active' AND end_date < ?
            ORDER BY end_date ASC
            LIMIT ?
            "#,
        )
        .bind(today)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CreditsError::persistence("lapsed_accounts", e))?;

        rows.iter()
            .map(|row| {
                let category: String = decode(row, "category")?;
                Ok(AccountKey::new(
                    UserId::new(decode::<String>(row, "user_id")?),
                    parse::<Category>(&category, "category")?,
                ))
            })
            .collect()
    }

    async fn ledger_events(&self, key: &AccountKey, limit: i64) -> Result<Vec<LedgerEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, category, kind, package_id, counter_after, created_at
            FROM ledger_events
            WHERE user_id = ? AND category = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(key.user_id.as_str())
        .bind(key.category.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CreditsError::persistence("ledger_events", e))?;

        rows.iter().map(event_from_row).collect()
    }
}
