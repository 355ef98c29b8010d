//! PostgreSQL store.

use super::BillingStore;
use crate::error::BillingError;
use crate::models::{
    Account, CreditBalance, ListFailuresFilter, PaymentFailure, PaymentFailureStatus, PlanId,
};
use crate::services::metrics::DB_QUERY_DURATION;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const FAILURE_COLUMNS: &str = "failure_id, account_id, plan, amount, failure_reason, retry_count, \
     max_retries, next_retry_at, last_retry_at, grace_until, status, resolution_note, \
     created_utc, updated_utc, version";

#[derive(Debug, FromRow)]
struct AccountRow {
    account_id: Uuid,
    plan: String,
    plan_assigned_at: DateTime<Utc>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = BillingError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            account_id: row.account_id,
            plan: parse_plan(&row.plan)?,
            plan_assigned_at: row.plan_assigned_at,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct BalanceRow {
    account_id: Uuid,
    email_used: i64,
    sms_used: i64,
    invoices_used: i64,
    cycle_start: DateTime<Utc>,
    cycle_end: DateTime<Utc>,
    version: i64,
    updated_utc: DateTime<Utc>,
}

impl From<BalanceRow> for CreditBalance {
    fn from(row: BalanceRow) -> Self {
        CreditBalance {
            account_id: row.account_id,
            email_used: row.email_used,
            sms_used: row.sms_used,
            invoices_used: row.invoices_used,
            cycle_start: row.cycle_start,
            cycle_end: row.cycle_end,
            version: row.version,
            updated_utc: row.updated_utc,
        }
    }
}

#[derive(Debug, FromRow)]
struct FailureRow {
    failure_id: Uuid,
    account_id: Uuid,
    plan: String,
    amount: Decimal,
    failure_reason: Option<String>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    last_retry_at: Option<DateTime<Utc>>,
    grace_until: DateTime<Utc>,
    status: String,
    resolution_note: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    version: i64,
}

impl TryFrom<FailureRow> for PaymentFailure {
    type Error = BillingError;

    fn try_from(row: FailureRow) -> Result<Self, Self::Error> {
        let status = PaymentFailureStatus::from_string(&row.status).ok_or_else(|| {
            BillingError::Storage(anyhow!(
                "payment failure {} has unknown status '{}'",
                row.failure_id,
                row.status
            ))
        })?;
        Ok(PaymentFailure {
            failure_id: row.failure_id,
            account_id: row.account_id,
            plan: parse_plan(&row.plan)?,
            amount: row.amount,
            failure_reason: row.failure_reason,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            next_retry_at: row.next_retry_at,
            last_retry_at: row.last_retry_at,
            grace_until: row.grace_until,
            status,
            resolution_note: row.resolution_note,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
            version: row.version,
        })
    }
}

fn parse_plan(value: &str) -> Result<PlanId, BillingError> {
    PlanId::from_string(value)
        .ok_or_else(|| BillingError::Storage(anyhow!("stored plan '{}' is unknown", value)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

/// Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-resilience"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, BillingError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), BillingError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Migration failed")?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl BillingStore for PgStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Health check failed")?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, account), fields(account_id = %account.account_id))]
    async fn insert_account(&self, account: &Account) -> Result<bool, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_account"])
            .start_timer();

        let result = sqlx::query(
            r#"
            INSERT INTO billing_accounts (account_id, plan, plan_assigned_at, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id) DO NOTHING
            "#,
        )
        .bind(account.account_id)
        .bind(account.plan.as_str())
        .bind(account.plan_assigned_at)
        .bind(account.created_utc)
        .bind(account.updated_utc)
        .execute(&self.pool)
        .await
        .context("Failed to insert account")?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT account_id, plan, plan_assigned_at, created_utc, updated_utc
            FROM billing_accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get account")?;

        timer.observe_duration();
        row.map(Account::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn update_account_plan(
        &self,
        account_id: Uuid,
        plan: PlanId,
        at: DateTime<Utc>,
    ) -> Result<Option<Account>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_account_plan"])
            .start_timer();

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            UPDATE billing_accounts
            SET plan_assigned_at = CASE WHEN plan = $2 THEN plan_assigned_at ELSE $3 END,
                plan = $2,
                updated_utc = $3
            WHERE account_id = $1
            RETURNING account_id, plan, plan_assigned_at, created_utc, updated_utc
            "#,
        )
        .bind(account_id)
        .bind(plan.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update account plan")?;

        timer.observe_duration();
        row.map(Account::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_balance(&self, account_id: Uuid) -> Result<Option<CreditBalance>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_balance"])
            .start_timer();

        let row = sqlx::query_as::<_, BalanceRow>(
            r#"
            SELECT account_id, email_used, sms_used, invoices_used, cycle_start, cycle_end, version, updated_utc
            FROM credit_balances
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get credit balance")?;

        timer.observe_duration();
        Ok(row.map(CreditBalance::from))
    }

    #[instrument(skip(self, balance), fields(account_id = %balance.account_id))]
    async fn save_balance(
        &self,
        balance: &CreditBalance,
        expected_version: Option<i64>,
    ) -> Result<bool, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_balance"])
            .start_timer();

        let result = match expected_version {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO credit_balances (account_id, email_used, sms_used, invoices_used, cycle_start, cycle_end, version, updated_utc)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (account_id) DO NOTHING
                    "#,
                )
                .bind(balance.account_id)
                .bind(balance.email_used)
                .bind(balance.sms_used)
                .bind(balance.invoices_used)
                .bind(balance.cycle_start)
                .bind(balance.cycle_end)
                .bind(balance.version)
                .bind(balance.updated_utc)
                .execute(&self.pool)
                .await
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE credit_balances
                    SET email_used = $2, sms_used = $3, invoices_used = $4,
                        cycle_start = $5, cycle_end = $6, version = $7, updated_utc = $8
                    WHERE account_id = $1 AND version = $9
                    "#,
                )
                .bind(balance.account_id)
                .bind(balance.email_used)
                .bind(balance.sms_used)
                .bind(balance.invoices_used)
                .bind(balance.cycle_start)
                .bind(balance.cycle_end)
                .bind(balance.version)
                .bind(balance.updated_utc)
                .bind(expected)
                .execute(&self.pool)
                .await
            }
        }
        .context("Failed to save credit balance")?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, failure), fields(account_id = %failure.account_id, failure_id = %failure.failure_id))]
    async fn insert_failure(&self, failure: &PaymentFailure) -> Result<(), BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_failure"])
            .start_timer();

        let result = sqlx::query(&format!(
            "INSERT INTO payment_failures ({FAILURE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(failure.failure_id)
        .bind(failure.account_id)
        .bind(failure.plan.as_str())
        .bind(failure.amount)
        .bind(&failure.failure_reason)
        .bind(failure.retry_count)
        .bind(failure.max_retries)
        .bind(failure.next_retry_at)
        .bind(failure.last_retry_at)
        .bind(failure.grace_until)
        .bind(failure.status.as_str())
        .bind(&failure.resolution_note)
        .bind(failure.created_utc)
        .bind(failure.updated_utc)
        .bind(failure.version)
        .execute(&self.pool)
        .await;

        timer.observe_duration();
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                let open = self.find_active_failure(failure.account_id).await?;
                Err(BillingError::FailureAlreadyOpen {
                    account_id: failure.account_id,
                    failure_id: open.map(|f| f.failure_id).unwrap_or(failure.failure_id),
                })
            }
            Err(e) => Err(BillingError::Storage(
                anyhow::Error::new(e).context("Failed to insert payment failure"),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn get_failure(&self, failure_id: Uuid) -> Result<Option<PaymentFailure>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_failure"])
            .start_timer();

        let row = sqlx::query_as::<_, FailureRow>(&format!(
            "SELECT {FAILURE_COLUMNS} FROM payment_failures WHERE failure_id = $1"
        ))
        .bind(failure_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get payment failure")?;

        timer.observe_duration();
        row.map(PaymentFailure::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_active_failure(
        &self,
        account_id: Uuid,
    ) -> Result<Option<PaymentFailure>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_active_failure"])
            .start_timer();

        let row = sqlx::query_as::<_, FailureRow>(&format!(
            "SELECT {FAILURE_COLUMNS} FROM payment_failures \
             WHERE account_id = $1 AND status IN ('pending', 'retrying')"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find active payment failure")?;

        timer.observe_duration();
        row.map(PaymentFailure::try_from).transpose()
    }

    #[instrument(skip(self, filter))]
    async fn list_failures(
        &self,
        filter: &ListFailuresFilter,
    ) -> Result<Vec<PaymentFailure>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_failures"])
            .start_timer();

        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        let rows = sqlx::query_as::<_, FailureRow>(&format!(
            "SELECT {FAILURE_COLUMNS} FROM payment_failures \
             WHERE ($1::uuid IS NULL OR account_id = $1) \
               AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_utc DESC \
             LIMIT $3"
        ))
        .bind(filter.account_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list payment failures")?;

        timer.observe_duration();
        rows.into_iter().map(PaymentFailure::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn list_due_failures(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentFailure>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_due_failures"])
            .start_timer();

        let rows = sqlx::query_as::<_, FailureRow>(&format!(
            "SELECT {FAILURE_COLUMNS} FROM payment_failures \
             WHERE (status IN ('pending', 'retrying') AND (next_retry_at <= $1 OR grace_until <= $1)) \
                OR status = 'grace_expired' \
             ORDER BY LEAST(COALESCE(next_retry_at, grace_until), grace_until) \
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list due payment failures")?;

        timer.observe_duration();
        rows.into_iter().map(PaymentFailure::try_from).collect()
    }

    #[instrument(skip(self, failure), fields(failure_id = %failure.failure_id, status = failure.status.as_str()))]
    async fn update_failure(
        &self,
        failure: &PaymentFailure,
        expected_version: i64,
    ) -> Result<bool, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_failure"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE payment_failures
            SET failure_reason = $2, retry_count = $3, next_retry_at = $4, last_retry_at = $5,
                status = $6, resolution_note = $7, updated_utc = $8, version = $9
            WHERE failure_id = $1 AND version = $10
            "#,
        )
        .bind(failure.failure_id)
        .bind(&failure.failure_reason)
        .bind(failure.retry_count)
        .bind(failure.next_retry_at)
        .bind(failure.last_retry_at)
        .bind(failure.status.as_str())
        .bind(&failure.resolution_note)
        .bind(failure.updated_utc)
        .bind(failure.version)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .context("Failed to update payment failure")?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }
}
