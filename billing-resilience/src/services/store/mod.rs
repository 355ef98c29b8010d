//! Persistence for accounts, credit balances and payment failures.
//!
//! Writes of versioned records are compare-and-swap: the caller passes the
//! version it loaded, bumps `version` on the record it hands over, and gets
//! `false` back when someone else wrote in between.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::BillingError;
use crate::models::{Account, CreditBalance, ListFailuresFilter, PaymentFailure, PlanId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), BillingError>;

    /// Insert an account; `false` when it already exists.
    async fn insert_account(&self, account: &Account) -> Result<bool, BillingError>;

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, BillingError>;

    async fn update_account_plan(
        &self,
        account_id: Uuid,
        plan: PlanId,
        at: DateTime<Utc>,
    ) -> Result<Option<Account>, BillingError>;

    async fn get_balance(&self, account_id: Uuid) -> Result<Option<CreditBalance>, BillingError>;

    /// `expected_version = None` inserts a balance that must not exist yet.
    async fn save_balance(
        &self,
        balance: &CreditBalance,
        expected_version: Option<i64>,
    ) -> Result<bool, BillingError>;

    /// Fails with `FailureAlreadyOpen` when the account has an active failure.
    async fn insert_failure(&self, failure: &PaymentFailure) -> Result<(), BillingError>;

    async fn get_failure(&self, failure_id: Uuid) -> Result<Option<PaymentFailure>, BillingError>;

    async fn find_active_failure(
        &self,
        account_id: Uuid,
    ) -> Result<Option<PaymentFailure>, BillingError>;

    /// Newest first.
    async fn list_failures(
        &self,
        filter: &ListFailuresFilter,
    ) -> Result<Vec<PaymentFailure>, BillingError>;

    /// Active failures whose retry or grace deadline has passed, plus grace
    /// expired ones still owed a downgrade. Earliest deadline first.
    async fn list_due_failures(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentFailure>, BillingError>;

    async fn update_failure(
        &self,
        failure: &PaymentFailure,
        expected_version: i64,
    ) -> Result<bool, BillingError>;
}
