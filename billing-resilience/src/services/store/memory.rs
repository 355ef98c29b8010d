//! In-process store used when no database is configured and in tests.

use super::BillingStore;
use crate::error::BillingError;
use crate::models::{
    Account, CreditBalance, ListFailuresFilter, PaymentFailure, PaymentFailureStatus, PlanId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    balances: HashMap<Uuid, CreditBalance>,
    failures: HashMap<Uuid, PaymentFailure>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn due_key(failure: &PaymentFailure) -> DateTime<Utc> {
    match failure.next_retry_at {
        Some(at) if at < failure.grace_until => at,
        _ => failure.grace_until,
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn health_check(&self) -> Result<(), BillingError> {
        Ok(())
    }

    async fn insert_account(&self, account: &Account) -> Result<bool, BillingError> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&account.account_id) {
            return Ok(false);
        }
        state.accounts.insert(account.account_id, account.clone());
        Ok(true)
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, BillingError> {
        Ok(self.state.read().await.accounts.get(&account_id).cloned())
    }

    async fn update_account_plan(
        &self,
        account_id: Uuid,
        plan: PlanId,
        at: DateTime<Utc>,
    ) -> Result<Option<Account>, BillingError> {
        let mut state = self.state.write().await;
        Ok(state.accounts.get_mut(&account_id).map(|account| {
            if account.plan != plan {
                account.plan = plan;
                account.plan_assigned_at = at;
            }
            account.updated_utc = at;
            account.clone()
        }))
    }

    async fn get_balance(&self, account_id: Uuid) -> Result<Option<CreditBalance>, BillingError> {
        Ok(self.state.read().await.balances.get(&account_id).cloned())
    }

    async fn save_balance(
        &self,
        balance: &CreditBalance,
        expected_version: Option<i64>,
    ) -> Result<bool, BillingError> {
        let mut state = self.state.write().await;
        let current = state.balances.get(&balance.account_id).map(|b| b.version);
        if current != expected_version {
            return Ok(false);
        }
        state.balances.insert(balance.account_id, balance.clone());
        Ok(true)
    }

    async fn insert_failure(&self, failure: &PaymentFailure) -> Result<(), BillingError> {
        let mut state = self.state.write().await;
        if let Some(open) = state
            .failures
            .values()
            .find(|f| f.account_id == failure.account_id && f.is_active())
        {
            return Err(BillingError::FailureAlreadyOpen {
                account_id: failure.account_id,
                failure_id: open.failure_id,
            });
        }
        state.failures.insert(failure.failure_id, failure.clone());
        Ok(())
    }

    async fn get_failure(&self, failure_id: Uuid) -> Result<Option<PaymentFailure>, BillingError> {
        Ok(self.state.read().await.failures.get(&failure_id).cloned())
    }

    async fn find_active_failure(
        &self,
        account_id: Uuid,
    ) -> Result<Option<PaymentFailure>, BillingError> {
        Ok(self
            .state
            .read()
            .await
            .failures
            .values()
            .find(|f| f.account_id == account_id && f.is_active())
            .cloned())
    }

    async fn list_failures(
        &self,
        filter: &ListFailuresFilter,
    ) -> Result<Vec<PaymentFailure>, BillingError> {
        let state = self.state.read().await;
        let mut failures: Vec<PaymentFailure> = state
            .failures
            .values()
            .filter(|f| filter.account_id.map_or(true, |id| f.account_id == id))
            .filter(|f| filter.status.map_or(true, |s| f.status == s))
            .cloned()
            .collect();
        failures.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        if filter.limit > 0 {
            failures.truncate(filter.limit as usize);
        }
        Ok(failures)
    }

    async fn list_due_failures(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentFailure>, BillingError> {
        let state = self.state.read().await;
        let mut due: Vec<PaymentFailure> = state
            .failures
            .values()
            .filter(|f| match f.status {
                PaymentFailureStatus::Pending | PaymentFailureStatus::Retrying => {
                    f.grace_until <= now || f.next_retry_at.is_some_and(|at| at <= now)
                }
                PaymentFailureStatus::GraceExpired => true,
                _ => false,
            })
            .cloned()
            .collect();
        due.sort_by_key(due_key);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn update_failure(
        &self,
        failure: &PaymentFailure,
        expected_version: i64,
    ) -> Result<bool, BillingError> {
        let mut state = self.state.write().await;
        match state.failures.get_mut(&failure.failure_id) {
            Some(stored) if stored.version == expected_version => {
                *stored = failure.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
