//! Request and response bodies of the REST API.

use crate::models::{
    Account, CreditKind, CreditUsage, KindUsage, PaymentFailure, PaymentFailureStatus,
    PlanEntitlement, PlanId,
};
use crate::services::{ManualRetryOutcome, RetryStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// Retry
// =============================================================================

#[derive(Debug, Serialize)]
pub struct FailureSummary {
    pub id: Uuid,
    pub amount: Decimal,
    pub plan: PlanId,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
}

impl From<&PaymentFailure> for FailureSummary {
    fn from(f: &PaymentFailure) -> Self {
        Self {
            id: f.failure_id,
            amount: f.amount,
            plan: f.plan,
            failure_reason: f.failure_reason.clone(),
            retry_count: f.retry_count,
            max_retries: f.max_retries,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RetryStatusResponse {
    pub has_failed_payments: bool,
    pub failed_count: usize,
    pub grace_until: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub latest_failure: Option<FailureSummary>,
}

impl From<RetryStatus> for RetryStatusResponse {
    fn from(status: RetryStatus) -> Self {
        Self {
            has_failed_payments: status.has_failed_payments,
            failed_count: status.failed_count,
            grace_until: status.grace_until,
            next_retry_at: status.next_retry_at,
            latest_failure: status.latest_failure.as_ref().map(FailureSummary::from),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ManualRetryRequest {
    /// Payment failure to retry; the account's open failure when absent.
    pub transaction_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ManualRetryResponse {
    pub success: bool,
    pub message: String,
    pub next_retry: Option<DateTime<Utc>>,
}

impl From<ManualRetryOutcome> for ManualRetryResponse {
    fn from(outcome: ManualRetryOutcome) -> Self {
        Self {
            success: outcome.success,
            message: outcome.message,
            next_retry: outcome.next_retry,
        }
    }
}

/// Full payment failure record.
#[derive(Debug, Serialize)]
pub struct PaymentFailureResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub plan: PlanId,
    pub amount: Decimal,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub grace_until: DateTime<Utc>,
    pub status: PaymentFailureStatus,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentFailure> for PaymentFailureResponse {
    fn from(f: PaymentFailure) -> Self {
        Self {
            id: f.failure_id,
            account_id: f.account_id,
            plan: f.plan,
            amount: f.amount,
            failure_reason: f.failure_reason,
            retry_count: f.retry_count,
            max_retries: f.max_retries,
            next_retry_at: f.next_retry_at,
            last_retry_at: f.last_retry_at,
            grace_until: f.grace_until,
            status: f.status,
            resolution_note: f.resolution_note,
            created_at: f.created_utc,
            updated_at: f.updated_utc,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListFailuresQuery {
    pub status: Option<PaymentFailureStatus>,
    #[validate(range(min = 1, max = 500, message = "limit must be between 1 and 500"))]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordFailureRequest {
    pub account_id: Uuid,
    pub plan: PlanId,
    pub amount: Decimal,
    #[validate(length(max = 500, message = "failure_reason must be at most 500 characters"))]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ResolveFailureRequest {
    #[validate(length(max = 1000, message = "note must be at most 1000 characters"))]
    pub note: Option<String>,
}

// =============================================================================
// Credits
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct UseCreditsRequest {
    #[serde(rename = "type")]
    pub kind: CreditKind,
    #[validate(range(min = 1, max = 100000, message = "count must be between 1 and 100000"))]
    pub count: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckCreditsQuery {
    #[serde(rename = "type")]
    pub kind: CreditKind,
    #[validate(range(min = 1, max = 100000, message = "count must be between 1 and 100000"))]
    pub count: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CheckCreditsResponse {
    #[serde(rename = "type")]
    pub kind: CreditKind,
    pub count: i64,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct CreditUsageResponse {
    pub plan: PlanId,
    pub email: KindUsage,
    pub sms: KindUsage,
    pub invoice: KindUsage,
    pub cycle_start: DateTime<Utc>,
    pub reset_date: DateTime<Utc>,
    pub days_until_reset: i64,
}

impl From<CreditUsage> for CreditUsageResponse {
    fn from(usage: CreditUsage) -> Self {
        Self {
            plan: usage.plan,
            email: usage.email,
            sms: usage.sms,
            invoice: usage.invoice,
            cycle_start: usage.cycle_start,
            reset_date: usage.reset_date,
            days_until_reset: usage.days_until_reset,
        }
    }
}

// =============================================================================
// Accounts and plans
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RegisterAccountRequest {
    pub plan: Option<PlanId>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: PlanId,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account_id: Uuid,
    pub plan: PlanId,
    pub plan_assigned_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            account_id: account.account_id,
            plan: account.plan,
            plan_assigned_at: account.plan_assigned_at,
            created_at: account.created_utc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlansResponse {
    pub plans: Vec<PlanEntitlement>,
}
