//! Payment failure model.

use crate::models::PlanId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment failure status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFailureStatus {
    Pending,
    Retrying,
    Succeeded,
    GraceExpired,
    Downgraded,
    ManuallyResolved,
}

impl PaymentFailureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentFailureStatus::Pending => "pending",
            PaymentFailureStatus::Retrying => "retrying",
            PaymentFailureStatus::Succeeded => "succeeded",
            PaymentFailureStatus::GraceExpired => "grace_expired",
            PaymentFailureStatus::Downgraded => "downgraded",
            PaymentFailureStatus::ManuallyResolved => "manually_resolved",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentFailureStatus::Pending),
            "retrying" => Some(PaymentFailureStatus::Retrying),
            "succeeded" => Some(PaymentFailureStatus::Succeeded),
            "grace_expired" => Some(PaymentFailureStatus::GraceExpired),
            "downgraded" => Some(PaymentFailureStatus::Downgraded),
            "manually_resolved" => Some(PaymentFailureStatus::ManuallyResolved),
            _ => None,
        }
    }

    /// Pending or retrying: the account still has an open failure.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PaymentFailureStatus::Pending | PaymentFailureStatus::Retrying
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentFailureStatus::Succeeded
                | PaymentFailureStatus::Downgraded
                | PaymentFailureStatus::ManuallyResolved
        )
    }
}

/// A chain of charge attempts for one failed subscription payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailure {
    pub failure_id: Uuid,
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
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub version: i64,
}

impl PaymentFailure {
    /// Retries left before the automatic schedule stops.
    pub fn retries_remaining(&self) -> i32 {
        (self.max_retries - self.retry_count).max(0)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Filter for listing payment failures.
#[derive(Debug, Clone, Default)]
pub struct ListFailuresFilter {
    pub account_id: Option<Uuid>,
    pub status: Option<PaymentFailureStatus>,
    pub limit: i64,
}
