//! Payment failure state machine.
//!
//! `RetryScheduler` owns every transition of a [`PaymentFailure`]: when the
//! next charge attempt is due, how a result folds into the record and when the
//! grace period ends in a downgrade. It is pure: callers load the record, apply
//! a transition here and persist the result under the account lock.
//!
//! ```text
//! Pending ──attempt──▶ Retrying ──success──▶ Succeeded
//!    │                   │  ▲
//!    │                   └──┘ failure (retry_count += 1)
//!    └──────┬────────────┘
//!           │ now ≥ grace_until
//!           ▼
//!      GraceExpired ──plan set to free──▶ Downgraded
//!
//! any non-terminal ──operator──▶ ManuallyResolved
//! ```

use crate::error::BillingError;
use crate::models::{PaymentFailure, PaymentFailureStatus, PlanId};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Longest single backoff step; the grace deadline caps it further.
const MAX_BACKOFF_DAYS: i64 = 365;

/// Retry policy constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub base_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_interval: Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Open a failure for a charge that just failed at `now`.
    pub fn open(
        &self,
        account_id: Uuid,
        plan: PlanId,
        amount: Decimal,
        reason: Option<String>,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> PaymentFailure {
        let grace_until = now + grace;
        let mut failure = PaymentFailure {
            failure_id: Uuid::new_v4(),
            account_id,
            plan,
            amount,
            failure_reason: reason,
            retry_count: 0,
            max_retries: self.policy.max_retries,
            next_retry_at: None,
            last_retry_at: None,
            grace_until,
            status: PaymentFailureStatus::Pending,
            resolution_note: None,
            created_utc: now,
            updated_utc: now,
            version: 0,
        };
        failure.next_retry_at = self.next_retry_after(&failure, now);
        failure
    }

    /// `now + base * 2^retry_count`, capped at the grace deadline. `None` once
    /// the automatic retries are used up.
    pub fn next_retry_after(
        &self,
        failure: &PaymentFailure,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if failure.retry_count >= failure.max_retries {
            return None;
        }
        let next = now + self.backoff(failure.retry_count);
        Some(next.min(failure.grace_until))
    }

    fn backoff(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.clamp(0, 30) as u32;
        let millis = self
            .policy
            .base_interval
            .num_milliseconds()
            .saturating_mul(1_i64 << exponent);
        Duration::milliseconds(millis).min(Duration::days(MAX_BACKOFF_DAYS))
    }

    pub fn grace_elapsed(&self, failure: &PaymentFailure, now: DateTime<Utc>) -> bool {
        now >= failure.grace_until
    }

    /// Whether the sweep has work to do for this record at `now`.
    pub fn is_due(&self, failure: &PaymentFailure, now: DateTime<Utc>) -> bool {
        match failure.status {
            PaymentFailureStatus::Pending | PaymentFailureStatus::Retrying => {
                self.grace_elapsed(failure, now)
                    || failure.next_retry_at.is_some_and(|at| at <= now)
            }
            // Downgrade owed from an interrupted run.
            PaymentFailureStatus::GraceExpired => true,
            _ => false,
        }
    }

    /// Mark a charge attempt as started.
    ///
    /// The next retry slot is pushed one base interval out while the attempt is
    /// in flight, so another replica's sweep skips the record and a crashed
    /// attempt becomes due again later.
    pub fn begin_attempt(
        &self,
        failure: &mut PaymentFailure,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        if !failure.is_active() {
            return Err(BillingError::invalid_transition("retry", failure.status));
        }
        failure.status = PaymentFailureStatus::Retrying;
        failure.last_retry_at = Some(now);
        if failure.next_retry_at.is_some() {
            failure.next_retry_at =
                Some((now + self.policy.base_interval).min(failure.grace_until));
        }
        failure.updated_utc = now;
        Ok(())
    }

    pub fn record_success(
        &self,
        failure: &mut PaymentFailure,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        if failure.status != PaymentFailureStatus::Retrying {
            return Err(BillingError::invalid_transition(
                "record success for",
                failure.status,
            ));
        }
        failure.status = PaymentFailureStatus::Succeeded;
        failure.next_retry_at = None;
        failure.updated_utc = now;
        Ok(())
    }

    /// Fold a failed attempt into the record. A non-retryable decline uses up
    /// every remaining retry at once.
    pub fn record_failure(
        &self,
        failure: &mut PaymentFailure,
        reason: Option<String>,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        if failure.status != PaymentFailureStatus::Retrying {
            return Err(BillingError::invalid_transition(
                "record failure for",
                failure.status,
            ));
        }
        failure.retry_count = if retryable {
            (failure.retry_count + 1).min(failure.max_retries)
        } else {
            failure.max_retries
        };
        if reason.is_some() {
            failure.failure_reason = reason;
        }
        failure.next_retry_at = self.next_retry_after(failure, now);
        failure.updated_utc = now;
        Ok(())
    }

    pub fn expire_grace(
        &self,
        failure: &mut PaymentFailure,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        if !failure.is_active() {
            return Err(BillingError::invalid_transition("expire", failure.status));
        }
        if !self.grace_elapsed(failure, now) {
            return Err(BillingError::InvalidRequest(format!(
                "grace period of payment failure {} runs until {}",
                failure.failure_id, failure.grace_until
            )));
        }
        failure.status = PaymentFailureStatus::GraceExpired;
        failure.next_retry_at = None;
        failure.updated_utc = now;
        Ok(())
    }

    pub fn complete_downgrade(
        &self,
        failure: &mut PaymentFailure,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        if failure.status != PaymentFailureStatus::GraceExpired {
            return Err(BillingError::invalid_transition("downgrade", failure.status));
        }
        failure.status = PaymentFailureStatus::Downgraded;
        failure.updated_utc = now;
        Ok(())
    }

    pub fn resolve(
        &self,
        failure: &mut PaymentFailure,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        if failure.status.is_terminal() {
            return Err(BillingError::invalid_transition("resolve", failure.status));
        }
        failure.status = PaymentFailureStatus::ManuallyResolved;
        failure.next_retry_at = None;
        failure.resolution_note = note;
        failure.updated_utc = now;
        Ok(())
    }
}
