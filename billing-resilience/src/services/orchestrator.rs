//! Billing orchestrator: the single entry point for the REST layer and the
//! sweep task.
//!
//! Every mutation of a payment failure happens under the owning account's
//! lock and is persisted with a version check. Charge attempts are split in
//! two short critical sections around the processor call:
//!
//! 1. lock, reload, validate, mark the attempt started, persist, unlock;
//! 2. call the processor with no lock held;
//! 3. lock, reload, and apply the result only if the record is still at the
//!    version written in step 1. Anything else (operator resolve, downgrade)
//!    won, and the late result is discarded.
//!
//! An in-flight claim per failure keeps a sweep and a manual retry from
//! charging the same record twice.

use crate::error::BillingError;
use crate::models::{
    Account, CreditBalance, CreditKind, CreditUsage, ListFailuresFilter, PaymentFailure,
    PaymentFailureStatus, PlanEntitlement, PlanId,
};
use crate::services::catalog::PlanCatalog;
use crate::services::clock::ClockSource;
use crate::services::ledger::CreditLedger;
use crate::services::locks::{AccountLocks, InFlight};
use crate::services::metrics::{
    record_downgrade, record_error, record_failure_transition, record_retry_attempt,
    record_sweep,
};
use crate::services::notifier::{dispatch, BillingEvent, Notifier};
use crate::services::processor::{ChargeOutcome, PaymentProcessor};
use crate::services::scheduler::RetryScheduler;
use crate::services::store::BillingStore;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_SWEEP_BATCH: i64 = 500;
const STATUS_HISTORY_LIMIT: i64 = 50;

/// What started a charge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptTrigger {
    Sweep,
    Manual,
}

impl AttemptTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptTrigger::Sweep => "sweep",
            AttemptTrigger::Manual => "manual",
        }
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Declined { reason: String },
    ProcessorUnavailable,
    /// The record moved on while the processor was called.
    Discarded,
    /// Nothing to do by the time the lock was taken.
    NotDue,
}

impl AttemptOutcome {
    fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Succeeded => "succeeded",
            AttemptOutcome::Declined { .. } => "declined",
            AttemptOutcome::ProcessorUnavailable => "unavailable",
            AttemptOutcome::Discarded => "discarded",
            AttemptOutcome::NotDue => "not_due",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub downgraded: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct ManualRetryOutcome {
    pub success: bool,
    pub message: String,
    pub next_retry: Option<DateTime<Utc>>,
    pub failure: PaymentFailure,
}

/// Open payment problems of one account.
#[derive(Debug, Clone)]
pub struct RetryStatus {
    pub has_failed_payments: bool,
    pub failed_count: usize,
    pub grace_until: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub latest_failure: Option<PaymentFailure>,
}

pub struct BillingOrchestrator {
    store: Arc<dyn BillingStore>,
    catalog: Arc<PlanCatalog>,
    scheduler: RetryScheduler,
    ledger: CreditLedger,
    processor: Arc<dyn PaymentProcessor>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn ClockSource>,
    locks: AccountLocks,
    in_flight: InFlight,
    sweep_batch: i64,
}

impl BillingOrchestrator {
    pub fn new(
        store: Arc<dyn BillingStore>,
        catalog: Arc<PlanCatalog>,
        scheduler: RetryScheduler,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        let locks = AccountLocks::new();
        let ledger = CreditLedger::new(
            store.clone(),
            catalog.clone(),
            clock.clone(),
            locks.clone(),
        );
        Self {
            store,
            catalog,
            scheduler,
            ledger,
            processor,
            notifier,
            clock,
            locks,
            in_flight: InFlight::new(),
            sweep_batch: DEFAULT_SWEEP_BATCH,
        }
    }

    pub fn with_sweep_batch(mut self, batch: i64) -> Self {
        self.sweep_batch = batch.max(1);
        self
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn health_check(&self) -> Result<(), BillingError> {
        self.store.health_check().await
    }

    async fn persist(&self, failure: &mut PaymentFailure) -> Result<(), BillingError> {
        let expected = failure.version;
        failure.version += 1;
        if self.store.update_failure(failure, expected).await? {
            Ok(())
        } else {
            failure.version = expected;
            Err(BillingError::Stale {
                entity: "payment failure",
                id: failure.failure_id,
            })
        }
    }

    async fn load_failure(&self, failure_id: Uuid) -> Result<PaymentFailure, BillingError> {
        self.store
            .get_failure(failure_id)
            .await?
            .ok_or_else(|| BillingError::not_found("payment failure", failure_id))
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Register an account. Returns the stored account and whether it was new.
    #[instrument(skip(self), fields(account_id = %account_id, plan = %plan))]
    pub async fn register_account(
        &self,
        account_id: Uuid,
        plan: PlanId,
    ) -> Result<(Account, bool), BillingError> {
        self.catalog.entitlement(plan)?;
        let account = Account::new(account_id, plan, self.clock.now());
        if self.store.insert_account(&account).await? {
            info!(account_id = %account_id, plan = %plan, "Account registered");
            return Ok((account, true));
        }
        let existing = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("account", account_id))?;
        Ok((existing, false))
    }

    pub async fn get_account(&self, account_id: Uuid) -> Result<Account, BillingError> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("account", account_id))
    }

    /// Move an account to another plan. Usage counters are kept.
    #[instrument(skip(self), fields(account_id = %account_id, plan = %plan))]
    pub async fn change_plan(&self, account_id: Uuid, plan: PlanId) -> Result<Account, BillingError> {
        self.catalog.entitlement(plan)?;
        let _guard = self.locks.lock(account_id).await;
        let account = self
            .store
            .update_account_plan(account_id, plan, self.clock.now())
            .await?
            .ok_or_else(|| BillingError::not_found("account", account_id))?;
        info!(account_id = %account_id, plan = %plan, "Account plan changed");
        Ok(account)
    }

    pub fn plans(&self) -> Vec<PlanEntitlement> {
        self.catalog.list().cloned().collect()
    }

    // =========================================================================
    // Payment failures
    // =========================================================================

    /// Open a payment failure for a charge that just failed.
    #[instrument(skip(self, reason), fields(account_id = %account_id, plan = %plan))]
    pub async fn record_failure(
        &self,
        account_id: Uuid,
        plan: PlanId,
        amount: Decimal,
        reason: Option<String>,
    ) -> Result<PaymentFailure, BillingError> {
        if amount <= Decimal::ZERO {
            return Err(BillingError::InvalidRequest(
                "amount must be positive".to_string(),
            ));
        }
        self.catalog.entitlement(plan)?;
        let now = self.clock.now();

        let failure = {
            let _guard = self.locks.lock(account_id).await;

            if self.store.get_account(account_id).await?.is_none() {
                self.store
                    .insert_account(&Account::new(account_id, plan, now))
                    .await?;
            }
            if let Some(open) = self.store.find_active_failure(account_id).await? {
                return Err(BillingError::FailureAlreadyOpen {
                    account_id,
                    failure_id: open.failure_id,
                });
            }

            let failure = self.scheduler.open(
                account_id,
                plan,
                amount,
                reason,
                self.catalog.grace_period(plan),
                now,
            );
            self.store.insert_failure(&failure).await?;
            failure
        };

        record_failure_transition(failure.status.as_str());
        info!(
            account_id = %account_id,
            failure_id = %failure.failure_id,
            grace_until = %failure.grace_until,
            next_retry_at = ?failure.next_retry_at,
            "Payment failure recorded"
        );
        dispatch(
            self.notifier.clone(),
            BillingEvent::GracePeriodStarted {
                account_id,
                failure_id: failure.failure_id,
                plan,
                amount,
                grace_until: failure.grace_until,
            },
        );

        Ok(failure)
    }

    pub async fn get_failure(&self, failure_id: Uuid) -> Result<PaymentFailure, BillingError> {
        self.load_failure(failure_id).await
    }

    pub async fn list_failures(
        &self,
        account_id: Option<Uuid>,
        status: Option<PaymentFailureStatus>,
        limit: i64,
    ) -> Result<Vec<PaymentFailure>, BillingError> {
        self.store
            .list_failures(&ListFailuresFilter {
                account_id,
                status,
                limit,
            })
            .await
    }

    /// Current retry picture for an account.
    pub async fn retry_status(&self, account_id: Uuid) -> Result<RetryStatus, BillingError> {
        let open: Vec<PaymentFailure> = self
            .list_failures(Some(account_id), None, STATUS_HISTORY_LIMIT)
            .await?
            .into_iter()
            .filter(|f| !f.status.is_terminal())
            .collect();

        let latest = open.first().cloned();
        Ok(RetryStatus {
            has_failed_payments: !open.is_empty(),
            failed_count: open.len(),
            grace_until: latest.as_ref().map(|f| f.grace_until),
            next_retry_at: latest.as_ref().and_then(|f| f.next_retry_at),
            latest_failure: latest,
        })
    }

    /// Operator action: close a non-terminal failure out of band.
    #[instrument(skip(self, note), fields(failure_id = %failure_id))]
    pub async fn resolve_failure(
        &self,
        failure_id: Uuid,
        note: Option<String>,
    ) -> Result<PaymentFailure, BillingError> {
        let account_id = self.load_failure(failure_id).await?.account_id;
        let _guard = self.locks.lock(account_id).await;

        let mut failure = self.load_failure(failure_id).await?;
        let downgrade_owed = failure.status == PaymentFailureStatus::GraceExpired;
        self.scheduler
            .resolve(&mut failure, note, self.clock.now())?;
        self.persist(&mut failure).await?;

        record_failure_transition(failure.status.as_str());
        if downgrade_owed {
            warn!(
                account_id = %account_id,
                failure_id = %failure_id,
                "Resolved after grace expired, pending downgrade cancelled"
            );
        }
        info!(
            account_id = %account_id,
            failure_id = %failure_id,
            "Payment failure manually resolved"
        );
        Ok(failure)
    }

    /// Charge the account immediately for its open failure.
    ///
    /// `failure_id = None` picks the account's active failure.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn manual_retry(
        &self,
        account_id: Uuid,
        failure_id: Option<Uuid>,
    ) -> Result<ManualRetryOutcome, BillingError> {
        let failure = match failure_id {
            Some(id) => self
                .store
                .get_failure(id)
                .await?
                .filter(|f| f.account_id == account_id)
                .ok_or_else(|| BillingError::not_found("payment failure", id))?,
            None => self
                .store
                .find_active_failure(account_id)
                .await?
                .ok_or_else(|| BillingError::not_found("active payment failure", account_id))?,
        };
        if !failure.is_active() {
            return Err(BillingError::invalid_transition("retry", failure.status));
        }

        let _claim = self
            .in_flight
            .claim(failure.failure_id)
            .ok_or(BillingError::AttemptInProgress(failure.failure_id))?;

        let (outcome, failure) = self
            .attempt(failure.failure_id, AttemptTrigger::Manual, self.clock.now())
            .await?;

        let (success, message) = match &outcome {
            AttemptOutcome::Succeeded => {
                dispatch(
                    self.notifier.clone(),
                    BillingEvent::ManualRetrySucceeded {
                        account_id,
                        failure_id: failure.failure_id,
                        amount: failure.amount,
                    },
                );
                (true, "Payment successful. Your subscription is active.")
            }
            AttemptOutcome::Declined { .. } | AttemptOutcome::ProcessorUnavailable => (
                false,
                "Payment could not be completed. Please check your payment method and try again.",
            ),
            AttemptOutcome::Discarded | AttemptOutcome::NotDue => (
                false,
                "This payment was updated while the retry was in progress.",
            ),
        };

        Ok(ManualRetryOutcome {
            success,
            message: message.to_string(),
            next_retry: failure.next_retry_at,
            failure,
        })
    }

    /// One charge attempt. The caller holds the in-flight claim.
    async fn attempt(
        &self,
        failure_id: Uuid,
        trigger: AttemptTrigger,
        now: DateTime<Utc>,
    ) -> Result<(AttemptOutcome, PaymentFailure), BillingError> {
        let account_id = self.load_failure(failure_id).await?.account_id;

        let started = {
            let _guard = self.locks.lock(account_id).await;
            let mut failure = self.load_failure(failure_id).await?;

            let proceed = match trigger {
                AttemptTrigger::Manual => {
                    if !failure.is_active() {
                        return Err(BillingError::invalid_transition("retry", failure.status));
                    }
                    true
                }
                AttemptTrigger::Sweep => {
                    failure.is_active()
                        && !self.scheduler.grace_elapsed(&failure, now)
                        && self.scheduler.is_due(&failure, now)
                }
            };
            if !proceed {
                return Ok((AttemptOutcome::NotDue, failure));
            }

            self.scheduler.begin_attempt(&mut failure, now)?;
            self.persist(&mut failure).await?;
            failure
        };

        info!(
            account_id = %account_id,
            failure_id = %failure_id,
            trigger = trigger.as_str(),
            retry_count = started.retry_count,
            "Charging account"
        );
        let charge = self.processor.charge(account_id, started.amount).await;

        let _guard = self.locks.lock(account_id).await;
        let mut failure = self.load_failure(failure_id).await?;
        if failure.version != started.version {
            warn!(
                account_id = %account_id,
                failure_id = %failure_id,
                status = failure.status.as_str(),
                charge = ?charge,
                "Charge result arrived after the payment failure changed; discarded"
            );
            record_retry_attempt(trigger.as_str(), AttemptOutcome::Discarded.label());
            return Ok((AttemptOutcome::Discarded, failure));
        }

        let recorded_at = now.max(self.clock.now());
        let outcome = match charge {
            Ok(ChargeOutcome::Succeeded { reference }) => {
                self.scheduler.record_success(&mut failure, recorded_at)?;
                info!(
                    account_id = %account_id,
                    failure_id = %failure_id,
                    reference = ?reference,
                    "Payment recovered"
                );
                AttemptOutcome::Succeeded
            }
            Ok(ChargeOutcome::Declined { reason, retryable }) => {
                self.scheduler.record_failure(
                    &mut failure,
                    Some(reason.clone()),
                    retryable,
                    recorded_at,
                )?;
                AttemptOutcome::Declined { reason }
            }
            Err(e) => {
                warn!(
                    account_id = %account_id,
                    failure_id = %failure_id,
                    error = %e,
                    "Payment processor unavailable; attempt counted as failed"
                );
                self.scheduler
                    .record_failure(&mut failure, None, true, recorded_at)?;
                AttemptOutcome::ProcessorUnavailable
            }
        };
        self.persist(&mut failure).await?;

        record_retry_attempt(trigger.as_str(), outcome.label());
        if outcome == AttemptOutcome::Succeeded {
            record_failure_transition(failure.status.as_str());
        } else {
            info!(
                account_id = %account_id,
                failure_id = %failure_id,
                retry_count = failure.retry_count,
                next_retry_at = ?failure.next_retry_at,
                "Charge attempt failed"
            );
        }
        Ok((outcome, failure))
    }

    /// Grace is over: expire the failure and move the account to the free tier.
    /// Also finishes a downgrade an earlier run left half done.
    async fn downgrade(
        &self,
        failure_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentFailure>, BillingError> {
        let account_id = self.load_failure(failure_id).await?.account_id;
        let _guard = self.locks.lock(account_id).await;
        let mut failure = self.load_failure(failure_id).await?;

        if failure.is_active() {
            if !self.scheduler.grace_elapsed(&failure, now) {
                return Ok(None);
            }
            self.scheduler.expire_grace(&mut failure, now)?;
            self.persist(&mut failure).await?;
            record_failure_transition(failure.status.as_str());
        }
        if failure.status != PaymentFailureStatus::GraceExpired {
            return Ok(None);
        }

        let free = self.catalog.free_tier();
        let from_plan = self
            .store
            .get_account(account_id)
            .await?
            .map_or(failure.plan, |a| a.plan);
        self.store
            .update_account_plan(account_id, free, now)
            .await?
            .ok_or_else(|| BillingError::not_found("account", account_id))?;
        self.scheduler.complete_downgrade(&mut failure, now)?;
        self.persist(&mut failure).await?;

        record_failure_transition(failure.status.as_str());
        record_downgrade(from_plan.as_str());
        info!(
            account_id = %account_id,
            failure_id = %failure_id,
            from_plan = %from_plan,
            "Grace period expired; account downgraded"
        );
        dispatch(
            self.notifier.clone(),
            BillingEvent::PlanDowngraded {
                account_id,
                failure_id,
                from_plan,
                to_plan: free,
            },
        );
        Ok(Some(failure))
    }

    /// Process every failure due at `now`. Safe to run concurrently with
    /// itself and with request traffic.
    #[instrument(skip(self))]
    pub async fn process_due_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, BillingError> {
        let due = self.store.list_due_failures(now, self.sweep_batch).await?;
        let mut report = SweepReport::default();

        for failure in due {
            report.examined += 1;
            let Some(_claim) = self.in_flight.claim(failure.failure_id) else {
                report.skipped += 1;
                continue;
            };

            let needs_downgrade = failure.status == PaymentFailureStatus::GraceExpired
                || self.scheduler.grace_elapsed(&failure, now);

            if needs_downgrade {
                match self.downgrade(failure.failure_id, now).await {
                    Ok(Some(_)) => report.downgraded += 1,
                    Ok(None) => report.skipped += 1,
                    Err(e) => {
                        report.errors += 1;
                        record_error(e.kind(), "downgrade");
                        error!(failure_id = %failure.failure_id, error = %e, "Downgrade failed");
                    }
                }
                continue;
            }

            match self
                .attempt(failure.failure_id, AttemptTrigger::Sweep, now)
                .await
            {
                Ok((AttemptOutcome::Succeeded, _)) => {
                    report.attempted += 1;
                    report.succeeded += 1;
                }
                Ok((AttemptOutcome::Declined { .. } | AttemptOutcome::ProcessorUnavailable, _)) => {
                    report.attempted += 1;
                    report.failed += 1;
                }
                Ok((AttemptOutcome::Discarded, _)) => report.attempted += 1,
                Ok((AttemptOutcome::NotDue, _)) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    record_error(e.kind(), "retry");
                    error!(failure_id = %failure.failure_id, error = %e, "Retry attempt failed");
                }
            }
        }

        Ok(report)
    }

    /// One sweep at the current time, with metrics.
    pub async fn sweep(&self) -> Result<SweepReport, BillingError> {
        let started = Instant::now();
        let result = self.process_due_retries(self.clock.now()).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(report) => {
                record_sweep("ok", elapsed);
                if report.examined > 0 {
                    info!(
                        examined = report.examined,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        downgraded = report.downgraded,
                        skipped = report.skipped,
                        errors = report.errors,
                        "Retry sweep finished"
                    );
                }
            }
            Err(e) => {
                record_sweep("error", elapsed);
                record_error(e.kind(), "sweep");
            }
        }
        result
    }

    // =========================================================================
    // Credits
    // =========================================================================

    pub async fn credit_usage(&self, account_id: Uuid) -> Result<CreditUsage, BillingError> {
        self.ledger.usage(account_id).await
    }

    pub async fn check_credit(
        &self,
        account_id: Uuid,
        kind: CreditKind,
        count: i64,
    ) -> Result<bool, BillingError> {
        self.ledger.check_available(account_id, kind, count).await
    }

    pub async fn request_credit(
        &self,
        account_id: Uuid,
        kind: CreditKind,
        count: i64,
    ) -> Result<CreditBalance, BillingError> {
        self.ledger.consume(account_id, kind, count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use crate::services::store::MemoryStore;
    use crate::testing::{RecordingNotifier, ScriptedProcessor};
    use chrono::{Duration, TimeZone};
    use std::str::FromStr;

    struct Fixture {
        orchestrator: BillingOrchestrator,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        processor: ScriptedProcessor,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let processor = ScriptedProcessor::new();
        let orchestrator = BillingOrchestrator::new(
            store.clone(),
            Arc::new(PlanCatalog::standard()),
            RetryScheduler::default(),
            Arc::new(processor.clone()),
            Arc::new(RecordingNotifier::new()),
            clock.clone(),
        );
        Fixture {
            orchestrator,
            store,
            clock,
            processor,
        }
    }

    fn amount() -> Decimal {
        Decimal::from_str("29.99").unwrap()
    }

    #[tokio::test]
    async fn test_record_failure_registers_missing_account() {
        let f = fixture();
        let account_id = Uuid::new_v4();

        let failure = f
            .orchestrator
            .record_failure(account_id, PlanId::Professional, amount(), None)
            .await
            .unwrap();

        assert_eq!(failure.status, PaymentFailureStatus::Pending);
        assert_eq!(failure.next_retry_at, Some(t0() + Duration::hours(1)));
        let account = f.orchestrator.get_account(account_id).await.unwrap();
        assert_eq!(account.plan, PlanId::Professional);
    }

    #[tokio::test]
    async fn test_pending_failure_downgrades_when_grace_passes_unattempted() {
        let f = fixture();
        let account_id = Uuid::new_v4();
        f.orchestrator
            .register_account(account_id, PlanId::Starter)
            .await
            .unwrap();
        let failure = f
            .orchestrator
            .record_failure(account_id, PlanId::Starter, amount(), None)
            .await
            .unwrap();

        let report = f
            .orchestrator
            .process_due_retries(t0() + Duration::days(8))
            .await
            .unwrap();

        assert_eq!(report.downgraded, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(f.processor.call_count(), 0);
        let stored = f.orchestrator.get_failure(failure.failure_id).await.unwrap();
        assert_eq!(stored.status, PaymentFailureStatus::Downgraded);
        let account = f.orchestrator.get_account(account_id).await.unwrap();
        assert_eq!(account.plan, PlanId::Free);
        assert_eq!(account.plan_assigned_at, t0() + Duration::days(8));
    }

    #[tokio::test]
    async fn test_interrupted_downgrade_is_finished_by_next_sweep() {
        let f = fixture();
        let account_id = Uuid::new_v4();
        f.orchestrator
            .register_account(account_id, PlanId::Business)
            .await
            .unwrap();
        let mut failure = f
            .orchestrator
            .record_failure(account_id, PlanId::Business, amount(), None)
            .await
            .unwrap();

        // A previous run expired the grace period and stopped there.
        let expired_at = t0() + Duration::days(14);
        RetryScheduler::default()
            .expire_grace(&mut failure, expired_at)
            .unwrap();
        failure.version += 1;
        assert!(f.store.update_failure(&failure, 0).await.unwrap());

        let report = f
            .orchestrator
            .process_due_retries(expired_at + Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(report.downgraded, 1);
        let stored = f.orchestrator.get_failure(failure.failure_id).await.unwrap();
        assert_eq!(stored.status, PaymentFailureStatus::Downgraded);
        assert_eq!(
            f.orchestrator.get_account(account_id).await.unwrap().plan,
            PlanId::Free
        );
    }

    #[tokio::test]
    async fn test_operator_resolve_after_grace_expiry_keeps_plan() {
        let f = fixture();
        let account_id = Uuid::new_v4();
        let mut failure = f
            .orchestrator
            .record_failure(account_id, PlanId::Starter, amount(), None)
            .await
            .unwrap();

        let expired_at = t0() + Duration::days(7);
        RetryScheduler::default()
            .expire_grace(&mut failure, expired_at)
            .unwrap();
        failure.version += 1;
        assert!(f.store.update_failure(&failure, 0).await.unwrap());
        f.clock.set(expired_at + Duration::minutes(1));

        let resolved = f
            .orchestrator
            .resolve_failure(failure.failure_id, Some("paid by wire".into()))
            .await
            .unwrap();
        assert_eq!(resolved.status, PaymentFailureStatus::ManuallyResolved);

        let report = f
            .orchestrator
            .process_due_retries(expired_at + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(report.downgraded, 0);
        assert_eq!(
            f.orchestrator.get_account(account_id).await.unwrap().plan,
            PlanId::Starter
        );
    }

    #[tokio::test]
    async fn test_manual_retry_rejects_terminal_failure() {
        let f = fixture();
        let account_id = Uuid::new_v4();
        let failure = f
            .orchestrator
            .record_failure(account_id, PlanId::Starter, amount(), None)
            .await
            .unwrap();
        f.orchestrator
            .resolve_failure(failure.failure_id, None)
            .await
            .unwrap();

        let err = f
            .orchestrator
            .manual_retry(account_id, Some(failure.failure_id))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::InvalidTransition { .. }));
        assert_eq!(f.processor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_new_failure_allowed_after_previous_closes() {
        let f = fixture();
        let account_id = Uuid::new_v4();
        f.processor.push_success();
        f.orchestrator
            .record_failure(account_id, PlanId::Starter, amount(), None)
            .await
            .unwrap();
        let outcome = f.orchestrator.manual_retry(account_id, None).await.unwrap();
        assert!(outcome.success);

        f.clock.advance(Duration::days(30));
        let next = f
            .orchestrator
            .record_failure(account_id, PlanId::Starter, amount(), None)
            .await
            .unwrap();

        assert_eq!(next.created_utc, t0() + Duration::days(30));
        let status = f.orchestrator.retry_status(account_id).await.unwrap();
        assert_eq!(status.failed_count, 1);
        assert_eq!(
            status.latest_failure.map(|l| l.failure_id),
            Some(next.failure_id)
        );
    }

    #[tokio::test]
    async fn test_record_failure_requires_positive_amount() {
        let f = fixture();
        let err = f
            .orchestrator
            .record_failure(Uuid::new_v4(), PlanId::Starter, Decimal::ZERO, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidRequest(_)));
    }
}
