//! Usage credit metering.
//!
//! Balances are opened lazily on first use and rolled forward lazily at the
//! start of every check or consume, so there is no reset timer to miss.
//! Consumption is serialized per account through [`AccountLocks`] and every
//! write is a version compare-and-swap against the store.

use crate::error::BillingError;
use crate::models::{Account, CreditBalance, CreditKind, CreditUsage, KindUsage};
use crate::services::catalog::PlanCatalog;
use crate::services::clock::ClockSource;
use crate::services::locks::AccountLocks;
use crate::services::metrics::{record_credits_consumed, record_credits_denied};
use crate::services::store::BillingStore;
use chrono::{DateTime, Duration, Months, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const SAVE_ATTEMPTS: usize = 3;

/// One calendar month after `start`, clamped to the end of shorter months.
pub fn add_one_month(start: DateTime<Utc>) -> DateTime<Utc> {
    start
        .checked_add_months(Months::new(1))
        .unwrap_or_else(|| start + Duration::days(30))
}

/// Advance the cycle until it contains `now`. Returns whether anything changed.
pub fn roll_cycle(balance: &mut CreditBalance, now: DateTime<Utc>) -> bool {
    let mut rolled = false;
    while now >= balance.cycle_end {
        balance.cycle_start = balance.cycle_end;
        balance.cycle_end = add_one_month(balance.cycle_start);
        rolled = true;
    }
    if rolled {
        balance.email_used = 0;
        balance.sms_used = 0;
        balance.invoices_used = 0;
        balance.updated_utc = now;
    }
    rolled
}

/// Whether `count` more credits fit under `limit`. Existing overage blocks
/// further use until the next reset.
pub fn is_available(used: i64, count: i64, limit: Option<i64>) -> bool {
    match limit {
        None => true,
        Some(limit) => used.saturating_add(count) <= limit,
    }
}

fn days_until(now: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    let secs = (at - now).num_seconds().max(0);
    (secs + 86_399) / 86_400
}

/// Balance as loaded, plus the version it must be saved against.
struct Loaded {
    account: Account,
    balance: CreditBalance,
    stored_version: Option<i64>,
    rolled: bool,
}

#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn BillingStore>,
    catalog: Arc<PlanCatalog>,
    clock: Arc<dyn ClockSource>,
    locks: AccountLocks,
}

impl CreditLedger {
    pub fn new(
        store: Arc<dyn BillingStore>,
        catalog: Arc<PlanCatalog>,
        clock: Arc<dyn ClockSource>,
        locks: AccountLocks,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            locks,
        }
    }

    async fn load(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<Loaded, BillingError> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("account", account_id))?;

        let (mut balance, stored_version) = match self.store.get_balance(account_id).await? {
            Some(balance) => {
                let version = balance.version;
                (balance, Some(version))
            }
            None => {
                let start = account.plan_assigned_at.min(now);
                let balance = CreditBalance::new(account_id, start, add_one_month(start), now);
                (balance, None)
            }
        };
        let rolled = roll_cycle(&mut balance, now);
        if rolled {
            debug!(
                account_id = %account_id,
                cycle_start = %balance.cycle_start,
                cycle_end = %balance.cycle_end,
                "Credit cycle rolled forward"
            );
        }

        Ok(Loaded {
            account,
            balance,
            stored_version,
            rolled,
        })
    }

    async fn save(&self, loaded: &mut Loaded) -> Result<bool, BillingError> {
        loaded.balance.version = loaded.stored_version.map_or(0, |v| v + 1);
        self.store
            .save_balance(&loaded.balance, loaded.stored_version)
            .await
    }

    fn validate_count(count: i64) -> Result<(), BillingError> {
        if count <= 0 {
            return Err(BillingError::InvalidRequest(format!(
                "credit count must be positive, got {}",
                count
            )));
        }
        Ok(())
    }

    /// Advisory check; never changes usage.
    #[instrument(skip(self), fields(account_id = %account_id, kind = %kind))]
    pub async fn check_available(
        &self,
        account_id: Uuid,
        kind: CreditKind,
        count: i64,
    ) -> Result<bool, BillingError> {
        Self::validate_count(count)?;
        let loaded = self.load(account_id, self.clock.now()).await?;
        let limit = self.catalog.limit(loaded.account.plan, kind)?;
        Ok(is_available(loaded.balance.used(kind), count, limit))
    }

    /// Authoritative gate: re-checks and increments under the account lock.
    #[instrument(skip(self), fields(account_id = %account_id, kind = %kind))]
    pub async fn consume(
        &self,
        account_id: Uuid,
        kind: CreditKind,
        count: i64,
    ) -> Result<CreditBalance, BillingError> {
        Self::validate_count(count)?;
        let _guard = self.locks.lock(account_id).await;

        for attempt in 1..=SAVE_ATTEMPTS {
            let mut loaded = self.load(account_id, self.clock.now()).await?;
            let limit = self.catalog.limit(loaded.account.plan, kind)?;
            let used = loaded.balance.used(kind);

            if !is_available(used, count, limit) {
                record_credits_denied(kind.as_str());
                return Err(BillingError::InsufficientCredits {
                    kind,
                    requested: count,
                    available: limit.map_or(0, |l| (l - used).max(0)),
                });
            }

            *loaded.balance.used_mut(kind) = used.checked_add(count).ok_or_else(|| {
                BillingError::InvalidRequest(format!(
                    "credit count {} overflows {} usage of {}",
                    count, kind, used
                ))
            })?;
            loaded.balance.updated_utc = self.clock.now();

            if self.save(&mut loaded).await? {
                record_credits_consumed(kind.as_str(), count);
                info!(
                    account_id = %account_id,
                    kind = %kind,
                    count = count,
                    used = loaded.balance.used(kind),
                    "Credits consumed"
                );
                return Ok(loaded.balance);
            }
            warn!(account_id = %account_id, attempt = attempt, "Credit balance changed underneath, reloading");
        }

        Err(BillingError::Stale {
            entity: "credit balance",
            id: account_id,
        })
    }

    /// Roll the cycle if it has ended and persist the result. A no-op when not due.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn reset_if_due(&self, account_id: Uuid) -> Result<CreditBalance, BillingError> {
        let _guard = self.locks.lock(account_id).await;

        for _ in 0..SAVE_ATTEMPTS {
            let mut loaded = self.load(account_id, self.clock.now()).await?;
            if !loaded.rolled && loaded.stored_version.is_some() {
                return Ok(loaded.balance);
            }
            if self.save(&mut loaded).await? {
                info!(
                    account_id = %account_id,
                    cycle_start = %loaded.balance.cycle_start,
                    "Credit cycle reset"
                );
                return Ok(loaded.balance);
            }
        }

        Err(BillingError::Stale {
            entity: "credit balance",
            id: account_id,
        })
    }

    /// Usage and limits for the current cycle.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn usage(&self, account_id: Uuid) -> Result<CreditUsage, BillingError> {
        let now = self.clock.now();
        let loaded = self.load(account_id, now).await?;
        let entitlement = self.catalog.entitlement(loaded.account.plan)?;
        let balance = &loaded.balance;
        let kind_usage =
            |kind: CreditKind| KindUsage::new(balance.used(kind), entitlement.limit_for(kind));

        Ok(CreditUsage {
            account_id,
            plan: loaded.account.plan,
            email: kind_usage(CreditKind::Email),
            sms: kind_usage(CreditKind::Sms),
            invoice: kind_usage(CreditKind::Invoice),
            cycle_start: balance.cycle_start,
            reset_date: balance.cycle_end,
            days_until_reset: days_until(now, balance.cycle_end),
        })
    }
}
