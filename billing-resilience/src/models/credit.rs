//! Usage credit model.

use crate::models::PlanId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of metered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Email,
    Sms,
    Invoice,
}

impl CreditKind {
    pub const ALL: [CreditKind; 3] = [CreditKind::Email, CreditKind::Sms, CreditKind::Invoice];

    pub fn as_str(&self) -> &'static str {
        match self {
            CreditKind::Email => "email",
            CreditKind::Sms => "sms",
            CreditKind::Invoice => "invoice",
        }
    }
}

impl fmt::Display for CreditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-account usage counters for one monthly cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    pub account_id: Uuid,
    pub email_used: i64,
    pub sms_used: i64,
    pub invoices_used: i64,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every persisted write.
    pub version: i64,
    pub updated_utc: DateTime<Utc>,
}

impl CreditBalance {
    /// A fresh, zeroed balance for the cycle `[cycle_start, cycle_end)`.
    pub fn new(
        account_id: Uuid,
        cycle_start: DateTime<Utc>,
        cycle_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            email_used: 0,
            sms_used: 0,
            invoices_used: 0,
            cycle_start,
            cycle_end,
            version: 0,
            updated_utc: now,
        }
    }

    pub fn used(&self, kind: CreditKind) -> i64 {
        match kind {
            CreditKind::Email => self.email_used,
            CreditKind::Sms => self.sms_used,
            CreditKind::Invoice => self.invoices_used,
        }
    }

    pub fn used_mut(&mut self, kind: CreditKind) -> &mut i64 {
        match kind {
            CreditKind::Email => &mut self.email_used,
            CreditKind::Sms => &mut self.sms_used,
            CreditKind::Invoice => &mut self.invoices_used,
        }
    }
}

/// Usage of one credit kind against the plan limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindUsage {
    pub used: i64,
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub unlimited: bool,
}

impl KindUsage {
    pub fn new(used: i64, limit: Option<i64>) -> Self {
        Self {
            used,
            limit,
            remaining: limit.map(|l| (l - used).max(0)),
            unlimited: limit.is_none(),
        }
    }
}

/// Balance and plan limits for the current cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditUsage {
    pub account_id: Uuid,
    pub plan: PlanId,
    pub email: KindUsage,
    pub sms: KindUsage,
    pub invoice: KindUsage,
    pub cycle_start: DateTime<Utc>,
    pub reset_date: DateTime<Utc>,
    pub days_until_reset: i64,
}
