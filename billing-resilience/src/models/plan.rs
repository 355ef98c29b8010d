//! Subscription plan model.

use crate::error::BillingError;
use crate::models::CreditKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription plan identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    Free,
    Starter,
    Professional,
    Business,
}

impl PlanId {
    pub const ALL: [PlanId; 4] = [
        PlanId::Free,
        PlanId::Starter,
        PlanId::Professional,
        PlanId::Business,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Starter => "starter",
            PlanId::Professional => "professional",
            PlanId::Business => "business",
        }
    }

    /// Parse a stored plan identifier; unknown values yield `None`.
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanId::Free),
            "starter" => Some(PlanId::Starter),
            "professional" => Some(PlanId::Professional),
            "business" => Some(PlanId::Business),
            _ => None,
        }
    }
}

impl FromStr for PlanId {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlanId::from_string(s.trim()).ok_or_else(|| BillingError::UnknownPlan(s.to_string()))
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature flags granted by a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub custom_branding: bool,
    pub auto_reminders: bool,
    pub advanced_reports: bool,
    pub multi_user_seats: bool,
    pub priority_support: bool,
}

/// What a plan entitles an account to. Immutable reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntitlement {
    pub plan: PlanId,
    pub name: String,
    pub email_credits_monthly: i64,
    pub sms_credits_monthly: i64,
    /// `None` means unlimited invoices.
    pub invoice_limit: Option<i64>,
    pub monthly_price: Decimal,
    /// Overrides the service-wide default grace period when set.
    pub grace_period_days: Option<i64>,
    pub features: FeatureFlags,
}

impl PlanEntitlement {
    /// Monthly allowance for a credit kind; `None` means unlimited.
    pub fn limit_for(&self, kind: CreditKind) -> Option<i64> {
        match kind {
            CreditKind::Email => Some(self.email_credits_monthly),
            CreditKind::Sms => Some(self.sms_credits_monthly),
            CreditKind::Invoice => self.invoice_limit,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.monthly_price > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_id_round_trips_through_storage_string() {
        for plan in PlanId::ALL {
            assert_eq!(PlanId::from_string(plan.as_str()), Some(plan));
        }
        assert_eq!(PlanId::from_string("enterprise"), None);
        assert!(matches!(
            "enterprise".parse::<PlanId>(),
            Err(BillingError::UnknownPlan(_))
        ));
    }

    #[test]
    fn test_plan_id_serializes_snake_case() {
        let json = serde_json::to_string(&PlanId::Professional).unwrap();
        assert_eq!(json, "\"professional\"");
    }
}
