//! Static plan catalog.

use crate::error::BillingError;
use crate::models::{CreditKind, FeatureFlags, PlanEntitlement, PlanId};
use chrono::Duration;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Longest grace period any plan may carry.
pub const MAX_GRACE_PERIOD_DAYS: i64 = 3650;

/// Read-only mapping from plan to entitlement.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: BTreeMap<PlanId, PlanEntitlement>,
    default_grace_days: i64,
}

impl PlanCatalog {
    /// The plans the product sells today.
    pub fn standard() -> Self {
        let starter_features = FeatureFlags {
            custom_branding: true,
            auto_reminders: true,
            ..FeatureFlags::default()
        };
        let professional_features = FeatureFlags {
            advanced_reports: true,
            ..starter_features
        };
        let business_features = FeatureFlags {
            custom_branding: true,
            auto_reminders: true,
            advanced_reports: true,
            multi_user_seats: true,
            priority_support: true,
        };

        let plans = [
            PlanEntitlement {
                plan: PlanId::Free,
                name: "Free".to_string(),
                email_credits_monthly: 50,
                sms_credits_monthly: 10,
                invoice_limit: Some(5),
                monthly_price: Decimal::ZERO,
                grace_period_days: None,
                features: FeatureFlags::default(),
            },
            PlanEntitlement {
                plan: PlanId::Starter,
                name: "Starter".to_string(),
                email_credits_monthly: 500,
                sms_credits_monthly: 100,
                invoice_limit: Some(100),
                monthly_price: Decimal::new(999, 2),
                grace_period_days: None,
                features: starter_features,
            },
            PlanEntitlement {
                plan: PlanId::Professional,
                name: "Professional".to_string(),
                email_credits_monthly: 2_000,
                sms_credits_monthly: 250,
                invoice_limit: None,
                monthly_price: Decimal::new(2999, 2),
                grace_period_days: None,
                features: professional_features,
            },
            PlanEntitlement {
                plan: PlanId::Business,
                name: "Business".to_string(),
                email_credits_monthly: 10_000,
                sms_credits_monthly: 1_000,
                invoice_limit: None,
                monthly_price: Decimal::new(7999, 2),
                grace_period_days: Some(14),
                features: business_features,
            },
        ];

        Self {
            plans: plans.into_iter().map(|p| (p.plan, p)).collect(),
            default_grace_days: 7,
        }
    }

    /// Clamped to `0..=MAX_GRACE_PERIOD_DAYS`.
    pub fn with_default_grace_days(mut self, days: i64) -> Self {
        self.default_grace_days = days.clamp(0, MAX_GRACE_PERIOD_DAYS);
        self
    }

    pub fn entitlement(&self, plan: PlanId) -> Result<&PlanEntitlement, BillingError> {
        self.plans
            .get(&plan)
            .ok_or_else(|| BillingError::UnknownPlan(plan.to_string()))
    }

    /// The plan accounts are downgraded to.
    pub fn free_tier(&self) -> PlanId {
        PlanId::Free
    }

    /// How long an account on `plan` keeps paid features after a failed charge.
    pub fn grace_period(&self, plan: PlanId) -> Duration {
        let days = self
            .plans
            .get(&plan)
            .and_then(|p| p.grace_period_days)
            .unwrap_or(self.default_grace_days)
            .clamp(0, MAX_GRACE_PERIOD_DAYS);
        Duration::days(days)
    }

    pub fn list(&self) -> impl Iterator<Item = &PlanEntitlement> {
        self.plans.values()
    }

    pub fn limit(&self, plan: PlanId, kind: CreditKind) -> Result<Option<i64>, BillingError> {
        Ok(self.entitlement(plan)?.limit_for(kind))
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_invoices_may_be_unlimited() {
        let catalog = PlanCatalog::standard();
        for plan in catalog.list() {
            assert!(plan.limit_for(CreditKind::Email).is_some());
            assert!(plan.limit_for(CreditKind::Sms).is_some());
        }
        assert_eq!(
            catalog.limit(PlanId::Professional, CreditKind::Invoice).unwrap(),
            None
        );
        assert_eq!(
            catalog.limit(PlanId::Free, CreditKind::Invoice).unwrap(),
            Some(5)
        );
    }

    #[test]
    fn test_grace_period_uses_plan_override_then_default() {
        let catalog = PlanCatalog::standard().with_default_grace_days(10);
        assert_eq!(catalog.grace_period(PlanId::Starter), Duration::days(10));
        assert_eq!(catalog.grace_period(PlanId::Business), Duration::days(14));
    }

    #[test]
    fn test_default_grace_is_bounded() {
        let catalog = PlanCatalog::standard().with_default_grace_days(100_000_000);
        assert_eq!(
            catalog.grace_period(PlanId::Starter),
            Duration::days(MAX_GRACE_PERIOD_DAYS)
        );
        let catalog = PlanCatalog::standard().with_default_grace_days(-3);
        assert_eq!(catalog.grace_period(PlanId::Starter), Duration::zero());
    }

    #[test]
    fn test_free_tier_is_unpaid() {
        let catalog = PlanCatalog::standard();
        let free = catalog.entitlement(catalog.free_tier()).unwrap();
        assert!(!free.is_paid());
        assert!(catalog.entitlement(PlanId::Starter).unwrap().is_paid());
        assert_eq!(catalog.list().count(), 4);
    }
}
