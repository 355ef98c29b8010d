//! Domain models for billing-resilience.

mod account;
mod credit;
mod payment_failure;
mod plan;

pub use account::Account;
pub use credit::{CreditBalance, CreditKind, CreditUsage, KindUsage};
pub use payment_failure::{ListFailuresFilter, PaymentFailure, PaymentFailureStatus};
pub use plan::{FeatureFlags, PlanEntitlement, PlanId};
