//! Services module for billing-resilience.

pub mod catalog;
pub mod clock;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod notifier;
pub mod orchestrator;
pub mod processor;
pub mod scheduler;
pub mod store;
pub mod sweeper;

pub use catalog::PlanCatalog;
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use ledger::CreditLedger;
pub use locks::{AccountLocks, InFlight};
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{BillingEvent, LogNotifier, Notifier, WebhookNotifier};
pub use orchestrator::{
    AttemptOutcome, AttemptTrigger, BillingOrchestrator, ManualRetryOutcome, RetryStatus,
    SweepReport,
};
pub use processor::{ChargeOutcome, HttpPaymentProcessor, PaymentProcessor, UnconfiguredProcessor};
pub use scheduler::{RetryPolicy, RetryScheduler};
pub use store::{BillingStore, MemoryStore, PgStore};
pub use sweeper::RetrySweeper;
