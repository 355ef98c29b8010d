//! Notification collaborator. Delivery is fire-and-forget: billing state never
//! depends on whether a notification arrived.

use crate::models::PlanId;
use crate::services::metrics::record_notification;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BillingEvent {
    GracePeriodStarted {
        account_id: Uuid,
        failure_id: Uuid,
        plan: PlanId,
        amount: Decimal,
        grace_until: DateTime<Utc>,
    },
    PlanDowngraded {
        account_id: Uuid,
        failure_id: Uuid,
        from_plan: PlanId,
        to_plan: PlanId,
    },
    ManualRetrySucceeded {
        account_id: Uuid,
        failure_id: Uuid,
        amount: Decimal,
    },
}

impl BillingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BillingEvent::GracePeriodStarted { .. } => "grace_period_started",
            BillingEvent::PlanDowngraded { .. } => "plan_downgraded",
            BillingEvent::ManualRetrySucceeded { .. } => "manual_retry_succeeded",
        }
    }

    pub fn account_id(&self) -> Uuid {
        match self {
            BillingEvent::GracePeriodStarted { account_id, .. }
            | BillingEvent::PlanDowngraded { account_id, .. }
            | BillingEvent::ManualRetrySucceeded { account_id, .. } => *account_id,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &BillingEvent) -> anyhow::Result<()>;
}

/// Send `event` on a background task and return immediately.
pub fn dispatch(notifier: Arc<dyn Notifier>, event: BillingEvent) {
    tokio::spawn(async move {
        match notifier.notify(&event).await {
            Ok(()) => record_notification(event.name(), "delivered"),
            Err(e) => {
                record_notification(event.name(), "failed");
                tracing::warn!(
                    event = event.name(),
                    account_id = %event.account_id(),
                    error = %e,
                    "Billing notification not delivered"
                );
            }
        }
    });
}

/// Writes events to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &BillingEvent) -> anyhow::Result<()> {
        tracing::info!(
            event = event.name(),
            account_id = %event.account_id(),
            "Billing notification"
        );
        Ok(())
    }
}

/// POSTs events as JSON to a webhook, retrying transient failures.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    max_elapsed: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            max_elapsed: Duration::from_secs(60),
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    async fn post_once(&self, event: &BillingEvent) -> Result<(), backoff::Error<String>> {
        let response = self
            .client
            .traced_post(&self.url)
            .json(event)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| backoff::Error::transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(backoff::Error::transient(format!("webhook returned {}", status)))
        } else {
            Err(backoff::Error::permanent(format!("webhook returned {}", status)))
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &BillingEvent) -> anyhow::Result<()> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(policy, || self.post_once(event))
            .await
            .map_err(|e| anyhow::anyhow!("notification webhook {}: {}", self.url, e))
    }
}
