//! Payment processor collaborator.

use crate::error::BillingError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// Result of a charge the processor actually evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Succeeded { reference: Option<String> },
    /// `retryable = false` ends the automatic schedule at once.
    Declined { reason: String, retryable: bool },
}

/// Charges an account. Transport failures are `Err(ProcessorUnavailable)`.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn charge(&self, account_id: Uuid, amount: Decimal) -> Result<ChargeOutcome, BillingError>;
}

#[derive(Debug, Serialize)]
struct ChargeRequest {
    account_id: Uuid,
    amount: Decimal,
    idempotency_key: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ChargeStatus {
    Succeeded,
    Declined,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    status: ChargeStatus,
    reference: Option<String>,
    reason: Option<String>,
    #[serde(default = "default_retryable")]
    retryable: bool,
}

fn default_retryable() -> bool {
    true
}

/// Processor reached over HTTP: `POST {base_url}/charges`.
#[derive(Debug, Clone)]
pub struct HttpPaymentProcessor {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpPaymentProcessor {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    #[instrument(skip(self), fields(processor = %self.base_url))]
    async fn charge(&self, account_id: Uuid, amount: Decimal) -> Result<ChargeOutcome, BillingError> {
        let url = format!("{}/charges", self.base_url);
        let request = ChargeRequest {
            account_id,
            amount,
            idempotency_key: Uuid::new_v4(),
        };

        let response = self
            .client
            .traced_post(&url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BillingError::ProcessorUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BillingError::ProcessorUnavailable(format!(
                "processor returned {}",
                status
            )));
        }

        let body: ChargeResponse = response
            .json()
            .await
            .map_err(|e| BillingError::ProcessorUnavailable(format!("invalid response: {}", e)))?;

        Ok(match body.status {
            ChargeStatus::Succeeded => ChargeOutcome::Succeeded {
                reference: body.reference,
            },
            ChargeStatus::Declined => ChargeOutcome::Declined {
                reason: body.reason.unwrap_or_else(|| "payment declined".to_string()),
                retryable: body.retryable,
            },
        })
    }
}

/// Stand-in when no processor is configured: every attempt is unavailable,
/// so failures simply ride out their grace period.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredProcessor;

#[async_trait]
impl PaymentProcessor for UnconfiguredProcessor {
    async fn charge(&self, _account_id: Uuid, _amount: Decimal) -> Result<ChargeOutcome, BillingError> {
        Err(BillingError::ProcessorUnavailable(
            "no payment processor configured".to_string(),
        ))
    }
}
