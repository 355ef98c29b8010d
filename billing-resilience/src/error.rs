//! Billing error taxonomy.

use crate::models::{CreditKind, PaymentFailureStatus};
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("account {account_id} already has an open payment failure {failure_id}")]
    FailureAlreadyOpen { account_id: Uuid, failure_id: Uuid },

    #[error("insufficient {kind} credits: requested {requested}, available {available}")]
    InsufficientCredits {
        kind: CreditKind,
        requested: i64,
        available: i64,
    },

    #[error("payment processor unavailable: {0}")]
    ProcessorUnavailable(String),

    #[error("{entity} {id} not found")]
    RecordNotFound { entity: &'static str, id: Uuid },

    #[error("cannot {action} a payment failure in status {status}")]
    InvalidTransition {
        action: &'static str,
        status: &'static str,
    },

    #[error("a charge attempt for payment failure {0} is already in progress")]
    AttemptInProgress(Uuid),

    #[error("{entity} {id} was modified concurrently")]
    Stale { entity: &'static str, id: Uuid },

    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl BillingError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        BillingError::RecordNotFound { entity, id }
    }

    pub fn invalid_transition(action: &'static str, status: PaymentFailureStatus) -> Self {
        BillingError::InvalidTransition {
            action,
            status: status.as_str(),
        }
    }

    /// Short label used for the error metric.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::FailureAlreadyOpen { .. } => "failure_already_open",
            BillingError::InsufficientCredits { .. } => "insufficient_credits",
            BillingError::ProcessorUnavailable(_) => "processor_unavailable",
            BillingError::RecordNotFound { .. } => "record_not_found",
            BillingError::InvalidTransition { .. } => "invalid_transition",
            BillingError::AttemptInProgress(_) => "attempt_in_progress",
            BillingError::Stale { .. } => "stale",
            BillingError::UnknownPlan(_) => "unknown_plan",
            BillingError::InvalidRequest(_) => "invalid_request",
            BillingError::Storage(_) => "storage",
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::FailureAlreadyOpen { .. }
            | BillingError::InvalidTransition { .. }
            | BillingError::AttemptInProgress(_)
            | BillingError::Stale { .. } => AppError::Conflict(anyhow::Error::new(err)),
            BillingError::InsufficientCredits { .. } => {
                AppError::PaymentRequired(anyhow::Error::new(err))
            }
            BillingError::RecordNotFound { .. } => AppError::NotFound(anyhow::Error::new(err)),
            BillingError::UnknownPlan(_) | BillingError::InvalidRequest(_) => {
                AppError::BadRequest(anyhow::Error::new(err))
            }
            BillingError::ProcessorUnavailable(_) => {
                AppError::BadGateway("payment processor unavailable".to_string())
            }
            BillingError::Storage(e) => AppError::DatabaseError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_billing_errors_map_to_http_status() {
        let id = Uuid::new_v4();
        let cases = [
            (
                BillingError::FailureAlreadyOpen {
                    account_id: id,
                    failure_id: id,
                },
                StatusCode::CONFLICT,
            ),
            (
                BillingError::InsufficientCredits {
                    kind: CreditKind::Sms,
                    requested: 1,
                    available: 0,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                BillingError::not_found("payment failure", id),
                StatusCode::NOT_FOUND,
            ),
            (
                BillingError::invalid_transition("retry", PaymentFailureStatus::Succeeded),
                StatusCode::CONFLICT,
            ),
            (BillingError::AttemptInProgress(id), StatusCode::CONFLICT),
            (
                BillingError::UnknownPlan("gold".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BillingError::ProcessorUnavailable("timeout".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                BillingError::Storage(anyhow::anyhow!("pool closed")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_insufficient_credits_message() {
        let err = BillingError::InsufficientCredits {
            kind: CreditKind::Email,
            requested: 5,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "insufficient email credits: requested 5, available 2"
        );
    }
}
