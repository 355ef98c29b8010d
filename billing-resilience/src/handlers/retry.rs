//! Customer-facing payment retry endpoints.

use crate::dtos::{
    ListFailuresQuery, ManualRetryRequest, ManualRetryResponse, PaymentFailureResponse,
    RetryStatusResponse,
};
use crate::handlers::optional_body;
use crate::middleware::AccountContext;
use crate::startup::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use service_core::error::AppError;
use validator::Validate;

const DEFAULT_LIST_LIMIT: i64 = 50;

#[tracing::instrument(skip(state), fields(account_id = %ctx.account_id))]
pub async fn retry_status(
    State(state): State<AppState>,
    ctx: AccountContext,
) -> Result<Json<RetryStatusResponse>, AppError> {
    let status = state.orchestrator.retry_status(ctx.account_id).await?;
    Ok(Json(status.into()))
}

/// Charge the open failure immediately. An absent body retries the
/// account's open failure; a malformed one is rejected.
#[tracing::instrument(skip(state, request), fields(account_id = %ctx.account_id))]
pub async fn manual_retry(
    State(state): State<AppState>,
    ctx: AccountContext,
    request: Result<Json<ManualRetryRequest>, JsonRejection>,
) -> Result<Json<ManualRetryResponse>, AppError> {
    let request = optional_body(request)?;

    let outcome = state
        .orchestrator
        .manual_retry(ctx.account_id, request.transaction_id)
        .await?;

    tracing::info!(
        failure_id = %outcome.failure.failure_id,
        success = outcome.success,
        retry_count = outcome.failure.retry_count,
        "Manual retry completed"
    );

    Ok(Json(outcome.into()))
}

/// Payment failure history for the caller, newest first.
#[tracing::instrument(skip(state, query), fields(account_id = %ctx.account_id))]
pub async fn list_failures(
    State(state): State<AppState>,
    ctx: AccountContext,
    Query(query): Query<ListFailuresQuery>,
) -> Result<Json<Vec<PaymentFailureResponse>>, AppError> {
    query.validate()?;

    let failures = state
        .orchestrator
        .list_failures(
            Some(ctx.account_id),
            query.status,
            query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
        .await?;

    Ok(Json(failures.into_iter().map(Into::into).collect()))
}
