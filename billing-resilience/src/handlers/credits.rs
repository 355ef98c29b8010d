//! Usage credit endpoints.

use crate::dtos::{CheckCreditsQuery, CheckCreditsResponse, CreditUsageResponse, UseCreditsRequest};
use crate::middleware::AccountContext;
use crate::startup::AppState;
use axum::extract::{Query, State};
use axum::Json;
use service_core::error::AppError;
use validator::Validate;

#[tracing::instrument(skip(state), fields(account_id = %ctx.account_id))]
pub async fn usage(
    State(state): State<AppState>,
    ctx: AccountContext,
) -> Result<Json<CreditUsageResponse>, AppError> {
    let usage = state.orchestrator.credit_usage(ctx.account_id).await?;
    Ok(Json(usage.into()))
}

/// Consume credits. Rejected with 402 when the remaining allowance is short;
/// nothing is consumed in that case.
#[tracing::instrument(skip(state, request), fields(account_id = %ctx.account_id))]
pub async fn use_credits(
    State(state): State<AppState>,
    ctx: AccountContext,
    Json(request): Json<UseCreditsRequest>,
) -> Result<Json<CreditUsageResponse>, AppError> {
    request.validate()?;

    state
        .orchestrator
        .request_credit(ctx.account_id, request.kind, request.count)
        .await?;

    let usage = state.orchestrator.credit_usage(ctx.account_id).await?;
    Ok(Json(usage.into()))
}

#[tracing::instrument(skip(state, query), fields(account_id = %ctx.account_id))]
pub async fn check_credits(
    State(state): State<AppState>,
    ctx: AccountContext,
    Query(query): Query<CheckCreditsQuery>,
) -> Result<Json<CheckCreditsResponse>, AppError> {
    query.validate()?;
    let count = query.count.unwrap_or(1);

    let available = state
        .orchestrator
        .check_credit(ctx.account_id, query.kind, count)
        .await?;

    Ok(Json(CheckCreditsResponse {
        kind: query.kind,
        count,
        available,
    }))
}
