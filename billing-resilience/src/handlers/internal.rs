//! Service-to-service endpoints: failure intake from the charge pipeline,
//! operator resolution, and on-demand sweeps. Not routed through the gateway.

use crate::dtos::{PaymentFailureResponse, RecordFailureRequest, ResolveFailureRequest};
use crate::services::SweepReport;
use crate::startup::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[tracing::instrument(skip(state, request))]
pub async fn record_failure(
    State(state): State<AppState>,
    Json(request): Json<RecordFailureRequest>,
) -> Result<(StatusCode, Json<PaymentFailureResponse>), AppError> {
    request.validate()?;

    let failure = state
        .orchestrator
        .record_failure(
            request.account_id,
            request.plan,
            request.amount,
            request.failure_reason,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(failure.into())))
}

pub async fn get_failure(
    State(state): State<AppState>,
    Path(failure_id): Path<Uuid>,
) -> Result<Json<PaymentFailureResponse>, AppError> {
    let failure = state.orchestrator.get_failure(failure_id).await?;
    Ok(Json(failure.into()))
}

#[tracing::instrument(skip(state, request))]
pub async fn resolve_failure(
    State(state): State<AppState>,
    Path(failure_id): Path<Uuid>,
    request: Option<Json<ResolveFailureRequest>>,
) -> Result<Json<PaymentFailureResponse>, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let failure = state
        .orchestrator
        .resolve_failure(failure_id, request.note)
        .await?;

    Ok(Json(failure.into()))
}

pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let report = state.orchestrator.sweep().await?;
    Ok(Json(report))
}
