use crate::dtos::{AccountResponse, ChangePlanRequest, PlansResponse, RegisterAccountRequest};
use crate::handlers::optional_body;
use crate::middleware::AccountContext;
use crate::models::PlanId;
use crate::startup::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use service_core::error::AppError;

pub async fn list_plans(State(state): State<AppState>) -> Json<PlansResponse> {
    Json(PlansResponse {
        plans: state.orchestrator.plans(),
    })
}

/// Register the caller's account. Returns 201 on creation and 200 with the
/// existing account when it is already registered.
#[tracing::instrument(skip(state, request), fields(account_id = %ctx.account_id))]
pub async fn register_account(
    State(state): State<AppState>,
    ctx: AccountContext,
    request: Result<Json<RegisterAccountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    let plan = optional_body(request)?.plan.unwrap_or(PlanId::Free);

    let (account, created) = state
        .orchestrator
        .register_account(ctx.account_id, plan)
        .await?;

    let status = if created {
        tracing::info!(plan = %account.plan, "Account registered");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(account.into())))
}

pub async fn get_account(
    State(state): State<AppState>,
    ctx: AccountContext,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state.orchestrator.get_account(ctx.account_id).await?;
    Ok(Json(account.into()))
}

#[tracing::instrument(skip(state, request), fields(account_id = %ctx.account_id))]
pub async fn change_plan(
    State(state): State<AppState>,
    ctx: AccountContext,
    Json(request): Json<ChangePlanRequest>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state
        .orchestrator
        .change_plan(ctx.account_id, request.plan)
        .await?;
    Ok(Json(account.into()))
}
