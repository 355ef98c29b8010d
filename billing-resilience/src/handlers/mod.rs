//! HTTP handlers for billing-resilience.

pub mod accounts;
pub mod credits;
pub mod health;
pub mod internal;
pub mod retry;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use service_core::error::AppError;

pub use health::{health_check, metrics_handler, readiness_check};

/// A JSON body that may be left out entirely. A body that is sent but does
/// not parse is still a 400.
pub(crate) fn optional_body<T: Default>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(AppError::BadRequest(anyhow::anyhow!(rejection.body_text()))),
    }
}
