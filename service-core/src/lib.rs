//! service-core: HTTP plumbing shared by the billing services: config loading,
//! error rendering, request middleware, tracing setup.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use axum;
pub use serde;
pub use serde_json;
pub use tracing;
pub use validator;
