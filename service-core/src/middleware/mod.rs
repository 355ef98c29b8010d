pub mod metrics;
pub mod tracing;

pub use metrics::metrics_middleware;
pub use tracing::request_id_middleware;
