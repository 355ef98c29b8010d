//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::handlers::{self, accounts, credits, internal, retry};
use crate::services::{
    BillingOrchestrator, BillingStore, ClockSource, HttpPaymentProcessor, LogNotifier,
    MemoryStore, Notifier, PaymentProcessor, PgStore, PlanCatalog, RetryPolicy, RetryScheduler,
    RetrySweeper, SystemClock, UnconfiguredProcessor, WebhookNotifier,
};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub orchestrator: Arc<BillingOrchestrator>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    sweeper: Option<RetrySweeper>,
}

impl Application {
    /// Build the application from configuration: PostgreSQL when
    /// `DATABASE_URL` is set, otherwise an in-memory store.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let store: Arc<dyn BillingStore> = match &config.database {
            Some(database) => {
                let store = PgStore::connect(
                    &database.url,
                    database.max_connections,
                    database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    AppError::from(e)
                })?;

                store.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run database migrations");
                    AppError::from(e)
                })?;

                Arc::new(store)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let processor: Arc<dyn PaymentProcessor> = match &config.processor.url {
            Some(url) => {
                tracing::info!(processor_url = %url, "HTTP payment processor initialized");
                Arc::new(HttpPaymentProcessor::new(url.clone(), config.processor.timeout))
            }
            None => {
                tracing::warn!("PAYMENT_PROCESSOR_URL not set, retries will fail until configured");
                Arc::new(UnconfiguredProcessor)
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
            Some(url) => {
                tracing::info!(webhook_url = %url, "Webhook notifier initialized");
                Arc::new(WebhookNotifier::new(url.clone()))
            }
            None => {
                tracing::info!("Notification webhook disabled, logging billing events");
                Arc::new(LogNotifier)
            }
        };

        Self::build_with(config, store, processor, notifier, Arc::new(SystemClock)).await
    }

    /// Build the application around explicit collaborators.
    pub async fn build_with(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self, AppError> {
        let catalog = Arc::new(
            PlanCatalog::standard().with_default_grace_days(config.retry.default_grace_period_days),
        );

        let base_interval = chrono::Duration::from_std(config.retry.base_interval)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid retry interval: {}", e)))?;
        let scheduler = RetryScheduler::new(RetryPolicy {
            max_retries: config.retry.max_retries,
            base_interval,
        });

        let orchestrator = Arc::new(
            BillingOrchestrator::new(store, catalog, scheduler, processor, notifier, clock)
                .with_sweep_batch(config.sweep.batch_size),
        );

        let sweeper = if config.sweep.enabled {
            Some(RetrySweeper::new(orchestrator.clone(), config.sweep.interval))
        } else {
            tracing::info!("Retry sweep disabled on this instance");
            None
        };

        let addr = config.common.bind_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(http_port = port, "Billing resilience service bound");

        Ok(Self {
            port,
            listener,
            state: AppState {
                config,
                orchestrator,
            },
            sweeper,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn orchestrator(&self) -> Arc<BillingOrchestrator> {
        self.state.orchestrator.clone()
    }

    /// Run the application until stopped. The sweeper stops with it.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let _sweeper_guard = self.sweeper.map(|sweeper| {
            let guard = sweeper.shutdown_token().drop_guard();
            sweeper.spawn();
            guard
        });

        let router = build_router(self.state);

        tracing::info!(
            service = "billing-resilience",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/plans", get(accounts::list_plans))
        .route(
            "/accounts",
            post(accounts::register_account).get(accounts::get_account),
        )
        .route("/accounts/plan", put(accounts::change_plan))
        .route("/billing/retry-status", get(retry::retry_status))
        .route("/billing/manual-retry", post(retry::manual_retry))
        .route("/billing/failures", get(retry::list_failures))
        .route("/credits/usage", get(credits::usage))
        .route("/credits/use", post(credits::use_credits))
        .route("/credits/check", get(credits::check_credits));

    let internal = Router::new()
        .route("/payment-failures", post(internal::record_failure))
        .route("/payment-failures/:id", get(internal::get_failure))
        .route("/payment-failures/:id/resolve", post(internal::resolve_failure))
        .route("/sweep", post(internal::run_sweep));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api/v1", api)
        .nest("/internal/v1", internal)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    account_id = tracing::field::Empty,
                )
            },
        ))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
