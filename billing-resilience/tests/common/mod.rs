//! Test helper module for billing-resilience integration tests.
//!
//! Spawns the HTTP service over the in-memory store with a manual clock, a
//! scripted payment processor and a recording notifier. The background sweep
//! is off; tests drive sweeps through the orchestrator or the internal route.

#![allow(dead_code)]

use billing_resilience::config::BillingConfig;
use billing_resilience::services::{init_metrics, BillingOrchestrator, ManualClock, MemoryStore};
use billing_resilience::startup::Application;
use billing_resilience::testing::{RecordingNotifier, ScriptedProcessor};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use uuid::Uuid;

pub const ACCOUNT_HEADER: &str = "X-Account-ID";

/// Fixed start of every test timeline.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub http_address: String,
    pub port: u16,
    pub client: reqwest::Client,
    pub orchestrator: Arc<BillingOrchestrator>,
    pub clock: Arc<ManualClock>,
    pub processor: ScriptedProcessor,
    pub notifier: RecordingNotifier,
}

impl TestApp {
    /// Spawn a new test application on a random port.
    pub async fn spawn() -> Self {
        Self::spawn_with(ScriptedProcessor::new()).await
    }

    pub async fn spawn_with(processor: ScriptedProcessor) -> Self {
        // Initialize metrics (required for metrics endpoint test)
        init_metrics();

        let mut config = BillingConfig::from_lookup(CoreConfig::ephemeral(), |_| None);
        config.service_name = "billing-resilience-test".to_string();
        config.log_level = "warn".to_string();
        config.sweep.enabled = false;

        let clock = Arc::new(ManualClock::new(t0()));
        let notifier = RecordingNotifier::new();

        let app = Application::build_with(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(processor.clone()),
            Arc::new(notifier.clone()),
            clock.clone(),
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let orchestrator = app.orchestrator();
        let http_address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            port,
            client,
            orchestrator,
            clock,
            processor,
            notifier,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    pub async fn get_as(&self, account_id: Uuid, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header(ACCOUNT_HEADER, account_id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_as(&self, account_id: Uuid, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header(ACCOUNT_HEADER, account_id.to_string())
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_internal(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Register a new account on `plan` and return its id.
    pub async fn register(&self, plan: &str) -> Uuid {
        let account_id = Uuid::new_v4();
        let response = self
            .post_as(account_id, "/api/v1/accounts", &serde_json::json!({ "plan": plan }))
            .await;
        assert_eq!(response.status().as_u16(), 201);
        account_id
    }

    /// Report a failed charge through the intake route; returns the failure id.
    pub async fn record_failure(&self, account_id: Uuid, plan: &str, amount: &str) -> Uuid {
        let response = self
            .post_internal(
                "/internal/v1/payment-failures",
                &serde_json::json!({
                    "account_id": account_id,
                    "plan": plan,
                    "amount": amount,
                    "failure_reason": "card_declined",
                }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.expect("Failed to parse failure");
        body["id"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .expect("failure id missing")
    }

    pub async fn retry_status(&self, account_id: Uuid) -> Value {
        let response = self.get_as(account_id, "/api/v1/billing/retry-status").await;
        assert_eq!(response.status().as_u16(), 200);
        response.json().await.expect("Failed to parse retry status")
    }

    pub async fn plan_of(&self, account_id: Uuid) -> String {
        let response = self.get_as(account_id, "/api/v1/accounts").await;
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.expect("Failed to parse account");
        body["plan"].as_str().unwrap_or_default().to_string()
    }

    pub fn advance_to(&self, at: DateTime<Utc>) {
        self.clock.set(at);
    }
}
