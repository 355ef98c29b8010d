//! In-process collaborators for tests and local runs: a payment processor
//! that replays scripted outcomes and a notifier that records events.

use crate::error::BillingError;
use crate::services::{BillingEvent, ChargeOutcome, Notifier, PaymentProcessor};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One charge made against a [`ScriptedProcessor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeCall {
    pub account_id: Uuid,
    pub amount: Decimal,
}

/// Replays queued outcomes in order, then falls back to a default.
#[derive(Clone)]
pub struct ScriptedProcessor {
    script: Arc<Mutex<VecDeque<Result<ChargeOutcome, String>>>>,
    fallback: Arc<Mutex<Result<ChargeOutcome, String>>>,
    calls: Arc<Mutex<Vec<ChargeCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl ScriptedProcessor {
    /// Declines every charge with a retryable reason until scripted otherwise.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(Ok(ChargeOutcome::Declined {
                reason: "card_declined".to_string(),
                retryable: true,
            }))),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Hold each charge open for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_success(&self) {
        locked(&self.script).push_back(Ok(ChargeOutcome::Succeeded { reference: None }));
    }

    pub fn push_decline(&self, reason: &str, retryable: bool) {
        locked(&self.script).push_back(Ok(ChargeOutcome::Declined {
            reason: reason.to_string(),
            retryable,
        }));
    }

    pub fn push_unavailable(&self) {
        locked(&self.script).push_back(Err("processor timeout".to_string()));
    }

    /// Outcome once the script runs dry.
    pub fn always_succeed(&self) {
        *locked(&self.fallback) = Ok(ChargeOutcome::Succeeded { reference: None });
    }

    pub fn calls(&self) -> Vec<ChargeCall> {
        locked(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        locked(&self.calls).len()
    }

    /// Highest number of charges that were in progress at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn charge(&self, account_id: Uuid, amount: Decimal) -> Result<ChargeOutcome, BillingError> {
        locked(&self.calls).push(ChargeCall { account_id, amount });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = locked(&self.script).pop_front();
        let outcome = next.unwrap_or_else(|| locked(&self.fallback).clone());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome.map_err(BillingError::ProcessorUnavailable)
    }
}

/// Keeps every event it is handed.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<BillingEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BillingEvent> {
        locked(&self.events).clone()
    }

    /// Poll until `count` events named `name` were delivered or `timeout` passes.
    pub async fn wait_for(&self, name: &str, count: usize, timeout: Duration) -> Vec<BillingEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let matching: Vec<BillingEvent> = self
                .events()
                .into_iter()
                .filter(|e| e.name() == name)
                .collect();
            if matching.len() >= count || tokio::time::Instant::now() >= deadline {
                return matching;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &BillingEvent) -> anyhow::Result<()> {
        locked(&self.events).push(event.clone());
        Ok(())
    }
}
