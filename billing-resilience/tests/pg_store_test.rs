//! PostgreSQL store checks. Run with `TEST_DATABASE_URL` pointing at a
//! scratch database; skipped otherwise.

use billing_resilience::models::{
    Account, CreditBalance, ListFailuresFilter, PaymentFailureStatus, PlanId,
};
use billing_resilience::services::{BillingStore, PgStore, RetryScheduler};
use billing_resilience::BillingError;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

struct TestDb {
    store: PgStore,
    base_url: String,
    schema_name: String,
}

impl TestDb {
    async fn create() -> Option<Self> {
        let base_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let schema_name = format!(
            "test_billing_resilience_{}_{}",
            std::process::id(),
            SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst)
        );

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");
        pool.close().await;

        let separator = if base_url.contains('?') { "&" } else { "?" };
        let url = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );
        let store = PgStore::connect(&url, 5, 1)
            .await
            .expect("Failed to connect store");
        store.run_migrations().await.expect("Failed to migrate");

        Some(Self {
            store,
            base_url,
            schema_name,
        })
    }

    async fn cleanup(self) {
        self.store.pool().close().await;
        if let Ok(pool) = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
        {
            let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema_name))
                .execute(&pool)
                .await;
            pool.close().await;
        }
    }
}

#[tokio::test]
async fn one_active_failure_per_account_and_version_checks() {
    let Some(db) = TestDb::create().await else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let store = &db.store;
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    let account = Account::new(Uuid::new_v4(), PlanId::Starter, now);

    assert!(store.insert_account(&account).await.unwrap());
    assert!(!store.insert_account(&account).await.unwrap());

    let scheduler = RetryScheduler::default();
    let open = |at| {
        scheduler.open(
            account.account_id,
            PlanId::Starter,
            Decimal::new(999, 2),
            Some("card_declined".to_string()),
            Duration::days(7),
            at,
        )
    };

    let mut first = open(now);
    store.insert_failure(&first).await.unwrap();
    let err = store.insert_failure(&open(now)).await.unwrap_err();
    assert!(matches!(
        err,
        BillingError::FailureAlreadyOpen { failure_id, .. } if failure_id == first.failure_id
    ));

    let due = store
        .list_due_failures(now + Duration::hours(1), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert!(store.list_due_failures(now, 10).await.unwrap().is_empty());

    scheduler.begin_attempt(&mut first, now).unwrap();
    first.version = 1;
    assert!(store.update_failure(&first, 0).await.unwrap());
    assert!(!store.update_failure(&first, 0).await.unwrap());

    scheduler.record_success(&mut first, now).unwrap();
    first.version = 2;
    assert!(store.update_failure(&first, 1).await.unwrap());

    let stored = store.get_failure(first.failure_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentFailureStatus::Succeeded);
    assert_eq!(stored.amount, Decimal::new(999, 2));

    let second = open(now + Duration::days(30));
    store.insert_failure(&second).await.unwrap();
    let listed = store
        .list_failures(&ListFailuresFilter {
            account_id: Some(account.account_id),
            status: None,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(
        listed.iter().map(|f| f.failure_id).collect::<Vec<_>>(),
        vec![second.failure_id, first.failure_id]
    );

    db.cleanup().await;
}

#[tokio::test]
async fn balance_insert_then_compare_and_swap() {
    let Some(db) = TestDb::create().await else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let store = &db.store;
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    let account = Account::new(Uuid::new_v4(), PlanId::Free, now);
    store.insert_account(&account).await.unwrap();

    let mut balance = CreditBalance::new(
        account.account_id,
        now,
        now + Duration::days(31),
        now,
    );
    assert!(store.save_balance(&balance, None).await.unwrap());
    assert!(!store.save_balance(&balance, None).await.unwrap());

    balance.sms_used = 4;
    balance.version = 1;
    assert!(store.save_balance(&balance, Some(0)).await.unwrap());
    assert!(!store.save_balance(&balance, Some(0)).await.unwrap());

    let stored = store.get_balance(account.account_id).await.unwrap().unwrap();
    assert_eq!(stored.sms_used, 4);
    assert_eq!(stored.version, 1);

    let moved = store
        .update_account_plan(account.account_id, PlanId::Starter, now + Duration::days(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.plan_assigned_at, now + Duration::days(2));

    db.cleanup().await;
}
