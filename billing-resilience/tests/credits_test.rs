mod common;

use chrono::{DateTime, Duration, Months, Utc};
use common::{t0, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

async fn usage(app: &TestApp, account_id: Uuid) -> Value {
    let response = app.get_as(account_id, "/api/v1/credits/usage").await;
    assert_eq!(response.status().as_u16(), 200);
    response.json().await.unwrap()
}

async fn use_credits(app: &TestApp, account_id: Uuid, kind: &str, count: i64) -> reqwest::Response {
    app.post_as(
        account_id,
        "/api/v1/credits/use",
        &json!({ "type": kind, "count": count }),
    )
    .await
}

#[tokio::test]
async fn usage_reports_plan_limits() {
    let app = TestApp::spawn().await;
    let account_id = app.register("starter").await;

    let body = usage(&app, account_id).await;

    assert_eq!(body["plan"], "starter");
    assert_eq!(body["email"]["used"], 0);
    assert_eq!(body["email"]["limit"], 500);
    assert_eq!(body["email"]["remaining"], 500);
    assert_eq!(body["email"]["unlimited"], false);
    assert_eq!(body["sms"]["limit"], 100);
    assert_eq!(body["invoice"]["limit"], 100);
    assert_eq!(body["days_until_reset"], 31);

    let cycle_start: DateTime<Utc> = serde_json::from_value(body["cycle_start"].clone()).unwrap();
    let reset_date: DateTime<Utc> = serde_json::from_value(body["reset_date"].clone()).unwrap();
    assert_eq!(cycle_start, t0());
    assert_eq!(reset_date, t0() + Months::new(1));
}

#[tokio::test]
async fn unlimited_invoices_on_professional() {
    let app = TestApp::spawn().await;
    let account_id = app.register("professional").await;

    let response = use_credits(&app, account_id, "invoice", 5000).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["invoice"]["used"], 5000);
    assert_eq!(body["invoice"]["unlimited"], true);
    assert!(body["invoice"]["limit"].is_null());
    assert!(body["invoice"]["remaining"].is_null());
}

#[tokio::test]
async fn consuming_credits_updates_usage() {
    let app = TestApp::spawn().await;
    let account_id = app.register("starter").await;

    let response = use_credits(&app, account_id, "email", 10).await;

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["email"]["used"], 10);
    assert_eq!(body["email"]["remaining"], 490);
    assert_eq!(body["sms"]["used"], 0);
}

#[tokio::test]
async fn over_limit_request_is_refused_without_consuming() {
    let app = TestApp::spawn().await;
    let account_id = app.register("free").await;
    assert_eq!(use_credits(&app, account_id, "sms", 8).await.status().as_u16(), 200);

    let response = use_credits(&app, account_id, "sms", 3).await;

    assert_eq!(response.status().as_u16(), 402);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("available 2"));
    assert_eq!(usage(&app, account_id).await["sms"]["used"], 8);

    assert_eq!(use_credits(&app, account_id, "sms", 2).await.status().as_u16(), 200);
    assert_eq!(usage(&app, account_id).await["sms"]["remaining"], 0);
}

#[tokio::test]
async fn invalid_count_is_rejected() {
    let app = TestApp::spawn().await;
    let account_id = app.register("starter").await;

    let response = use_credits(&app, account_id, "email", 0).await;
    assert_eq!(response.status().as_u16(), 422);

    let response = app
        .post_as(
            account_id,
            "/api/v1/credits/use",
            &json!({ "type": "fax", "count": 1 }),
        )
        .await;
    assert!(response.status().is_client_error());
    assert_eq!(usage(&app, account_id).await["email"]["used"], 0);
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let app = TestApp::spawn().await;

    let response = app.get_as(Uuid::new_v4(), "/api/v1/credits/usage").await;
    assert_eq!(response.status().as_u16(), 404);

    let response = use_credits(&app, Uuid::new_v4(), "email", 1).await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn check_does_not_consume() {
    let app = TestApp::spawn().await;
    let account_id = app.register("free").await;

    let response = app
        .get_as(account_id, "/api/v1/credits/check?type=sms&count=10")
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["available"], true);

    let response = app
        .get_as(account_id, "/api/v1/credits/check?type=sms&count=11")
        .await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["available"], false);

    assert_eq!(usage(&app, account_id).await["sms"]["used"], 0);
}

#[tokio::test]
async fn concurrent_requests_never_exceed_limit() {
    let app = TestApp::spawn().await;
    let account_id = app.register("starter").await;
    assert_eq!(use_credits(&app, account_id, "sms", 99).await.status().as_u16(), 200);

    let (first, second) = tokio::join!(
        use_credits(&app, account_id, "sms", 1),
        use_credits(&app, account_id, "sms", 1),
    );

    let mut statuses = vec![first.status().as_u16(), second.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 402]);
    assert_eq!(usage(&app, account_id).await["sms"]["used"], 100);
}

#[tokio::test]
async fn many_concurrent_requests_stop_at_limit() {
    let app = TestApp::spawn().await;
    let account_id = app.register("free").await;

    let requests = (0..20).map(|_| use_credits(&app, account_id, "invoice", 1));
    let responses = futures::future::join_all(requests).await;

    let granted = responses
        .iter()
        .filter(|r| r.status().as_u16() == 200)
        .count();
    assert_eq!(granted, 5);
    assert_eq!(usage(&app, account_id).await["invoice"]["used"], 5);
}

#[tokio::test]
async fn usage_resets_at_cycle_boundary() {
    let app = TestApp::spawn().await;
    let account_id = app.register("starter").await;
    assert_eq!(use_credits(&app, account_id, "email", 50).await.status().as_u16(), 200);

    app.advance_to(t0() + Months::new(1) - Duration::minutes(1));
    assert_eq!(usage(&app, account_id).await["email"]["used"], 50);

    app.advance_to(t0() + Months::new(1) + Duration::hours(1));
    let body = usage(&app, account_id).await;
    assert_eq!(body["email"]["used"], 0);
    let cycle_start: DateTime<Utc> = serde_json::from_value(body["cycle_start"].clone()).unwrap();
    assert_eq!(cycle_start, t0() + Months::new(1));

    assert_eq!(use_credits(&app, account_id, "email", 500).await.status().as_u16(), 200);
}

#[tokio::test]
async fn plan_change_keeps_usage_and_applies_new_limits() {
    let app = TestApp::spawn().await;
    let account_id = app.register("starter").await;
    assert_eq!(use_credits(&app, account_id, "email", 60).await.status().as_u16(), 200);

    let response = app
        .client
        .put(app.url("/api/v1/accounts/plan"))
        .header(common::ACCOUNT_HEADER, account_id.to_string())
        .json(&json!({ "plan": "free" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body = usage(&app, account_id).await;
    assert_eq!(body["plan"], "free");
    assert_eq!(body["email"]["used"], 60);
    assert_eq!(body["email"]["limit"], 50);
    assert_eq!(body["email"]["remaining"], 0);
    assert_eq!(use_credits(&app, account_id, "email", 1).await.status().as_u16(), 402);
}

#[tokio::test]
async fn plans_are_listed() {
    let app = TestApp::spawn().await;

    let response = app.client.get(app.url("/api/v1/plans")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();

    let plans: Vec<&str> = body["plans"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["plan"].as_str())
        .collect();
    assert_eq!(plans, vec!["free", "starter", "professional", "business"]);
}

#[tokio::test]
async fn registering_twice_returns_existing_account() {
    let app = TestApp::spawn().await;
    let account_id = app.register("starter").await;

    let response = app
        .post_as(account_id, "/api/v1/accounts", &json!({ "plan": "business" }))
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["plan"], "starter");
}

#[tokio::test]
async fn registering_with_unknown_plan_is_rejected() {
    let app = TestApp::spawn().await;
    let account_id = Uuid::new_v4();

    let response = app
        .post_as(account_id, "/api/v1/accounts", &json!({ "plan": "platinum" }))
        .await;

    assert_eq!(response.status().as_u16(), 400);
    let response = app.get_as(account_id, "/api/v1/accounts").await;
    assert_eq!(response.status().as_u16(), 404);
}
