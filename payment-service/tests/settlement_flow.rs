mod common;

use common::{test_config, TestApp};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;

const SETTLEMENT_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn payment_settles_within_the_sla() {
    let app = TestApp::spawn().await;

    let created: Value = app
        .create_payment(&json!({
            "amount": 100.0,
            "currency": "USD",
            "reference": "flow-1"
        }))
        .await
        .json()
        .await
        .expect("Body was not JSON");

    let settled = app
        .wait_for_settlement(created["id"].as_str().unwrap(), SETTLEMENT_DEADLINE)
        .await;

    assert_eq!(settled["status"], "SUCCESS");
}

#[tokio::test]
async fn declined_payment_fails_with_a_reason() {
    let mut config = test_config();
    config.settlement.simulated_decline_over = Some(Decimal::from(500));
    let app = TestApp::spawn_with(config).await;

    let created: Value = app
        .create_payment(&json!({
            "amount": 750.0,
            "currency": "USD",
            "reference": "flow-2"
        }))
        .await
        .json()
        .await
        .expect("Body was not JSON");

    let settled = app
        .wait_for_settlement(created["id"].as_str().unwrap(), SETTLEMENT_DEADLINE)
        .await;

    assert_eq!(settled["status"], "FAILED");
    assert_eq!(settled["failure_reason"], "DECLINED");
}

#[tokio::test]
async fn terminal_status_is_stable_across_reads() {
    let app = TestApp::spawn().await;

    let created: Value = app
        .create_payment(&json!({
            "amount": 10.0,
            "currency": "ETB",
            "reference": "flow-3"
        }))
        .await
        .json()
        .await
        .expect("Body was not JSON");
    let id = created["id"].as_str().unwrap().to_string();

    let settled = app.wait_for_settlement(&id, SETTLEMENT_DEADLINE).await;
    let terminal_status = settled["status"].clone();

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let body: Value = app
            .get_payment(&id)
            .await
            .json()
            .await
            .expect("Body was not JSON");
        assert_eq!(body["status"], terminal_status);
    }
}

#[tokio::test]
async fn replayed_create_does_not_resettle() {
    let app = TestApp::spawn().await;
    let body = json!({
        "amount": 25.0,
        "currency": "USD",
        "reference": "flow-4"
    });

    let created: Value = app
        .create_payment(&body)
        .await
        .json()
        .await
        .expect("Body was not JSON");
    let id = created["id"].as_str().unwrap().to_string();

    let settled = app.wait_for_settlement(&id, SETTLEMENT_DEADLINE).await;
    assert_eq!(settled["status"], "SUCCESS");

    // The replay answers with the already-settled snapshot and enqueues
    // nothing new.
    let replay = app.create_payment(&body).await;
    assert_eq!(replay.status().as_u16(), 200);
    let replay: Value = replay.json().await.expect("Body was not JSON");
    assert_eq!(replay["id"].as_str().unwrap(), id);
    assert_eq!(replay["status"], "SUCCESS");

    let after: Value = app
        .get_payment(&id)
        .await
        .json()
        .await
        .expect("Body was not JSON");
    assert_eq!(after["status"], "SUCCESS");
}

#[tokio::test]
async fn settlement_latency_does_not_block_creation() {
    let mut config = test_config();
    config.settlement.simulated_latency = Some(Duration::from_millis(500));
    let app = TestApp::spawn_with(config).await;

    let started = std::time::Instant::now();
    let response = app
        .create_payment(&json!({
            "amount": 15.0,
            "currency": "USD",
            "reference": "flow-5"
        }))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(response.status().as_u16(), 201);
    // Intake answers without waiting on the settlement round-trip.
    assert!(elapsed < Duration::from_millis(400), "create took {:?}", elapsed);

    let body: Value = response.json().await.expect("Body was not JSON");
    let settled = app
        .wait_for_settlement(body["id"].as_str().unwrap(), SETTLEMENT_DEADLINE)
        .await;
    assert_eq!(settled["status"], "SUCCESS");
}
