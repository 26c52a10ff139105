mod common;

use common::TestApp;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn create_payment_returns_201_with_pending_status() {
    let app = TestApp::spawn().await;

    let response = app
        .create_payment(&json!({
            "amount": 100.0,
            "currency": "USD",
            "reference": "order-1001"
        }))
        .await;

    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.expect("Body was not JSON");
    assert!(body["id"].is_string());
    assert_eq!(body["status"], "PENDING");
}

#[tokio::test]
async fn get_returns_the_created_payment_snapshot() {
    let app = TestApp::spawn().await;

    let created: Value = app
        .create_payment(&json!({
            "amount": 42.75,
            "currency": "ETB",
            "reference": "order-1002"
        }))
        .await
        .json()
        .await
        .expect("Body was not JSON");

    let response = app.get_payment(created["id"].as_str().unwrap()).await;
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.expect("Body was not JSON");
    assert_eq!(body["reference"], "order-1002");
    assert_eq!(body["currency"], "ETB");
    assert!(body["status"].is_string());
    assert!(body["created_at"].is_string());
}

#[tokio::test]
async fn duplicate_reference_replays_the_original_payment() {
    let app = TestApp::spawn().await;
    let body = json!({
        "amount": 50.0,
        "currency": "USD",
        "reference": "order-2002"
    });

    let first = app.create_payment(&body).await;
    assert_eq!(first.status().as_u16(), 201);
    let first: Value = first.json().await.expect("Body was not JSON");

    let second = app.create_payment(&body).await;
    assert_eq!(second.status().as_u16(), 200);
    let second: Value = second.json().await.expect("Body was not JSON");

    assert_eq!(first["id"], second["id"]);
}

#[tokio::test]
async fn concurrent_duplicate_creates_persist_one_payment() {
    let app = TestApp::spawn().await;
    let body = json!({
        "amount": 75.25,
        "currency": "ETB",
        "reference": "order-3003"
    });

    let (a, b) = tokio::join!(app.create_payment(&body), app.create_payment(&body));

    let status_a = a.status().as_u16();
    let status_b = b.status().as_u16();
    let a: Value = a.json().await.expect("Body was not JSON");
    let b: Value = b.json().await.expect("Body was not JSON");

    assert_eq!(a["id"], b["id"]);
    // Exactly one of the two requests created the record.
    let fresh = [status_a, status_b]
        .iter()
        .filter(|status| **status == 201)
        .count();
    assert_eq!(fresh, 1);
}

#[tokio::test]
async fn non_positive_amounts_are_rejected_without_persisting() {
    let app = TestApp::spawn().await;

    for amount in [-5.0, 0.0] {
        let response = app
            .create_payment(&json!({
                "amount": amount,
                "currency": "USD",
                "reference": "order-4004"
            }))
            .await;
        assert!(response.status().is_client_error());
        let body: Value = response.json().await.expect("Body was not JSON");
        assert!(body.get("id").is_none());
    }

    // The rejected creates left no record behind: the reference is still
    // free for a valid payment.
    let response = app
        .create_payment(&json!({
            "amount": 5.0,
            "currency": "USD",
            "reference": "order-4004"
        }))
        .await;
    assert_eq!(response.status().as_u16(), 201);
}

#[tokio::test]
async fn over_precise_amounts_are_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .create_payment(&json!({
            "amount": 10.123,
            "currency": "USD",
            "reference": "order-5005"
        }))
        .await;

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn unsupported_currencies_are_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .create_payment(&json!({
            "amount": 10.0,
            "currency": "EUR",
            "reference": "order-6006"
        }))
        .await;

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn empty_references_are_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .create_payment(&json!({
            "amount": 10.0,
            "currency": "USD",
            "reference": ""
        }))
        .await;

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn unknown_payment_ids_return_404() {
    let app = TestApp::spawn().await;

    let response = app.get_payment(&Uuid::new_v4().to_string()).await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn malformed_payment_ids_are_a_client_error() {
    let app = TestApp::spawn().await;

    let response = app.get_payment("not-a-uuid").await;
    assert!(response.status().is_client_error());
}
