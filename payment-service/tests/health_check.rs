mod common;

use common::TestApp;

#[tokio::test]
async fn health_check_reports_ok() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Body was not JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "payment-service");
}

#[tokio::test]
async fn readiness_check_reports_ok() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/ready", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let app = TestApp::spawn().await;

    // Counters only materialize once a label combination is observed.
    let response = app
        .create_payment(&serde_json::json!({
            "amount": 12.50,
            "currency": "USD",
            "reference": "metrics-order-1"
        }))
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let response = app
        .client
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body = response.text().await.expect("Failed to read metrics body");
    assert!(body.contains("payment_created_total"));
}
