//! End-to-end tests: router, session manager, NOWPayments and Telegram
//! clients wired together against mock servers.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{mount_telegram, payment_body, telegram_texts, test_config};
use payment_gateway::build_app;
use session_store::{Namespace, PaymentStatus, SessionStore};
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/sessions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_session_lifecycle_e2e() {
    // 1. Setup mock servers
    let provider = MockServer::start().await;
    let telegram = MockServer::start().await;
    let storage = tempfile::tempdir().unwrap();
    mount_telegram(&telegram).await;

    Mock::given(method("GET"))
        .and(path("/estimate"))
        .and(query_param("currency_to", "btc"))
        .and(header("x-api-key", "test-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "currency_from": "usd",
            "amount_from": 299.99,
            "currency_to": "btc",
            "estimated_amount": "0.0045"
        })))
        .mount(&provider)
        .await;

    Mock::given(method("POST"))
        .and(path("/payment"))
        .and(body_partial_json(serde_json::json!({
            "price_currency": "usd",
            "pay_currency": "btc",
            "order_description": "Panel Access",
            "ipn_callback_url": "https://pay.example.com/api/payment-callback"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(payment_body("5077125051", "waiting")))
        .expect(1)
        .mount(&provider)
        .await;

    // Polls: waiting, then confirming, then finished.
    Mock::given(method("GET"))
        .and(path("/payment/5077125051"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payment_body("5077125051", "waiting")))
        .up_to_n_times(1)
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/payment/5077125051"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payment_body("5077125051", "confirming")))
        .up_to_n_times(1)
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/payment/5077125051"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payment_body("5077125051", "finished")))
        .mount(&provider)
        .await;

    // 2. Build the app
    let config = test_config(&provider, &telegram, storage.path());
    let (app, state) = build_app(&config).unwrap();

    // 3. Request a session
    let response = app
        .clone()
        .oneshot(create_request(serde_json::json!({
            "user": "alice",
            "crypto_id": "btc",
            "package_type": "full"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["session"]["paymentId"], "5077125051");
    assert_eq!(json["session"]["amount"], "0.0045");
    assert_eq!(json["session"]["status"], "waiting");
    assert_eq!(json["polling"], true);

    // 4. Wait for the poller to reach a terminal status
    tokio::time::timeout(Duration::from_secs(10), async {
        while !state.manager.active_polls().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("poller did not finish");

    // 5. The session is archived as finished, on disk
    let store = SessionStore::file(storage.path());
    let stored = store.load(&Namespace::for_user(Some("alice"))).await;
    assert_eq!(stored.active_sessions().count(), 0);
    assert_eq!(stored.history.len(), 1);
    assert_eq!(stored.history[0].status, PaymentStatus::Finished);

    // 6. Telegram received created + processing + finished
    let texts = telegram_texts(&telegram).await;
    assert_eq!(texts.len(), 3);
    assert!(texts[0].contains("New Payment Created"));
    assert!(texts[0].contains("<code>alice</code>"));
    assert!(texts[1].contains("PROCESSING"));
    assert!(texts[2].contains("FINISHED"));
}

#[tokio::test]
async fn test_provider_error_surfaces_as_bad_gateway() {
    let provider = MockServer::start().await;
    let telegram = MockServer::start().await;
    let storage = tempfile::tempdir().unwrap();
    mount_telegram(&telegram).await;

    Mock::given(method("POST"))
        .and(path("/payment"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "statusCode": 400,
            "code": "AMOUNT_MINIMAL_ERROR",
            "message": "amountTo is too small"
        })))
        .expect(1)
        .mount(&provider)
        .await;

    let config = test_config(&provider, &telegram, storage.path());
    let (app, state) = build_app(&config).unwrap();

    let response = app
        .oneshot(create_request(serde_json::json!({
            "crypto_id": "usdt",
            "network_id": "trc20",
            "package_type": "single"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_json(response).await;
    assert_eq!(json["code"], "PROVIDER_ERROR");
    assert!(json["error"].as_str().unwrap().contains("amountTo is too small"));

    assert!(state.manager.sessions(&Namespace::guest()).await.is_empty());
    assert!(state.manager.active_polls().await.is_empty());
    assert!(telegram_texts(&telegram).await.is_empty());
}

#[tokio::test]
async fn test_health_reports_provider_status() {
    let provider = MockServer::start().await;
    let telegram = MockServer::start().await;
    let storage = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "OK"})))
        .mount(&provider)
        .await;

    let config = test_config(&provider, &telegram, storage.path());
    let (app, _state) = build_app(&config).unwrap();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["healthy"], true);
    assert_eq!(json["notifications_enabled"], true);
}
