use reqwest::StatusCode;
use serde_json::Value;
use wiremock::MockServer;

use super::gateway_harness::{GatewayTestServer, base_config, mount_completion_reply};

#[tokio::test]
async fn webhook_round_trips_a_reply() {
    let llm = MockServer::start().await;
    mount_completion_reply(&llm, "Airflow orchestrates data pipelines.").await;

    let server = GatewayTestServer::start(base_config(&llm)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/webhook"))
        .json(&serde_json::json!({
            "from": "best-friend",
            "message": "What is Apache Airflow?"
        }))
        .send()
        .await
        .expect("webhook request should complete");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("reply should be json");
    assert_eq!(body["reply"], "Airflow orchestrates data pipelines.");
}

#[tokio::test]
async fn webhook_history_accumulates_per_identity() {
    let llm = MockServer::start().await;
    mount_completion_reply(&llm, "ok").await;

    let server = GatewayTestServer::start(base_config(&llm)).await;
    let client = reqwest::Client::new();

    for text in ["first question", "second question"] {
        let response = client
            .post(server.url("/webhook"))
            .json(&serde_json::json!({"from": "curious-user", "message": text}))
            .send()
            .await
            .expect("webhook request should complete");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let inbound = llm
        .received_requests()
        .await
        .expect("mock server should record received requests");
    assert_eq!(inbound.len(), 2);
    let second: Value =
        serde_json::from_slice(&inbound[1].body).expect("completion request should be json");
    let messages = second["messages"]
        .as_array()
        .expect("completion request should carry messages");
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1]["content"], "first question");
    assert_eq!(messages[2]["content"], "ok");
    assert_eq!(messages[3]["content"], "second question");
}

#[tokio::test]
async fn webhook_identities_do_not_share_history() {
    let llm = MockServer::start().await;
    mount_completion_reply(&llm, "ok").await;

    let server = GatewayTestServer::start(base_config(&llm)).await;
    let client = reqwest::Client::new();

    for from in ["user-a", "user-b"] {
        client
            .post(server.url("/webhook"))
            .json(&serde_json::json!({"from": from, "message": "hello"}))
            .send()
            .await
            .expect("webhook request should complete");
    }

    let inbound = llm
        .received_requests()
        .await
        .expect("mock server should record received requests");
    let second: Value =
        serde_json::from_slice(&inbound[1].body).expect("completion request should be json");
    let messages = second["messages"]
        .as_array()
        .expect("completion request should carry messages");
    // user-b's first exchange: system prompt plus their own message only.
    assert_eq!(messages.len(), 2);

    let stats: Value = client
        .get(server.url("/stats"))
        .send()
        .await
        .expect("stats request should complete")
        .json()
        .await
        .expect("stats should be json");
    assert_eq!(stats["active_sessions"], 2);
    assert_eq!(stats["total_messages"], 4);
}

#[tokio::test]
async fn webhook_secret_gates_the_endpoint() {
    let llm = MockServer::start().await;
    mount_completion_reply(&llm, "ok").await;

    let mut config = base_config(&llm);
    config.gateway.webhook_secret = Some("shared-secret".to_string());
    let server = GatewayTestServer::start(config).await;
    let client = reqwest::Client::new();

    let payload = serde_json::json!({"from": "ops", "message": "ping"});

    let missing = client
        .post(server.url("/webhook"))
        .json(&payload)
        .send()
        .await
        .expect("request without secret should complete");
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let missing_body: Value = missing.json().await.expect("error should be json");
    assert!(
        missing_body["error"]
            .as_str()
            .is_some_and(|msg| msg.contains("X-Webhook-Secret"))
    );

    let wrong = client
        .post(server.url("/webhook"))
        .header("X-Webhook-Secret", "guess")
        .json(&payload)
        .send()
        .await
        .expect("request with wrong secret should complete");
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let authorized = client
        .post(server.url("/webhook"))
        .header("X-Webhook-Secret", "shared-secret")
        .json(&payload)
        .send()
        .await
        .expect("authorized request should complete");
    assert_eq!(authorized.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_validates_payload_shape() {
    let llm = MockServer::start().await;

    let server = GatewayTestServer::start(base_config(&llm)).await;
    let client = reqwest::Client::new();

    let missing_field = client
        .post(server.url("/webhook"))
        .json(&serde_json::json!({"from": "someone"}))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(missing_field.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let malformed = client
        .post(server.url("/webhook"))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request should complete");
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let blank_from = client
        .post(server.url("/webhook"))
        .json(&serde_json::json!({"from": "   ", "message": "hello"}))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(blank_from.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let blank_message = client
        .post(server.url("/webhook"))
        .json(&serde_json::json!({"from": "someone", "message": ""}))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(blank_message.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let llm = MockServer::start().await;

    let server = GatewayTestServer::start(base_config(&llm)).await;
    let client = reqwest::Client::new();

    let huge = "a".repeat(70_000);
    let response = client
        .post(server.url("/webhook"))
        .json(&serde_json::json!({"from": "someone", "message": huge}))
        .send()
        .await
        .expect("oversized request should complete");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn health_reports_uptime() {
    let llm = MockServer::start().await;

    let server = GatewayTestServer::start(base_config(&llm)).await;
    let client = reqwest::Client::new();

    let response = client
        .get(server.url("/health"))
        .send()
        .await
        .expect("health request should complete");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("health should be json");
    assert_eq!(body["status"], "ok");
    assert!(body["uptime_secs"].is_u64());
}

#[tokio::test]
async fn whatsapp_routes_are_absent_without_the_channel() {
    let llm = MockServer::start().await;

    let server = GatewayTestServer::start(base_config(&llm)).await;
    let client = reqwest::Client::new();

    let verify = client
        .get(server.url("/whatsapp"))
        .query(&[("hub.mode", "subscribe")])
        .send()
        .await
        .expect("verify request should complete");
    assert_eq!(verify.status(), StatusCode::NOT_FOUND);

    let delivery = client
        .post(server.url("/whatsapp"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .expect("delivery should complete");
    assert_eq!(delivery.status(), StatusCode::NOT_FOUND);

    let send = client
        .post(server.url("/send"))
        .json(&serde_json::json!({"to": "+15550001111", "message": "hi"}))
        .send()
        .await
        .expect("send should complete");
    assert_eq!(send.status(), StatusCode::NOT_FOUND);
}
