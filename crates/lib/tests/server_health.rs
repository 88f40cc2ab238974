//! Integration test: start the server on a free port and exercise the HTTP API.
//! Forces mock mode, so it does not require Ollama or Redis. The server task is left running when the test ends.

use insights::config::Config;
use insights::server;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn start_mock_server() -> String {
    let port = free_port();
    let mut config = Config::default();
    config.server.port = port;
    config.server.bind = "127.0.0.1".to_string();
    config.gateway.force_mock = true;
    tokio::spawn(async move {
        let _ = server::run_server(config).await;
    });

    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/api/health", base)).send().await {
            if resp.status().is_success() {
                return base;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server at {} did not become healthy within 5s", base);
}

#[tokio::test]
async fn health_reports_startup_decisions() {
    let base = start_mock_server().await;
    let json: serde_json::Value = reqwest::get(format!("{}/api/health", base))
        .await
        .expect("health request")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "Health Insights AI");
    assert_eq!(json["forceMock"], true);
    assert_eq!(json["sessionStore"], "memory");
}

#[tokio::test]
async fn followup_answers_with_mock_provenance() {
    let base = start_mock_server().await;
    let client = reqwest::Client::new();
    for question in ["What does high cholesterol mean?", "And what about HDL?"] {
        let resp = client
            .post(format!("{}/api/followup", base))
            .json(&serde_json::json!({ "sessionKey": "it-session", "question": question }))
            .send()
            .await
            .expect("followup request");
        assert_eq!(resp.status(), 200);
        let json: serde_json::Value = resp.json().await.expect("parse JSON");
        assert_eq!(json["provenance"], "mock");
        assert!(json["answer"].as_str().unwrap_or("").contains(question));
    }
}

#[tokio::test]
async fn malformed_followups_are_rejected() {
    let base = start_mock_server().await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/followup", base);

    let resp = client
        .post(&url)
        .json(&serde_json::json!({ "question": "no key" }))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);
    let json: serde_json::Value = resp.json().await.expect("parse JSON");
    assert_eq!(json["error"], "Malformed Request");

    let resp = client
        .post(&url)
        .json(&serde_json::json!({ "sessionKey": "k", "question": "   " }))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_page_is_served() {
    let base = start_mock_server().await;
    let resp = reqwest::get(format!("{}/api/test-followup", base))
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.expect("body");
    assert!(body.contains("<form id=\"followup\">"));
    assert!(body.contains("sess-"));
}

#[tokio::test]
async fn browser_origin_is_allowed_for_the_dev_frontend() {
    let base = start_mock_server().await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(reqwest::Method::OPTIONS, format!("{}/api/followup", base))
        .header("Origin", "http://localhost:3000")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .send()
        .await
        .expect("preflight");
    assert!(preflight.status().is_success());
    assert_eq!(
        preflight.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );

    let other = client
        .get(format!("{}/api/health", base))
        .header("Origin", "http://evil.example")
        .send()
        .await
        .expect("request");
    assert_eq!(other.status(), 200);
    assert!(other.headers().get("access-control-allow-origin").is_none());
}
