//! HTTP-level tests of the gateway against a scripted engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hexgate_client::{ClientConfig, EngineClient, ReconnectConfig};
use hexgate_common::testing::{MockEngine, Reply};
use hexgate_server::{start_client, HttpServer};
use serde_json::{json, Value};
use tokio::net::TcpListener;

struct Gateway {
    addr: SocketAddr,
    http: reqwest::Client,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl Gateway {
    async fn start(client: Arc<EngineClient>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(HttpServer::new(client).serve(listener, async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            http: reqwest::Client::new(),
            shutdown: Some(tx),
        }
    }

    async fn post_raw(&self, body: &str) -> (reqwest::StatusCode, Value) {
        let response = self
            .http
            .post(format!("http://{}/execute", self.addr))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn execute(&self, body: Value) -> Value {
        let (status, envelope) = self.post_raw(&body.to_string()).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        envelope
    }

    async fn health(&self) -> Value {
        self.http
            .get(format!("http://{}/__health", self.addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn config_for(addr: String) -> ClientConfig {
    ClientConfig::new(addr).with_reconnect(ReconnectConfig::disabled())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_success_envelope() {
    let engine = MockEngine::start().await;
    engine.set_responder(|req| Reply::Result(json!({"echo": req.code})));
    let gateway = Gateway::start(start_client(config_for(engine.addr())).await.unwrap()).await;

    let envelope = gateway.execute(json!({"code": "1 + 1"})).await;
    assert_eq!(envelope, json!({"ok": true, "result": {"echo": "1 + 1"}}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_null_result_is_still_success() {
    let engine = MockEngine::start().await;
    engine.set_responder(|_| Reply::Result(Value::Null));
    let gateway = Gateway::start(start_client(config_for(engine.addr())).await.unwrap()).await;

    let envelope = gateway.execute(json!({"code": "undefined"})).await;
    assert_eq!(envelope, json!({"ok": true, "result": null}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_script_failure_envelope() {
    let engine = MockEngine::start().await;
    engine.set_responder(|_| Reply::Error("SyntaxError: unexpected token".into()));
    let gateway = Gateway::start(start_client(config_for(engine.addr())).await.unwrap()).await;

    let envelope = gateway.execute(json!({"code": "1 +"})).await;
    assert_eq!(envelope, json!({"ok": false, "error": "SyntaxError: unexpected token"}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_non_string_code_never_reaches_engine() {
    let engine = MockEngine::start().await;
    let gateway = Gateway::start(start_client(config_for(engine.addr())).await.unwrap()).await;
    engine.wait_for_connections(1, Duration::from_secs(5)).await;

    let envelope = gateway.execute(json!({"code": 123})).await;
    assert_eq!(envelope, json!({"ok": false, "error": "Code must be a string"}));

    let envelope = gateway.execute(json!({})).await;
    assert_eq!(envelope, json!({"ok": false, "error": "Code must be a string"}));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.frame_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalid_json_body() {
    let engine = MockEngine::start().await;
    let gateway = Gateway::start(start_client(config_for(engine.addr())).await.unwrap()).await;

    let (status, envelope) = gateway.post_raw("{\"code\": ").await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(envelope, json!({"ok": false, "error": "Request body must be valid JSON"}));
    assert_eq!(engine.frame_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engine_down_envelope() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let gateway = Gateway::start(start_client(config_for(addr)).await.unwrap()).await;

    let envelope = gateway.execute(json!({"code": "1"})).await;
    assert_eq!(envelope["ok"], json!(false));
    let error = envelope["error"].as_str().unwrap();
    assert!(error.starts_with("Connection error: "), "{}", error);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropped_session_envelope() {
    let engine = MockEngine::start().await;
    engine.set_responder(|_| Reply::Disconnect);
    let gateway = Gateway::start(start_client(config_for(engine.addr())).await.unwrap()).await;

    let envelope = gateway.execute(json!({"code": "crash()"})).await;
    assert_eq!(envelope["ok"], json!(false));
    let error = envelope["error"].as_str().unwrap();
    assert!(error.starts_with("Connection lost: "), "{}", error);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_print_is_installed_by_default() {
    let engine = MockEngine::start().await;
    engine.set_responder(|_| Reply::Callback {
        name: "print".into(),
        args: vec![json!("from"), json!("engine")],
    });
    let gateway = Gateway::start(start_client(config_for(engine.addr())).await.unwrap()).await;

    let envelope = gateway.execute(json!({"code": "print('from', 'engine')"})).await;
    assert_eq!(envelope, json!({"ok": true, "result": null}));
    assert!(engine.callback_replies()[0].is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_http_requests() {
    let engine = MockEngine::start().await;
    engine.set_responder(|req| Reply::Result(json!(req.code)));
    let gateway = Gateway::start(start_client(config_for(engine.addr())).await.unwrap()).await;

    let requests = (0..25).map(|i| gateway.execute(json!({"code": format!("req-{}", i)})));
    let envelopes = futures::future::join_all(requests).await;

    for (i, envelope) in envelopes.into_iter().enumerate() {
        assert_eq!(envelope, json!({"ok": true, "result": format!("req-{}", i)}));
    }
    assert_eq!(engine.connection_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_health_endpoint() {
    let engine = MockEngine::start().await;
    let gateway = Gateway::start(start_client(config_for(engine.addr())).await.unwrap()).await;

    let health = gateway.health().await;
    assert_eq!(health["state"], json!("connected"));
    assert_eq!(health["pending"], json!(0));
    assert!(health["uptime_ms"].is_u64());
}
