#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, Method as HttpMethod, StatusCode, Uri};
use axum::routing::any;
use axum::Router;
use reqwest::Client;
use serde_json::{json, Value};

use waitlist_relay::config::{Config, DispatchConfig, GcConfig, QueueConfig, DEFAULT_DEDUP_RULES};
use waitlist_relay::dispatch::http::HttpDispatcher;
use waitlist_relay::dispatch::{DispatchError, DispatchRequest, DispatchResponse, Dispatcher};
use waitlist_relay::queue::dedup::DedupRules;
use waitlist_relay::queue::NewAction;
use waitlist_relay::models::Method;
use waitlist_relay::state::SharedState;

/// Build a config suitable for tests. `dispatch_base_url` points at the stub handlers.
pub fn test_config(dispatch_base_url: &str) -> Config {
    Config {
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        log_level: "warn".to_string(),
        max_body_size: 64 * 1024,
        trusted_proxies: vec![],
        cors_origins: vec![],
        queue: QueueConfig::default(),
        gc: GcConfig::default(),
        dispatch: DispatchConfig {
            base_url: dispatch_base_url.to_string(),
            timeout: Duration::from_millis(500),
        },
        admission_rate_limit: 0,
        admission_rate_window_secs: 60,
        dedup_rules: DedupRules::parse(DEFAULT_DEDUP_RULES).unwrap(),
    }
}

pub fn new_action(kind: &str, path: &str, payload: Value) -> NewAction {
    NewAction {
        action_kind: kind.to_string(),
        target_path: path.to_string(),
        method: Method::Post,
        payload,
        headers: None,
        owner_id: None,
    }
}

// ── Stub handlers ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct HandlerLog {
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl HandlerLog {
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn count_path(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.path == path).count()
    }

    pub fn last(&self) -> Option<RecordedCall> {
        self.calls.lock().unwrap().last().cloned()
    }
}

/// Stand-in for the real action handlers:
/// `/api/fail*` answers 500, `/api/slow*` sleeps two seconds, everything else 200.
async fn stub_handler(
    State(log): State<Arc<HandlerLog>>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let path = uri.path().to_string();
    let recorded_headers = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();

    log.calls.lock().unwrap().push(RecordedCall {
        method: method.to_string(),
        path: path.clone(),
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
        headers: recorded_headers,
    });

    if path.starts_with("/api/fail") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "handler exploded".to_string());
    }
    if path.starts_with("/api/slow") {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    (StatusCode::OK, json!({ "ok": true }).to_string())
}

/// Spawn the stub handler server, returning its base URL and call log.
pub async fn spawn_handlers() -> (String, Arc<HandlerLog>) {
    let log = Arc::new(HandlerLog::default());
    let router = Router::new()
        .route("/{*path}", any(stub_handler))
        .with_state(log.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind handler port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Handler server failed");
    });

    (format!("http://{addr}"), log)
}

// ── Mock dispatcher ─────────────────────────────────────────────

pub enum Behaviour {
    Status(u16),
    TransportError,
    Hang,
}

/// Dispatcher that records calls and answers with a fixed behaviour.
pub struct MockDispatcher {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<DispatchRequest>>,
    behaviour: Behaviour,
}

impl MockDispatcher {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            behaviour,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn dispatch(&self, req: &DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(req.clone());
        match self.behaviour {
            Behaviour::Status(code) => Ok(DispatchResponse {
                status_code: code,
                body: String::new(),
            }),
            Behaviour::TransportError => Err(DispatchError::Transport("connection refused".to_string())),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(DispatchResponse {
                    status_code: 200,
                    body: String::new(),
                })
            }
        }
    }
}

// ── Relay server ────────────────────────────────────────────────

/// A running relay instance wired to the stub handlers.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub state: SharedState,
    pub handlers: Arc<HandlerLog>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn enqueue(&self, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url("/api/queue"))
            .json(body)
            .send()
            .await
            .expect("enqueue request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn process(&self, selector: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url("/api/queue/process"))
            .json(selector)
            .send()
            .await
            .expect("process request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn delete(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("delete request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Spawn a relay on a random port, letting the caller adjust the config first.
pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let (handler_url, handlers) = spawn_handlers().await;

    let mut config = test_config(&handler_url);
    configure(&mut config);

    let dispatcher = HttpDispatcher::new(&config.dispatch.base_url, config.dispatch.timeout)
        .expect("Failed to build dispatcher");
    let (app, state) = waitlist_relay::build_app(config, Arc::new(dispatcher));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        state,
        handlers,
    }
}
