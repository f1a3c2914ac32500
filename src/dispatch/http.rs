use std::time::Duration;

use async_trait::async_trait;

use super::{DispatchError, DispatchRequest, DispatchResponse, Dispatcher};
use crate::models::Method;

/// Headers that describe the original hop and must not be replayed.
const DROPPED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "content-type",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-connection",
];

pub const REPLAY_HEADER: &str = "x-relay-replay";

/// Replays actions as HTTP requests against `base_url + targetPath`.
pub struct HttpDispatcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| format!("Failed to build dispatch client: {e}"))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, req: &DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        if !req.target_path.starts_with('/') {
            return Err(DispatchError::InvalidRequest(format!(
                "target path must start with '/': {}",
                req.target_path
            )));
        }
        let url = format!("{}{}", self.base_url, req.target_path);

        let mut builder = match req.method {
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };

        for (k, v) in &req.headers {
            if DROPPED_HEADERS.contains(&k.to_ascii_lowercase().as_str()) {
                continue;
            }
            builder = builder.header(k, v);
        }

        let queue_id = req.queue_id.to_string();
        builder = builder
            .header(REPLAY_HEADER, &queue_id)
            .header("idempotency-key", &queue_id);

        let resp = builder.json(&req.payload).send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout(self.timeout.as_millis() as u64)
            } else if e.is_builder() {
                DispatchError::InvalidRequest(e.to_string())
            } else {
                DispatchError::Transport(e.to_string())
            }
        })?;

        let status_code = resp.status().as_u16();
        let body = match resp.text().await {
            Ok(text) => text.chars().take(1024).collect::<String>(),
            Err(e) => {
                tracing::debug!("Failed to read response body from {url}: {e}");
                format!("<unreadable response body: {e}>")
            }
        };

        Ok(DispatchResponse { status_code, body })
    }
}
