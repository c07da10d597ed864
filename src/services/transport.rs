//! HTTP calls to channel endpoints.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Fully built and signed request
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for ChannelRequest {
    // headers carry credentials
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("body_len", &self.body.as_ref().map_or(0, String::len))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ChannelRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl ChannelResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: String::new(),
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(Duration::from_secs(secs));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Send `request`, giving up on `cancel` or after `request.timeout`
    async fn send(&self, request: ChannelRequest, cancel: CancellationToken) -> Result<ChannelResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    async fn execute(&self, request: ChannelRequest) -> Result<ChannelResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                TransportError::Invalid(e.to_string())
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(ChannelResponse {
            status,
            retry_after,
            body,
        })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelTransport for ReqwestTransport {
    async fn send(&self, request: ChannelRequest, cancel: CancellationToken) -> Result<ChannelResponse, TransportError> {
        let timeout = request.timeout;
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(timeout, self.execute(request)) => match result {
                Ok(response) => response,
                Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
            },
        }
    }
}

type Scripted = Result<ChannelResponse, TransportError>;

/// In-process transport answering from per-URL scripts; records every
/// request it sees. Unscripted URLs answer 200.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Scripted>>>>,
    fallbacks: Arc<Mutex<HashMap<String, Scripted>>>,
    requests: Arc<Mutex<Vec<ChannelRequest>>>,
    gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one-shot answers for URLs starting with `prefix`
    pub fn push(&self, prefix: &str, answer: Scripted) {
        self.scripts
            .lock()
            .entry(prefix.to_string())
            .or_default()
            .push_back(answer);
    }

    /// Answer for `prefix` once its queue is empty
    pub fn always(&self, prefix: &str, answer: Scripted) {
        self.fallbacks.lock().insert(prefix.to_string(), answer);
    }

    /// Park every request until the returned gate hands out a permit, one
    /// request per permit
    pub fn hold_requests(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn requests(&self) -> Vec<ChannelRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, prefix: &str) -> Vec<ChannelRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn answer(&self, url: &str) -> Scripted {
        let mut scripts = self.scripts.lock();
        if let Some(queue) = scripts
            .iter_mut()
            .filter(|(prefix, queue)| url.starts_with(prefix.as_str()) && !queue.is_empty())
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, queue)| queue)
        {
            if let Some(answer) = queue.pop_front() {
                return answer;
            }
        }
        drop(scripts);

        self.fallbacks
            .lock()
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| Ok(ChannelResponse::new(200)))
    }
}

#[async_trait]
impl ChannelTransport for ScriptedTransport {
    async fn send(&self, request: ChannelRequest, cancel: CancellationToken) -> Result<ChannelResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
            }
        }
        let answer = self.answer(&request.url);
        self.requests.lock().push(request);
        answer
    }
}
