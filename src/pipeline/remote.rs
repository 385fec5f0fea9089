//! Remote reasoning-service invoker.
//!
//! `RemoteInvoke` is the capability seam every stage talks through; a
//! retry/backoff/timeout policy can be layered behind it without touching
//! stage logic. `HttpRemote` is the production client; `MockRemote` serves
//! canned responses and records the call sequence for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::error::PipelineError;
use crate::config::AppConfig;

/// Header carrying the caller credential on every request.
pub const CREDENTIAL_HEADER: &str = "x-conjure-key";

#[async_trait]
pub trait RemoteInvoke: Send + Sync {
    /// Send `request` to the named remote operation and return its JSON
    /// response. Success is exactly HTTP 200 with a JSON body; anything else
    /// is a hard failure with no retry and no partial result.
    async fn invoke(&self, operation: &str, request: &Value) -> Result<Value, PipelineError>;
}

/// Join a base address and a relative path with exactly one separating
/// slash, regardless of whether either side already carries one.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// HTTP client resolving operation keys against a configured endpoint table.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    endpoints: HashMap<String, String>,
    api_key: String,
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        endpoints: HashMap<String, String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            endpoints,
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let endpoints = config
            .endpoints
            .iter()
            .map(|endpoint| (endpoint.key.clone(), endpoint.url.clone()))
            .collect();
        Self::new(&config.base_url, endpoints, &config.api_key)
    }

    /// Full address for an operation key.
    pub fn resolve(&self, operation: &str) -> Result<String, PipelineError> {
        let path = self
            .endpoints
            .get(operation)
            .ok_or_else(|| PipelineError::UnknownOperation(operation.to_string()))?;
        Ok(join_url(&self.base_url, path))
    }
}

#[async_trait]
impl RemoteInvoke for HttpRemote {
    async fn invoke(&self, operation: &str, request: &Value) -> Result<Value, PipelineError> {
        let url = self.resolve(operation)?;

        let response = self
            .client
            .post(&url)
            .header(CREDENTIAL_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|source| PipelineError::Transport {
                operation: operation.to_string(),
                source,
            })?;

        let status = response.status().as_u16();
        let json_typed = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("application/json"));
        let body = response
            .text()
            .await
            .map_err(|source| PipelineError::Transport {
                operation: operation.to_string(),
                source,
            })?;

        if status != 200 {
            tracing::error!(operation, status, body = %body, "remote operation failed");
            return Err(PipelineError::RemoteStatus {
                operation: operation.to_string(),
                status,
                body,
            });
        }

        if !json_typed {
            tracing::error!(operation, body = %body, "remote operation returned a non-JSON body");
            return Err(PipelineError::NonJsonBody {
                operation: operation.to_string(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|_| {
            tracing::error!(operation, body = %body, "remote operation body failed to parse as JSON");
            PipelineError::NonJsonBody {
                operation: operation.to_string(),
                body,
            }
        })
    }
}

/// One recorded invocation, in call order.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub operation: String,
    pub request: Value,
}

/// Test double serving canned responses per operation and recording every
/// call. Responses queue per operation; the last queued response repeats
/// once the queue drains, so a fixed answer needs queueing only once.
#[derive(Default)]
pub struct MockRemote {
    responses: Mutex<HashMap<String, VecDeque<Value>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for an operation. Builder-style for test setup.
    pub fn respond_with(self, operation: &str, response: Value) -> Self {
        self.push_response(operation, response);
        self
    }

    pub fn push_response(&self, operation: &str, response: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Operation names in call order.
    pub fn operations(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.operation.clone())
            .collect()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }
}

#[async_trait]
impl RemoteInvoke for MockRemote {
    async fn invoke(&self, operation: &str, request: &Value) -> Result<Value, PipelineError> {
        self.calls.lock().unwrap().push(RecordedCall {
            operation: operation.to_string(),
            request: request.clone(),
        });

        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .get_mut(operation)
            .ok_or_else(|| PipelineError::UnknownOperation(operation.to_string()))?;
        match queue.len() {
            0 => Err(PipelineError::UnknownOperation(operation.to_string())),
            1 => Ok(queue.front().cloned().unwrap_or(Value::Null)),
            _ => Ok(queue.pop_front().unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_normalizes_every_slash_combination() {
        assert_eq!(join_url("http://a.com", "path"), "http://a.com/path");
        assert_eq!(join_url("http://a.com/", "path"), "http://a.com/path");
        assert_eq!(join_url("http://a.com", "/path"), "http://a.com/path");
        assert_eq!(join_url("http://a.com/", "/path"), "http://a.com/path");
    }

    #[test]
    fn resolve_looks_up_the_endpoint_table() {
        let endpoints = HashMap::from([
            ("transcribe".to_string(), "v1/transcribe".to_string()),
            ("check".to_string(), "/v1/audit/check".to_string()),
        ]);
        let remote = HttpRemote::new("https://svc.example.com/api/", endpoints, "key");

        assert_eq!(
            remote.resolve("transcribe").unwrap(),
            "https://svc.example.com/api/v1/transcribe"
        );
        assert_eq!(
            remote.resolve("check").unwrap(),
            "https://svc.example.com/api/v1/audit/check"
        );
    }

    #[test]
    fn resolve_unknown_operation_is_typed() {
        let remote = HttpRemote::new("https://svc.example.com", HashMap::new(), "key");
        let err = remote.resolve("noteGenerator").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownOperation(op) if op == "noteGenerator"));
    }

    #[tokio::test]
    async fn mock_serves_and_records() {
        let mock = MockRemote::new().respond_with("transcribe", json!({"transcript": "hi"}));

        let response = mock
            .invoke("transcribe", &json!({"url": "s3://x"}))
            .await
            .unwrap();
        assert_eq!(response["transcript"], "hi");

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, "transcribe");
        assert_eq!(calls[0].request["url"], "s3://x");
    }

    #[tokio::test]
    async fn mock_repeats_last_response_when_queue_drains() {
        let mock = MockRemote::new()
            .respond_with("noteGenerator", json!({"note": 1}))
            .respond_with("noteGenerator", json!({"note": 2}));

        let first = mock.invoke("noteGenerator", &json!({})).await.unwrap();
        let second = mock.invoke("noteGenerator", &json!({})).await.unwrap();
        let third = mock.invoke("noteGenerator", &json!({})).await.unwrap();
        assert_eq!(first["note"], 1);
        assert_eq!(second["note"], 2);
        assert_eq!(third["note"], 2);
        assert_eq!(mock.call_count("noteGenerator"), 3);
    }

    #[tokio::test]
    async fn mock_errors_on_unconfigured_operation() {
        let mock = MockRemote::new();
        let err = mock.invoke("edit", &json!({})).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownOperation(_)));
    }
}
