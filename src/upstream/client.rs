//! Upstream client facade.
//!
//! One `UpstreamClient` is built at startup and shared behind an `Arc`. It
//! owns the breaker store, the limiter, the pruning task and the dispatcher,
//! and exposes the operations the dashboard and the admin API use.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::docker;
use crate::resilience::{
    BreakerPruner, BreakerStats, BreakerStore, CircuitBreaker, ConcurrencyLimiter,
    FleetBreakerStats,
};
use crate::upstream::dispatcher::{ApiKey, ApiKeyError, Dispatcher, RequestOptions};
use crate::upstream::error::{TransportError, UpstreamError};
use crate::upstream::transport::{ReqwestTransport, Transport, UpstreamResponse};

/// Errors building an `UpstreamClient`.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid upstream API key: {0}")]
    ApiKey(#[from] ApiKeyError),

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] TransportError),
}

/// Breaker stats for one endpoint or the whole fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BreakerStatsView {
    Endpoint(BreakerStats),
    Fleet(FleetBreakerStats),
}

/// Query options for `container_logs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    /// Number of trailing lines; `None` returns everything.
    pub tail: Option<u32>,
    /// Only lines after this Unix timestamp (seconds).
    pub since: Option<i64>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: Some(100),
            since: None,
        }
    }
}

impl LogOptions {
    fn to_request_options(&self) -> RequestOptions {
        let flag = |on: bool| if on { "1" } else { "0" };
        let mut options = RequestOptions::new()
            .query("stdout", flag(self.stdout))
            .query("stderr", flag(self.stderr))
            .query("timestamps", flag(self.timestamps));
        options = match self.tail {
            Some(tail) => options.query("tail", tail.to_string()),
            None => options.query("tail", "all"),
        };
        if let Some(since) = self.since {
            options = options.query("since", since.to_string());
        }
        options
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    #[serde(default)]
    config: ContainerConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

/// Resilient client for the Docker management API.
pub struct UpstreamClient<T = ReqwestTransport> {
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<ConcurrencyLimiter>,
    pruner: BreakerPruner,
    dispatcher: Dispatcher<T>,
}

impl<T> std::fmt::Debug for UpstreamClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("breaker", &self.breaker)
            .field("limiter", &self.limiter)
            .field("pruner", &self.pruner)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl UpstreamClient<ReqwestTransport> {
    /// Build a client with the production HTTP transport.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ClientBuildError> {
        let transport = ReqwestTransport::new(&config.upstream)?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> UpstreamClient<T> {
    pub fn with_transport(config: &ServiceConfig, transport: T) -> Result<Self, ClientBuildError> {
        let api_key = ApiKey::new(&config.upstream.api_key)?;
        let store = Arc::new(BreakerStore::new());
        let breaker = Arc::new(CircuitBreaker::new(store.clone(), &config.breaker));
        let limiter = Arc::new(ConcurrencyLimiter::new(config.limiter.max_concurrent));
        let pruner = BreakerPruner::new(store, &config.breaker);
        let dispatcher = Dispatcher::new(
            config.upstream.base_url.clone(),
            api_key,
            transport,
            breaker.clone(),
            limiter.clone(),
        );

        tracing::info!(
            base_url = %config.upstream.base_url,
            max_concurrent = limiter.max_concurrent(),
            failure_threshold = config.breaker.failure_threshold,
            "Upstream client initialized"
        );

        Ok(Self {
            breaker,
            limiter,
            pruner,
            dispatcher,
        })
    }

    /// Perform one call against endpoint `target`.
    pub async fn dispatch(
        &self,
        target: &str,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.dispatcher.dispatch(target, method, path, options).await
    }

    pub fn decode_log_payload(&self, body: &[u8]) -> String {
        docker::decode_log_payload(body)
    }

    pub fn sanitize_labels(&self, labels: &HashMap<String, String>) -> HashMap<String, String> {
        docker::sanitize_labels(labels)
    }

    /// Stats for one endpoint, or the fleet aggregate when `target` is `None`.
    pub fn circuit_breaker_stats(&self, target: Option<&str>) -> BreakerStatsView {
        match target {
            Some(target) => BreakerStatsView::Endpoint(self.breaker.stats(target)),
            None => BreakerStatsView::Fleet(self.breaker.fleet_stats()),
        }
    }

    pub fn prune_stale_breakers(&self) -> usize {
        self.pruner.prune_stale_breakers()
    }

    /// Start the background sweep. Returns false if it was already running.
    pub fn start_breaker_pruning(&self) -> bool {
        self.pruner.start()
    }

    /// Stop the background sweep. Returns false if it was not running.
    pub fn stop_breaker_pruning(&self) -> bool {
        self.pruner.stop()
    }

    /// Clear every breaker record and reset the limiter.
    pub fn reset_client_state(&self) {
        self.breaker.reset_all();
        self.limiter.reset();
        tracing::info!("Upstream client state reset");
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn is_pruning(&self) -> bool {
        self.pruner.is_running()
    }

    /// Fetch and decode a container's logs.
    pub async fn container_logs(
        &self,
        endpoint: &str,
        container: &str,
        options: &LogOptions,
    ) -> Result<String, UpstreamError> {
        let path = container_path(endpoint, container, "logs")?;
        let response = self
            .dispatch(endpoint, Method::GET, &path, options.to_request_options())
            .await?;
        Ok(self.decode_log_payload(&response.body))
    }

    /// Fetch a container's labels with host paths redacted.
    pub async fn container_labels(
        &self,
        endpoint: &str,
        container: &str,
    ) -> Result<HashMap<String, String>, UpstreamError> {
        let path = container_path(endpoint, container, "json")?;
        let response = self
            .dispatch(endpoint, Method::GET, &path, RequestOptions::new())
            .await?;
        let inspect: ContainerInspect = response.json()?;
        let labels = inspect.config.labels.unwrap_or_default();
        Ok(self.sanitize_labels(&labels))
    }
}

fn container_path(endpoint: &str, container: &str, action: &str) -> Result<String, UpstreamError> {
    validate_id("endpoint", endpoint)?;
    validate_id("container", container)?;
    Ok(format!(
        "/endpoints/{endpoint}/docker/containers/{container}/{action}"
    ))
}

/// Ids are interpolated into the URL path, so only a safe charset is allowed.
fn validate_id(kind: &str, id: &str) -> Result<(), UpstreamError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && id != "."
        && id != "..";
    if valid {
        Ok(())
    } else {
        Err(UpstreamError::InvalidRequest(format!(
            "invalid {kind} id {id:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::BreakerState;
    use crate::upstream::transport::UpstreamRequest;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    struct FixedTransport {
        status: u16,
        body: Vec<u8>,
        paths: Mutex<Vec<String>>,
    }

    impl FixedTransport {
        fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
            Self {
                status,
                body: body.into(),
                paths: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for FixedTransport {
        async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
            let mut seen = request.url.path().to_string();
            if let Some(query) = request.url.query() {
                seen.push('?');
                seen.push_str(query);
            }
            self.paths.lock().unwrap().push(seen);
            Ok(UpstreamResponse {
                status: StatusCode::from_u16(self.status).unwrap(),
                headers: HeaderMap::new(),
                body: self.body.clone(),
            })
        }
    }

    fn config(failure_threshold: u32) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.upstream.base_url = "http://upstream.local/api".into();
        config.upstream.api_key = "ptr_test".into();
        config.breaker.failure_threshold = failure_threshold;
        config
    }

    fn client(transport: FixedTransport, failure_threshold: u32) -> UpstreamClient<FixedTransport> {
        UpstreamClient::with_transport(&config(failure_threshold), transport).unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        let mut config = config(1);
        config.upstream.api_key.clear();
        let err = UpstreamClient::with_transport(&config, FixedTransport::new(200, "")).unwrap_err();
        assert!(matches!(err, ClientBuildError::ApiKey(ApiKeyError::Empty)));
    }

    #[test]
    fn test_empty_fleet_stats() {
        let client = client(FixedTransport::new(200, ""), 1);
        let json = serde_json::to_value(client.circuit_breaker_stats(None)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "state": "CLOSED",
                "failures": 0,
                "successes": 0,
                "byEndpoint": {}
            })
        );
    }

    #[tokio::test]
    async fn test_container_logs_decoded() {
        let mut body = vec![1, 0, 0, 0, 0, 0, 0, 6];
        body.extend_from_slice(b"hello\n");
        let client = client(FixedTransport::new(200, body), 1);

        let text = client
            .container_logs("2", "web-1", &LogOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "hello\n");

        let paths = client.dispatcher_transport_paths();
        assert_eq!(
            paths[0],
            "/api/endpoints/2/docker/containers/web-1/logs?stdout=1&stderr=1&timestamps=0&tail=100"
        );
    }

    #[tokio::test]
    async fn test_container_labels_sanitized() {
        let body = serde_json::json!({
            "Id": "abc",
            "Config": {
                "Labels": {
                    "com.docker.compose.project.working_dir": "/srv/stack",
                    "com.docker.compose.service": "api"
                }
            }
        });
        let client = client(FixedTransport::new(200, body.to_string()), 1);

        let labels = client.container_labels("2", "abc").await.unwrap();
        assert_eq!(labels["com.docker.compose.project.working_dir"], "[REDACTED]");
        assert_eq!(labels["com.docker.compose.service"], "api");
    }

    #[tokio::test]
    async fn test_container_labels_null() {
        let body = r#"{"Config":{"Labels":null}}"#;
        let client = client(FixedTransport::new(200, body), 1);
        assert!(client.container_labels("2", "abc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_container_labels_bad_payload() {
        let client = client(FixedTransport::new(200, "not json"), 1);
        let err = client.container_labels("2", "abc").await.unwrap_err();
        assert_eq!(err.code(), "payload_error");
        assert_eq!(client.breaker().state("2"), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_invalid_container_id_rejected_before_breaker() {
        let client = client(FixedTransport::new(200, ""), 1);
        for bad in ["", "..", "a/b", "web 1", "x?y"] {
            let err = client
                .container_logs("2", bad, &LogOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.code(), "invalid_request", "id {bad:?}");
        }
        assert!(client.breaker().store().is_empty());
    }

    #[tokio::test]
    async fn test_reset_client_state() {
        let client = client(FixedTransport::new(503, "down"), 1);
        assert!(client
            .dispatch("5", Method::GET, "/info", RequestOptions::new())
            .await
            .is_err());
        assert_eq!(client.breaker().state("5"), BreakerState::Open);

        client.reset_client_state();
        assert_eq!(client.breaker().state("5"), BreakerState::Closed);
        assert!(client.breaker().store().is_empty());
        assert_eq!(client.limiter().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_single_endpoint_stats() {
        let client = client(FixedTransport::new(500, ""), 3);
        let _ = client
            .dispatch("8", Method::GET, "/info", RequestOptions::new())
            .await;

        match client.circuit_breaker_stats(Some("8")) {
            BreakerStatsView::Endpoint(stats) => {
                assert_eq!(stats.state, BreakerState::Closed);
                assert_eq!(stats.failures, 1);
                assert!(stats.last_failure.is_some());
            }
            other => panic!("expected endpoint stats, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pruning_lifecycle() {
        let client = client(FixedTransport::new(200, ""), 1);
        assert!(client.start_breaker_pruning());
        assert!(!client.start_breaker_pruning());
        assert!(client.is_pruning());
        assert!(client.stop_breaker_pruning());
        assert!(!client.stop_breaker_pruning());
        assert_eq!(client.prune_stale_breakers(), 0);
    }

    impl UpstreamClient<FixedTransport> {
        fn dispatcher_transport_paths(&self) -> Vec<String> {
            self.dispatcher.transport().paths.lock().unwrap().clone()
        }
    }
}
