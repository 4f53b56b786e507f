//! Trace recording for Parley — observation and score export
//!
//! Provides an `ObservationClient` for a Langfuse-compatible telemetry sink
//! (batched ingestion events plus an upserting scores endpoint) and a
//! `TraceRecorder` wrapper with the degradation semantics the chat flow
//! relies on: trace identifiers are generated locally before any network
//! call, sink failures are swallowed to diagnostics, and score identifiers
//! are derived deterministically from the trace identifier so resubmission
//! overwrites instead of duplicating.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use crate::models::TokenUsage;

/// Namespace for v5 score-id derivation. Fixed forever: changing it would
/// break score idempotency across deployments.
pub const SCORE_NAMESPACE: Uuid = Uuid::from_u128(0x8a3c_f23f_d4e4_4b90_9f1c_0f64_a2cc_d52a);

/// Score name used for user feedback.
pub const HELPFULNESS: &str = "helpfulness";

const SINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Deterministic score identifier for a trace. Submitting the same trace's
/// score any number of times yields the same id, which the sink upserts.
pub fn score_id_for(trace_id: Uuid) -> Uuid {
    Uuid::new_v5(&SCORE_NAMESPACE, trace_id.as_bytes())
}

// ============================================================================
// Error types
// ============================================================================

/// Sink errors. These never reach the user: the recorder degrades to local
/// identifiers or skips, and logs.
#[derive(Error, Debug)]
pub enum TraceSinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sink error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("missing sink credentials")]
    MissingCredentials,

    #[error("all {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

// ============================================================================
// Config
// ============================================================================

/// Sink connection configuration.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub public_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl SinkConfig {
    pub fn new(
        public_key: Option<String>,
        secret_key: Option<String>,
        host: Option<String>,
    ) -> Self {
        let public_key = public_key
            .or_else(|| std::env::var("LANGFUSE_PUBLIC_KEY").ok())
            .unwrap_or_default();
        let secret_key = secret_key
            .or_else(|| std::env::var("LANGFUSE_SECRET_KEY").ok())
            .unwrap_or_default();
        let base_url = host
            .or_else(|| std::env::var("LANGFUSE_HOST").ok())
            .unwrap_or_else(|| "https://cloud.langfuse.com".to_string());

        Self {
            public_key,
            secret_key,
            base_url,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

// ============================================================================
// Wire structs
// ============================================================================

/// One entry of the batched ingestion envelope. The event id is the sink's
/// deduplication key, so retries of the same batch are safe.
#[derive(Debug, Clone, Serialize)]
struct IngestionEvent {
    id: Uuid,
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: DateTime<Utc>,
    body: serde_json::Value,
}

impl IngestionEvent {
    fn new(kind: &'static str, body: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            body,
        }
    }
}

/// Score payload for the upserting scores endpoint. `id` is derived from the
/// trace id (see [`score_id_for`]), which is what makes scoring idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub id: Uuid,
    pub trace_id: Uuid,
    pub name: String,
    pub value: u8,
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ScoreRecord {
    pub fn helpfulness(trace_id: Uuid, value: u8, comment: impl Into<String>) -> Self {
        Self {
            id: score_id_for(trace_id),
            trace_id,
            name: HELPFULNESS.to_string(),
            value,
            data_type: "BOOLEAN".to_string(),
            comment: Some(comment.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct IngestionBatch<'a> {
    batch: &'a [IngestionEvent],
}

// ============================================================================
// ObservationClient
// ============================================================================

/// HTTP client for the telemetry sink.
#[derive(Debug, Clone)]
pub struct ObservationClient {
    client: Client,
    config: SinkConfig,
}

impl ObservationClient {
    pub fn new(config: SinkConfig) -> Result<Self, TraceSinkError> {
        if config.public_key.is_empty() || config.secret_key.is_empty() {
            return Err(TraceSinkError::MissingCredentials);
        }

        let client = Client::builder().timeout(SINK_TIMEOUT).build()?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn ingest(&self, events: &[IngestionEvent]) -> Result<(), TraceSinkError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        Retry::spawn(retry_strategy, || self.ingest_once(events))
            .await
            .map_err(|e| {
                tracing::warn!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All ingestion retry attempts failed"
                );
                TraceSinkError::RetryExhausted {
                    attempts: self.config.max_retries,
                }
            })
    }

    async fn ingest_once(&self, events: &[IngestionEvent]) -> Result<(), TraceSinkError> {
        let url = format!("{}/api/public/ingestion", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.public_key, Some(&self.config.secret_key))
            .json(&IngestionBatch { batch: events })
            .send()
            .await?;

        let status = response.status();
        // 207 carries per-event results and still counts as accepted.
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TraceSinkError::Api {
                code: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    /// Upsert a score. Safe to call repeatedly with the same record.
    pub async fn put_score(&self, record: &ScoreRecord) -> Result<(), TraceSinkError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        Retry::spawn(retry_strategy, || self.put_score_once(record))
            .await
            .map_err(|e| {
                tracing::warn!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All score retry attempts failed"
                );
                TraceSinkError::RetryExhausted {
                    attempts: self.config.max_retries,
                }
            })
    }

    async fn put_score_once(&self, record: &ScoreRecord) -> Result<(), TraceSinkError> {
        let url = format!("{}/api/public/scores", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.public_key, Some(&self.config.secret_key))
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TraceSinkError::Api {
                code: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

// ============================================================================
// TraceRecorder
// ============================================================================

/// Metadata attached to the observation opened for one generation.
#[derive(Debug, Clone)]
pub struct ObservationMetadata {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub options: serde_json::Value,
}

/// The recorder the chat engine talks to. Wraps an optional sink client;
/// `None` is offline mode (credentials absent or tracing disabled), in which
/// identifiers are still generated so correlation keeps working within the
/// session.
#[derive(Clone)]
pub struct TraceRecorder {
    sink: Option<ObservationClient>,
}

impl TraceRecorder {
    pub fn new(sink: ObservationClient) -> Self {
        Self { sink: Some(sink) }
    }

    /// Recorder without a sink: trace ids are still issued, scores are
    /// skipped.
    pub fn offline() -> Self {
        Self { sink: None }
    }

    pub fn is_offline(&self) -> bool {
        self.sink.is_none()
    }

    /// Open an observation for one generation and return its trace id.
    ///
    /// The id is generated locally before any network call, so this always
    /// succeeds; an unreachable sink degrades to a diagnostic.
    pub async fn open(&self, meta: &ObservationMetadata) -> Uuid {
        let trace_id = Uuid::new_v4();

        if let Some(sink) = &self.sink {
            let events = [
                IngestionEvent::new(
                    "trace-create",
                    serde_json::json!({
                        "id": trace_id,
                        "name": "chat",
                        "input": meta.prompt,
                        "metadata": {
                            "provider": meta.provider,
                            "model": meta.model,
                            "options": meta.options,
                        },
                    }),
                ),
                IngestionEvent::new(
                    "generation-create",
                    serde_json::json!({
                        "id": trace_id,
                        "traceId": trace_id,
                        "name": "generation",
                        "model": meta.model,
                        "input": meta.prompt,
                        "metadata": meta.options,
                    }),
                ),
            ];

            if let Err(e) = sink.ingest(&events).await {
                tracing::warn!(
                    %trace_id,
                    error = %e,
                    "Trace sink unreachable — continuing with locally-generated trace id"
                );
            }
        }

        trace_id
    }

    /// Best-effort usage report for an open observation.
    pub async fn attach_usage(&self, trace_id: Uuid, usage: &TokenUsage) {
        let Some(sink) = &self.sink else { return };

        let event = IngestionEvent::new(
            "generation-update",
            serde_json::json!({
                "id": trace_id,
                "traceId": trace_id,
                "usage": {
                    "input": usage.input_tokens,
                    "output": usage.output_tokens,
                },
            }),
        );

        if let Err(e) = sink.ingest(std::slice::from_ref(&event)).await {
            tracing::warn!(%trace_id, error = %e, "Failed to attach usage to trace");
        }
    }

    /// Best-effort failure annotation for an open observation.
    pub async fn record_error(&self, trace_id: Uuid, message: &str) {
        let Some(sink) = &self.sink else { return };

        let event = IngestionEvent::new(
            "generation-update",
            serde_json::json!({
                "id": trace_id,
                "traceId": trace_id,
                "level": "ERROR",
                "statusMessage": message,
            }),
        );

        if let Err(e) = sink.ingest(std::slice::from_ref(&event)).await {
            tracing::warn!(%trace_id, error = %e, "Failed to annotate trace with error");
        }
    }

    /// Submit a quality score for a trace. Returns whether a score reached
    /// the sink; idempotent end-to-end because the score id derives from the
    /// trace id alone.
    pub async fn record_score(&self, trace_id: Uuid, value: u8, comment: &str) -> bool {
        let Some(sink) = &self.sink else {
            tracing::debug!(%trace_id, "No trace sink configured — score skipped");
            return false;
        };

        let record = ScoreRecord::helpfulness(trace_id, value, comment);

        match sink.put_score(&record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%trace_id, error = %e, "Failed to submit score");
                false
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_sink_config(base_url: &str) -> SinkConfig {
        SinkConfig {
            public_key: "pk-test".to_string(),
            secret_key: "sk-test".to_string(),
            base_url: base_url.to_string(),
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn test_meta() -> ObservationMetadata {
        ObservationMetadata {
            provider: "anthropic".to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            prompt: "hello".to_string(),
            options: serde_json::json!({}),
        }
    }

    #[test]
    fn test_score_id_is_deterministic() {
        let trace_id = Uuid::new_v4();
        assert_eq!(score_id_for(trace_id), score_id_for(trace_id));

        let other = Uuid::new_v4();
        assert_ne!(score_id_for(trace_id), score_id_for(other));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let config = SinkConfig {
            public_key: String::new(),
            secret_key: "sk".to_string(),
            base_url: "http://localhost".to_string(),
            max_retries: 1,
            retry_delay_ms: 10,
        };
        assert!(matches!(
            ObservationClient::new(config),
            Err(TraceSinkError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_open_posts_trace_and_generation_events() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/ingestion"))
            .respond_with(ResponseTemplate::new(207))
            .mount(&mock_server)
            .await;

        let client = ObservationClient::new(test_sink_config(&mock_server.uri())).unwrap();
        let recorder = TraceRecorder::new(client);

        let trace_id = recorder.open(&test_meta()).await;

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);

        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let batch = body["batch"].as_array().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["type"], "trace-create");
        assert_eq!(batch[0]["body"]["id"], trace_id.to_string());
        assert_eq!(batch[0]["body"]["input"], "hello");
        assert_eq!(batch[1]["type"], "generation-create");
        assert_eq!(batch[1]["body"]["traceId"], trace_id.to_string());
    }

    #[tokio::test]
    async fn test_open_returns_local_id_when_sink_unreachable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let client = ObservationClient::new(test_sink_config(&mock_server.uri())).unwrap();
        let recorder = TraceRecorder::new(client);

        // Must not fail: a locally-generated id keeps correlation working.
        let trace_id = recorder.open(&test_meta()).await;
        assert!(!trace_id.is_nil());
    }

    #[tokio::test]
    async fn test_record_score_reuses_derived_id() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/public/scores"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = ObservationClient::new(test_sink_config(&mock_server.uri())).unwrap();
        let recorder = TraceRecorder::new(client);
        let trace_id = Uuid::new_v4();

        assert!(recorder.record_score(trace_id, 1, "ok").await);
        assert!(recorder.record_score(trace_id, 1, "ok").await);

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);

        let first: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();

        // Same derived id both times — the sink upserts one record.
        assert_eq!(first["id"], second["id"]);
        assert_eq!(first["id"], score_id_for(trace_id).to_string());
        assert_eq!(first["traceId"], trace_id.to_string());
        assert_eq!(first["name"], "helpfulness");
        assert_eq!(first["value"], 1);
        assert_eq!(first["dataType"], "BOOLEAN");
    }

    #[tokio::test]
    async fn test_put_score_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/public/scores"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/public/scores"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = ObservationClient::new(test_sink_config(&mock_server.uri())).unwrap();
        let record = ScoreRecord::helpfulness(Uuid::new_v4(), 0, "User feedback");

        assert!(client.put_score(&record).await.is_ok());
    }

    #[tokio::test]
    async fn test_record_score_returns_false_when_sink_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let client = ObservationClient::new(test_sink_config(&mock_server.uri())).unwrap();
        let recorder = TraceRecorder::new(client);

        assert!(!recorder.record_score(Uuid::new_v4(), 1, "ok").await);
    }

    #[tokio::test]
    async fn test_offline_recorder_issues_ids_and_skips_scores() {
        let recorder = TraceRecorder::offline();

        let trace_id = recorder.open(&test_meta()).await;
        assert!(!trace_id.is_nil());

        assert!(!recorder.record_score(trace_id, 1, "ok").await);
    }
}
