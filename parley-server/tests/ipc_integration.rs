//! IPC dispatch tests for the Parley request router
//!
//! Exercises `router::handle_request` directly against stub engines, plus
//! the MessagePack wire encoding of the request/response envelope.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::engine::ChatEngine;
use parley_core::ipc::{ChatRequest, ChatResponse};
use parley_core::providers::{ChatProvider, Completion, ProviderError};
use parley_core::trace::TraceRecorder;
use serde_json::json;

use parley_server::router::handle_request;
use parley_server::sessions::SessionRegistry;

struct StubProvider;

#[async_trait]
impl ChatProvider for StubProvider {
    async fn generate(&self, prompt: &str) -> Result<Completion, ProviderError> {
        Ok(Completion {
            text: format!("echo: {prompt}"),
            usage: None,
        })
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    fn name(&self) -> &str {
        "stub"
    }
}

fn make_registry() -> SessionRegistry {
    let mut engines = HashMap::new();
    engines.insert(
        "stub".to_string(),
        Arc::new(
            ChatEngine::new(Box::new(StubProvider), TraceRecorder::offline())
                .with_provider_name("stub"),
        ),
    );
    SessionRegistry::new(engines, "stub", false)
}

#[tokio::test]
async fn test_ping_pongs() {
    let registry = make_registry();

    let response = handle_request(ChatRequest::Ping, &registry).await;

    assert_eq!(response.status, "ok");
    assert_eq!(response.data.unwrap()["pong"], true);
}

#[tokio::test]
async fn test_health_reports_status() {
    let registry = make_registry();

    let response = handle_request(ChatRequest::Health, &registry).await;

    assert_eq!(response.status, "ok");
    let data = response.data.unwrap();
    assert_eq!(data["status"], "healthy");
    assert_eq!(data["default_provider"], "stub");
}

#[tokio::test]
async fn test_submit_then_history() {
    let registry = make_registry();

    let response = handle_request(
        ChatRequest::Submit {
            session: "ipc-1".to_string(),
            provider: None,
            prompt: "hello".to_string(),
        },
        &registry,
    )
    .await;

    assert_eq!(response.status, "ok");
    let data = response.data.unwrap();
    assert_eq!(data["reply"], "echo: hello");
    assert_eq!(data["turn_index"], 1);

    let response = handle_request(
        ChatRequest::History {
            session: "ipc-1".to_string(),
        },
        &registry,
    )
    .await;

    let data = response.data.unwrap();
    assert_eq!(data["turns"].as_array().unwrap().len(), 2);
    assert_eq!(data["provider"], "stub");
}

#[tokio::test]
async fn test_submit_empty_prompt_is_rejected() {
    let registry = make_registry();

    let response = handle_request(
        ChatRequest::Submit {
            session: "ipc-1".to_string(),
            provider: None,
            prompt: "  ".to_string(),
        },
        &registry,
    )
    .await;

    assert_eq!(response.status, "error");
    assert!(response.error.is_some());
}

#[tokio::test]
async fn test_feedback_stale_session_is_ok_but_unrecorded() {
    let registry = make_registry();

    let response = handle_request(
        ChatRequest::Feedback {
            session: "ghost".to_string(),
            turn: 0,
            value: json!("up"),
        },
        &registry,
    )
    .await;

    assert_eq!(response.status, "ok");
    assert_eq!(response.data.unwrap()["recorded"], false);
}

#[tokio::test]
async fn test_feedback_roundtrip_marks_turn() {
    let registry = make_registry();

    handle_request(
        ChatRequest::Submit {
            session: "ipc-1".to_string(),
            provider: None,
            prompt: "hello".to_string(),
        },
        &registry,
    )
    .await;

    let response = handle_request(
        ChatRequest::Feedback {
            session: "ipc-1".to_string(),
            turn: 1,
            value: json!(1),
        },
        &registry,
    )
    .await;
    assert_eq!(response.data.unwrap()["recorded"], true);

    let response = handle_request(
        ChatRequest::History {
            session: "ipc-1".to_string(),
        },
        &registry,
    )
    .await;
    let data = response.data.unwrap();
    assert_eq!(data["turns"][1]["feedback"], "up");
}

#[tokio::test]
async fn test_reset_clears_session() {
    let registry = make_registry();

    handle_request(
        ChatRequest::Submit {
            session: "ipc-1".to_string(),
            provider: None,
            prompt: "hello".to_string(),
        },
        &registry,
    )
    .await;

    let response = handle_request(
        ChatRequest::Reset {
            session: "ipc-1".to_string(),
        },
        &registry,
    )
    .await;
    assert_eq!(response.data.unwrap()["reset"], true);

    // Feedback after the reset targets a stale turn and is dropped.
    let response = handle_request(
        ChatRequest::Feedback {
            session: "ipc-1".to_string(),
            turn: 1,
            value: json!("down"),
        },
        &registry,
    )
    .await;
    assert_eq!(response.data.unwrap()["recorded"], false);
}

#[test]
fn test_request_envelope_roundtrips_through_messagepack() {
    let request = ChatRequest::Submit {
        session: "wire".to_string(),
        provider: Some("stub".to_string()),
        prompt: "hello".to_string(),
    };

    let bytes = rmp_serde::to_vec_named(&request).unwrap();
    let decoded: ChatRequest = rmp_serde::from_slice(&bytes).unwrap();

    match decoded {
        ChatRequest::Submit {
            session,
            provider,
            prompt,
        } => {
            assert_eq!(session, "wire");
            assert_eq!(provider.as_deref(), Some("stub"));
            assert_eq!(prompt, "hello");
        }
        other => panic!("decoded to the wrong variant: {other:?}"),
    }

    let response = ChatResponse::ok(json!({"reply": "hi"}));
    let bytes = rmp_serde::to_vec_named(&response).unwrap();
    let decoded: ChatResponse = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(decoded.status, "ok");
    assert_eq!(decoded.data.unwrap()["reply"], "hi");
}
