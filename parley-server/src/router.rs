use crate::sessions::SessionRegistry;
use parley_core::ipc::{ChatRequest, ChatResponse};

pub async fn handle_request(request: ChatRequest, registry: &SessionRegistry) -> ChatResponse {
    match request {
        ChatRequest::Ping => ChatResponse::pong(),
        ChatRequest::Health => ChatResponse::ok(serde_json::json!({
            "providers": registry.provider_names(),
            "default_provider": registry.default_provider(),
            "trace_sink": registry.sink_configured(),
            "sessions": registry.session_count().await,
            "status": "healthy"
        })),
        ChatRequest::Submit {
            session,
            provider,
            prompt,
        } => {
            if prompt.trim().is_empty() {
                return ChatResponse::err("Empty prompt");
            }
            match registry.submit(&session, provider.as_deref(), &prompt).await {
                Ok(reply) => ChatResponse::ok(serde_json::json!({
                    "reply": reply.reply,
                    "turn_index": reply.turn_index,
                    "trace_id": reply.trace_id,
                })),
                Err(e) => ChatResponse::err(e.to_string()),
            }
        }
        ChatRequest::Feedback {
            session,
            turn,
            value,
        } => {
            let reply = registry.feedback(&session, turn, &value).await;
            ChatResponse::ok(serde_json::json!({
                "recorded": reply.recorded,
                "scored": reply.scored,
            }))
        }
        ChatRequest::History { session } => match registry.history(&session).await {
            Some(conversation) => ChatResponse::ok(serde_json::json!({
                "session": session,
                "provider": conversation.provider,
                "model": conversation.model,
                "turns": conversation.turns.iter().collect::<Vec<_>>(),
            })),
            None => ChatResponse::ok(serde_json::json!({
                "session": session,
                "turns": [],
            })),
        },
        ChatRequest::Reset { session } => {
            let reset = registry.reset(&session).await;
            ChatResponse::ok(serde_json::json!({ "reset": reset }))
        }
    }
}
