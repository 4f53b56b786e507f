//! Session registry — explicit ownership of per-conversation state.
//!
//! Engines are built once from configuration, one per `[providers.*]` entry.
//! Sessions are keyed by a client-supplied session key and wrap their
//! transcript in a `Mutex`, so UI events within one session are serialized
//! while independent sessions proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parley_core::engine::{ChatEngine, FeedbackOutcome};
use parley_core::models::ConversationSession;
use parley_core::trace::{ObservationClient, TraceRecorder};
use parley_core::ParleyConfig;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Result of a submit through the registry.
#[derive(Debug, Clone)]
pub struct SubmitReply {
    pub reply: String,
    pub turn_index: usize,
    pub trace_id: Option<Uuid>,
}

/// Result of a feedback submission through the registry.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackReply {
    pub recorded: bool,
    pub scored: bool,
}

struct SessionSlot {
    provider: String,
    session: Mutex<ConversationSession>,
}

pub struct SessionRegistry {
    engines: HashMap<String, Arc<ChatEngine>>,
    default_provider: String,
    sink_configured: bool,
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionRegistry {
    /// Registry over pre-built engines (used directly by tests).
    pub fn new(
        engines: HashMap<String, Arc<ChatEngine>>,
        default_provider: impl Into<String>,
        sink_configured: bool,
    ) -> Self {
        Self {
            engines,
            default_provider: default_provider.into(),
            sink_configured,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Build engines from configuration. Providers with unusable credentials
    /// are skipped with a warning rather than failing startup, so one bad
    /// key does not take down the rest.
    pub fn from_config(config: &ParleyConfig) -> Self {
        let (recorder, sink_configured) = match config.trace.sink_config() {
            Some(sink_config) => match ObservationClient::new(sink_config) {
                Ok(client) => (TraceRecorder::new(client), true),
                Err(e) => {
                    tracing::warn!(error = %e, "Trace sink disabled — recording locally only");
                    (TraceRecorder::offline(), false)
                }
            },
            None => (TraceRecorder::offline(), false),
        };

        let mut engines = HashMap::new();
        for (name, settings) in &config.providers {
            match ChatEngine::from_config(settings.resolve(), recorder.clone()) {
                Ok(engine) => {
                    let engine = engine.with_provider_name(name.clone());
                    tracing::info!(provider = %name, model = %engine.model(), "Provider ready");
                    engines.insert(name.clone(), Arc::new(engine));
                }
                Err(e) => {
                    tracing::warn!(provider = %name, error = %e, "Provider skipped");
                }
            }
        }

        Self::new(engines, config.chat.default_provider.clone(), sink_configured)
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn sink_configured(&self) -> bool {
        self.sink_configured
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    fn engine(&self, provider: &str) -> Result<&Arc<ChatEngine>, RegistryError> {
        self.engines
            .get(provider)
            .ok_or_else(|| RegistryError::UnknownProvider(provider.to_string()))
    }

    /// Submit a prompt for the given session, creating the session on first
    /// use. An explicit provider fixes the engine at creation; afterwards
    /// the session stays bound to it.
    pub async fn submit(
        &self,
        session_key: &str,
        provider: Option<&str>,
        prompt: &str,
    ) -> Result<SubmitReply, RegistryError> {
        let requested = provider.unwrap_or(&self.default_provider);

        let slot = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(session_key) {
                Some(slot) => slot.clone(),
                None => {
                    let engine = self.engine(requested)?;
                    let slot = Arc::new(SessionSlot {
                        provider: requested.to_string(),
                        session: Mutex::new(engine.new_session()),
                    });
                    sessions.insert(session_key.to_string(), slot.clone());
                    slot
                }
            }
        };

        let engine = self.engine(&slot.provider)?;
        let mut session = slot.session.lock().await;
        let reply = engine.submit(&mut session, prompt).await;

        let turn_index = session.turns.last_assistant_index().unwrap_or_default();
        let trace_id = session
            .turns
            .get(turn_index)
            .ok()
            .and_then(|turn| turn.trace_id);

        Ok(SubmitReply {
            reply,
            turn_index,
            trace_id,
        })
    }

    /// Record feedback for a turn. Unknown sessions and stale indices are
    /// reported as `recorded: false`, never as errors.
    pub async fn feedback(
        &self,
        session_key: &str,
        turn: usize,
        value: &serde_json::Value,
    ) -> FeedbackReply {
        let slot = { self.sessions.read().await.get(session_key).cloned() };

        let Some(slot) = slot else {
            tracing::debug!(session = %session_key, "Feedback for unknown session dropped");
            return FeedbackReply {
                recorded: false,
                scored: false,
            };
        };

        let Ok(engine) = self.engine(&slot.provider) else {
            return FeedbackReply {
                recorded: false,
                scored: false,
            };
        };

        let mut session = slot.session.lock().await;
        match engine.feedback(&mut session, turn, value).await {
            FeedbackOutcome::Recorded { scored } => FeedbackReply {
                recorded: true,
                scored,
            },
            FeedbackOutcome::StaleIndex => FeedbackReply {
                recorded: false,
                scored: false,
            },
        }
    }

    /// Snapshot of a session's transcript, if the session exists.
    pub async fn history(&self, session_key: &str) -> Option<ConversationSession> {
        let slot = { self.sessions.read().await.get(session_key).cloned() };
        match slot {
            Some(slot) => Some(slot.session.lock().await.clone()),
            None => None,
        }
    }

    /// Drop a session and its transcript. Returns whether one existed.
    pub async fn reset(&self, session_key: &str) -> bool {
        self.sessions.write().await.remove(session_key).is_some()
    }
}
