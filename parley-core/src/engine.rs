//! Chat engine — invocation orchestration and feedback correction
//!
//! `submit` drives one prompt through the provider while bracketing the call
//! with explicit trace-recorder invocations (open, usage, error annotation),
//! then appends the user/assistant turn pair to the session transcript.
//! Provider failures are recovered here and rendered as assistant-turn text;
//! nothing propagates to the caller, so the transcript stays paired even on
//! failure.
//!
//! `feedback` resolves a turn index back to its trace id and converts the
//! user's thumbs up/down into an idempotent score submission.

use crate::models::{ConversationSession, Feedback, Turn};
use crate::providers::{ChatProvider, ProviderConfig, ProviderError, create_provider};
use crate::trace::{ObservationMetadata, TraceRecorder};

/// What happened to a feedback submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// Feedback stored on the turn; `scored` reports whether a score reached
    /// the sink.
    Recorded { scored: bool },
    /// The index referenced no live turn (e.g. after a session reset);
    /// nothing changed.
    StaleIndex,
}

/// One engine per configured provider, shared across sessions. Holds the
/// provider adapter and the trace recorder; per-conversation state lives in
/// the [`ConversationSession`] passed into each call.
pub struct ChatEngine {
    provider_name: String,
    model: String,
    options: serde_json::Value,
    provider: Box<dyn ChatProvider>,
    recorder: TraceRecorder,
}

impl ChatEngine {
    pub fn new(provider: Box<dyn ChatProvider>, recorder: TraceRecorder) -> Self {
        Self {
            provider_name: provider.name().to_string(),
            model: provider.model().to_string(),
            options: serde_json::json!({}),
            provider,
            recorder,
        }
    }

    /// Pass-through options echoed into trace metadata.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    /// Override the provider name used for sessions and trace metadata
    /// (defaults to the adapter's own name). Lets a host distinguish two
    /// configurations of the same provider kind.
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = name.into();
        self
    }

    /// Build the adapter from configuration and wrap it.
    pub fn from_config(
        config: ProviderConfig,
        recorder: TraceRecorder,
    ) -> Result<Self, ProviderError> {
        let options = config.options.clone();
        let provider = create_provider(config)?;
        Ok(Self::new(provider, recorder).with_options(options))
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn new_session(&self) -> ConversationSession {
        ConversationSession::new(&self.provider_name, &self.model)
    }

    /// Submit one prompt: append the user turn, generate, and append the
    /// assistant turn carrying the trace id. Returns the assistant text.
    ///
    /// Always appends exactly two turns and opens exactly one trace per
    /// non-empty prompt, whether generation succeeds or fails.
    pub async fn submit(&self, session: &mut ConversationSession, prompt: &str) -> String {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            // The UI contract filters empty input; treat it as a no-op.
            return String::new();
        }

        session.turns.append(Turn::user(prompt));

        let trace_id = self
            .recorder
            .open(&ObservationMetadata {
                provider: self.provider_name.clone(),
                model: self.model.clone(),
                prompt: prompt.to_string(),
                options: self.options.clone(),
            })
            .await;

        let reply = match self.provider.generate(prompt).await {
            Ok(completion) => {
                if let Some(usage) = &completion.usage {
                    self.recorder.attach_usage(trace_id, usage).await;
                }
                completion.text
            }
            Err(e) => {
                tracing::error!(
                    provider = %self.provider_name,
                    %trace_id,
                    error = %e,
                    "Generation failed — rendering error as assistant turn"
                );
                self.recorder.record_error(trace_id, &e.to_string()).await;
                format!("An error occurred: {e}")
            }
        };

        session
            .turns
            .append(Turn::assistant(reply.clone(), Some(trace_id)));

        reply
    }

    /// Record user feedback for the turn at `index` and submit the matching
    /// score.
    ///
    /// The raw value is normalized totally (nothing is rejected), a stale
    /// index is silently dropped, and a turn without a trace id keeps the
    /// feedback but skips scoring.
    pub async fn feedback(
        &self,
        session: &mut ConversationSession,
        index: usize,
        raw: &serde_json::Value,
    ) -> FeedbackOutcome {
        let value = Feedback::normalize(raw);

        let trace_id = match session.turns.get(index) {
            Ok(turn) => turn.trace_id,
            Err(_) => {
                tracing::debug!(index, "Feedback for unknown turn index dropped");
                return FeedbackOutcome::StaleIndex;
            }
        };

        if let Err(e) = session.turns.set_feedback(index, value) {
            // Strict-policy stores keep the first value; the original score
            // already stands.
            tracing::debug!(index, error = %e, "Feedback left unchanged");
            return FeedbackOutcome::Recorded { scored: false };
        }

        let scored = match trace_id {
            Some(id) => {
                self.recorder
                    .record_score(id, value.score_value(), "User feedback")
                    .await
            }
            None => {
                tracing::warn!(index, "Turn has no trace id — score skipped");
                false
            }
        };

        FeedbackOutcome::Recorded { scored }
    }
}

// ============================================================================
// TESTS
// ============================================================================
