pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod models;
pub mod providers;
pub mod store;
pub mod trace;

pub use config::ParleyConfig;
pub use engine::{ChatEngine, FeedbackOutcome};
pub use error::ParleyError;
pub use models::{ConversationSession, Feedback, Role, TokenUsage, Turn};
pub use providers::{
    create_provider, AnthropicChatClient, ChatProvider, Completion, GeminiChatClient,
    OpenAiChatClient, ProviderConfig, ProviderError, ProviderKind, DEFAULT_MAX_TOKENS,
};
pub use store::{FeedbackPolicy, StoreError, TurnStore};
pub use trace::{
    score_id_for, ObservationClient, ObservationMetadata, ScoreRecord, SinkConfig, TraceRecorder,
    TraceSinkError, HELPFULNESS,
};
