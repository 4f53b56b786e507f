use serde::{Deserialize, Serialize};

use crate::store::TurnStore;

/// In-memory state of one provider-bound conversation. Created on first
/// interaction, dropped on reset or process exit; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub provider: String,
    pub model: String,
    pub turns: TurnStore,
}

impl ConversationSession {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            turns: TurnStore::new(),
        }
    }
}
