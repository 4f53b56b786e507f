use serde::{Deserialize, Serialize};

/// Token accounting as reported by a provider. Either side may be absent —
/// not every provider reports usage, and some report only one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}
