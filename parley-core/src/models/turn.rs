use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Binary quality judgment a user attaches to an assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Up,
    Down,
}

impl Feedback {
    /// Total mapping from whatever the front-end sends. `"up"`, `"1"`, `1`
    /// and `true` mean positive; every other value (including unrecognized
    /// ones) maps to negative rather than failing.
    pub fn normalize(raw: &serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Bool(true) => Feedback::Up,
            serde_json::Value::Number(n) if n.as_i64() == Some(1) => Feedback::Up,
            serde_json::Value::String(s) => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("up") || s == "1" {
                    Feedback::Up
                } else {
                    Feedback::Down
                }
            }
            _ => Feedback::Down,
        }
    }

    /// Score value submitted to the trace sink: up = 1, down = 0.
    pub fn score_value(self) -> u8 {
        match self {
            Feedback::Up => 1,
            Feedback::Down => 0,
        }
    }
}

/// One message in a conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Set only on assistant turns, once the trace recorder has opened an
    /// observation for the generation that produced them. Never rewritten.
    pub trace_id: Option<Uuid>,
    pub feedback: Option<Feedback>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            trace_id: None,
            feedback: None,
        }
    }

    pub fn assistant(content: impl Into<String>, trace_id: Option<Uuid>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            trace_id,
            feedback: None,
        }
    }
}
