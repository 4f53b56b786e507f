//! Append-only per-session transcript store.
//!
//! Turn indices are dense, zero-based, and assigned in append order; they are
//! stable for the lifetime of the session (no reordering, no deletion) and
//! serve as the external handle for feedback correlation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Feedback, Role, Turn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no turn at index {0}")]
    NotFound(usize),

    #[error("feedback for turn {index} already set to {current:?}")]
    AlreadyTerminal { index: usize, current: Feedback },
}

/// How `set_feedback` treats a turn whose feedback is already set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackPolicy {
    /// Overwrite silently; resubmitting the same value is a no-op.
    #[default]
    Overwrite,
    /// Refuse to change a value once set. Resubmitting the same value still
    /// succeeds, so idempotent re-delivery never errors.
    Strict,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnStore {
    turns: Vec<Turn>,
    #[serde(default)]
    policy: FeedbackPolicy,
}

impl TurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: FeedbackPolicy) -> Self {
        Self {
            turns: Vec::new(),
            policy,
        }
    }

    /// Appends the turn and returns its index.
    pub fn append(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    pub fn get(&self, index: usize) -> Result<&Turn, StoreError> {
        self.turns.get(index).ok_or(StoreError::NotFound(index))
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Index of the most recent assistant turn, if any.
    pub fn last_assistant_index(&self) -> Option<usize> {
        self.turns.iter().rposition(|t| t.role == Role::Assistant)
    }

    pub fn set_feedback(&mut self, index: usize, value: Feedback) -> Result<(), StoreError> {
        let turn = self
            .turns
            .get_mut(index)
            .ok_or(StoreError::NotFound(index))?;

        if let Some(current) = turn.feedback {
            if self.policy == FeedbackPolicy::Strict && current != value {
                return Err(StoreError::AlreadyTerminal { index, current });
            }
        }

        turn.feedback = Some(value);
        Ok(())
    }
}
