//! Model turn abstraction consumed by the run loop.
//!
//! A provider opens one [`ModelTurn`] per run. The turn yields [`TurnEvent`]s
//! until it either asks for tool results ([`TurnEvent::AwaitingResults`]) or
//! finishes ([`TurnEvent::EndTurn`]). After results are handed back with
//! [`ModelTurn::continue_with`], it streams again.

mod scripted;

pub use scripted::{ScriptedProvider, ScriptedTurn};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tools::{ToolOutcome, ToolParams};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TurnEvent {
    Chunk(String),
    ToolRequest { id: String, params: ToolParams },
    AwaitingResults,
    EndTurn,
}

impl TurnEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk(text.into())
    }

    pub fn tool_request(id: impl Into<String>, params: ToolParams) -> Self {
        Self::ToolRequest {
            id: id.into(),
            params,
        }
    }
}

/// The streaming connection to the model broke.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<TransportError> for crate::Error {
    fn from(err: TransportError) -> Self {
        crate::Error::Transport(err.message)
    }
}

/// One open turn of the model.
#[async_trait]
pub trait ModelTurn: Send {
    /// Next event, or `None` once the stream has closed.
    async fn next_event(&mut self) -> Result<Option<TurnEvent>, TransportError>;

    /// Hands back the outcomes of the calls requested since the last resume.
    async fn continue_with(&mut self, outcomes: Vec<ToolOutcome>) -> Result<(), TransportError>;
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn open(&self, prompt: &str) -> Result<Box<dyn ModelTurn>, TransportError>;
}
