//! Canned model turns for tests and demos.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ModelProvider, ModelTurn, TransportError, TurnEvent};
use crate::tools::{ToolOutcome, ToolParams};

#[derive(Clone, Debug)]
enum Step {
    Emit(TurnEvent),
    Delay(Duration),
    Fail(String),
}

/// One stretch of model output between two resume points.
///
/// A turn with no trailing `awaiting_results`/`end_turn` closes the stream
/// after its last step.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTurn {
    steps: Vec<Step>,
}

impl ScriptedTurn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk(mut self, text: impl Into<String>) -> Self {
        self.steps.push(Step::Emit(TurnEvent::chunk(text)));
        self
    }

    pub fn tool(mut self, id: impl Into<String>, params: ToolParams) -> Self {
        self.steps
            .push(Step::Emit(TurnEvent::tool_request(id, params)));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.steps.push(Step::Delay(delay));
        self
    }

    /// Breaks the connection at this point.
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.steps.push(Step::Fail(message.into()));
        self
    }

    pub fn awaiting_results(mut self) -> Self {
        self.steps.push(Step::Emit(TurnEvent::AwaitingResults));
        self
    }

    pub fn end_turn(mut self) -> Self {
        self.steps.push(Step::Emit(TurnEvent::EndTurn));
        self
    }
}

#[derive(Debug, Default)]
struct Recording {
    prompts: Vec<String>,
    continuations: Vec<Vec<ToolOutcome>>,
}

/// Replays the same script for every opened turn.
///
/// Prompts and the outcomes handed back on each continuation are recorded
/// for later inspection.
#[derive(Clone, Debug)]
pub struct ScriptedProvider {
    turns: Vec<ScriptedTurn>,
    recording: Arc<Mutex<Recording>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns,
            recording: Arc::default(),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.recording
            .lock()
            .map(|r| r.prompts.clone())
            .unwrap_or_default()
    }

    pub fn continuations(&self) -> Vec<Vec<ToolOutcome>> {
        self.recording
            .lock()
            .map(|r| r.continuations.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn open(&self, prompt: &str) -> Result<Box<dyn ModelTurn>, TransportError> {
        if let Ok(mut recording) = self.recording.lock() {
            recording.prompts.push(prompt.to_string());
        }
        let mut turns: VecDeque<ScriptedTurn> = self.turns.iter().cloned().collect();
        let current = turns
            .pop_front()
            .map(|t| t.steps.into_iter().collect())
            .unwrap_or_default();
        Ok(Box::new(ScriptedModelTurn {
            current,
            remaining: turns,
            recording: Arc::clone(&self.recording),
        }))
    }
}

struct ScriptedModelTurn {
    current: VecDeque<Step>,
    remaining: VecDeque<ScriptedTurn>,
    recording: Arc<Mutex<Recording>>,
}

#[async_trait]
impl ModelTurn for ScriptedModelTurn {
    async fn next_event(&mut self) -> Result<Option<TurnEvent>, TransportError> {
        while let Some(step) = self.current.pop_front() {
            match step {
                Step::Emit(event) => return Ok(Some(event)),
                Step::Delay(delay) => tokio::time::sleep(delay).await,
                Step::Fail(message) => return Err(TransportError::new(message)),
            }
        }
        Ok(None)
    }

    async fn continue_with(&mut self, outcomes: Vec<ToolOutcome>) -> Result<(), TransportError> {
        if let Ok(mut recording) = self.recording.lock() {
            recording.continuations.push(outcomes);
        }
        self.current = self
            .remaining
            .pop_front()
            .map(|t| t.steps.into_iter().collect())
            .unwrap_or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;

    #[tokio::test]
    async fn test_replays_turns_across_continuations() {
        let provider = ScriptedProvider::new(vec![
            ScriptedTurn::new()
                .chunk("a")
                .tool("c1", ToolParams::read("x"))
                .awaiting_results(),
            ScriptedTurn::new().chunk("b").end_turn(),
        ]);

        let mut turn = provider.open("hi").await.unwrap();
        assert_eq!(turn.next_event().await.unwrap(), Some(TurnEvent::chunk("a")));
        assert!(matches!(
            turn.next_event().await.unwrap(),
            Some(TurnEvent::ToolRequest { .. })
        ));
        assert_eq!(
            turn.next_event().await.unwrap(),
            Some(TurnEvent::AwaitingResults)
        );
        assert_eq!(turn.next_event().await.unwrap(), None);

        turn.continue_with(vec![ToolOutcome::completed("c1", ToolResult::Empty)])
            .await
            .unwrap();
        assert_eq!(turn.next_event().await.unwrap(), Some(TurnEvent::chunk("b")));
        assert_eq!(turn.next_event().await.unwrap(), Some(TurnEvent::EndTurn));

        assert_eq!(provider.prompts(), vec!["hi".to_string()]);
        assert_eq!(provider.continuations().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_step() {
        let provider = ScriptedProvider::new(vec![ScriptedTurn::new().chunk("a").fail("reset")]);
        let mut turn = provider.open("hi").await.unwrap();
        turn.next_event().await.unwrap();
        let err = turn.next_event().await.unwrap_err();
        assert_eq!(err.to_string(), "reset");
    }
}
