//! Orchestrator event types

use bolus_ai::Message;
use serde::{Deserialize, Serialize};

use crate::orchestrator::Stage;

/// Events emitted while a turn runs. Every event names its thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A user message arrived
    TurnStart { thread_id: String },

    /// The state machine moved to a stage
    StageEntered { thread_id: String, stage: Stage },

    /// Tool execution started
    ToolExecutionStart {
        thread_id: String,
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        thread_id: String,
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
        cached: bool,
    },

    /// A message was added to the thread's history
    MessageAppended { thread_id: String, message: Message },

    /// Mode, factors and result were cleared after a completed cycle
    CycleReset { thread_id: String },

    /// The turn returned control to the caller
    TurnEnd { thread_id: String, outcome: String },

    /// The turn failed
    Error { thread_id: String, message: String },
}

impl OrchestratorEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorEvent::TurnEnd { .. } | OrchestratorEvent::Error { .. }
        )
    }

    pub fn thread_id(&self) -> &str {
        match self {
            OrchestratorEvent::TurnStart { thread_id }
            | OrchestratorEvent::StageEntered { thread_id, .. }
            | OrchestratorEvent::ToolExecutionStart { thread_id, .. }
            | OrchestratorEvent::ToolExecutionEnd { thread_id, .. }
            | OrchestratorEvent::MessageAppended { thread_id, .. }
            | OrchestratorEvent::CycleReset { thread_id }
            | OrchestratorEvent::TurnEnd { thread_id, .. }
            | OrchestratorEvent::Error { thread_id, .. } => thread_id,
        }
    }
}
