//! bolus-agent: conversation orchestration for insulin dosing advice
//!
//! A resumable per-thread state machine that classifies intent, gathers
//! missing facts with a nutrition tool loop, extracts dosing coefficients,
//! computes a dose once per cycle, explains it, and resets.

pub mod calculator;
pub mod checkpoint;
pub mod error;
pub mod events;
pub mod health;
pub mod nutrition;
pub mod orchestrator;
pub mod reasoner;
pub mod stages;
pub mod state;
pub mod tool;

pub use calculator::{ClinicalProfile, Coefficients, DoseHistoryRecord, DoseResult};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use error::{Error, Result};
pub use events::OrchestratorEvent;
pub use health::{HealthContext, HealthData, StaticHealthData};
pub use nutrition::{NutritionFacts, NutritionLookup, NutritionSource, NutritionTable};
pub use orchestrator::{Orchestrator, OrchestratorConfig, Stage, TurnOutcome};
pub use reasoner::{ProviderReasoner, Reasoner, Reply};
pub use state::{CalculationOutcome, ConversationState, DialogueMode, Intent};
pub use tool::{Tool, ToolGateway, ToolResult};
