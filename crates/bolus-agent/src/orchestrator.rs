//! The per-thread state machine that sequences stages, tools and checkpoints.

use bolus_ai::{Message, ToolCall};
use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::calculator::{ClinicalProfile, DoseResult};
use crate::checkpoint::{validate_thread_id, CheckpointStore};
use crate::error::Result;
use crate::events::OrchestratorEvent;
use crate::health::{self, HealthData};
use crate::nutrition::{NutritionLookup, NutritionSource};
use crate::reasoner::Reasoner;
use crate::stages::{self, GatherDecision};
use crate::state::{CalculationOutcome, ConversationState, DialogueMode};
use crate::tool::{NutritionDetails, ToolGateway, ToolResult, LOOKUP_NUTRITION};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Per-person dosing constants
    pub profile: ClinicalProfile,
    /// Tool rounds allowed per turn before the gatherer must talk to the person
    pub max_tool_rounds: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            profile: ClinicalProfile::default(),
            max_tool_rounds: 5,
        }
    }
}

/// States a turn moves through. Idle is the absence of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classifying,
    Gathering,
    GatheringToolWait,
    ExtractingFactors,
    Calculating,
    Composing,
}

/// Where a new message enters the machine.
pub fn entry_stage(mode: DialogueMode) -> Stage {
    match mode {
        DialogueMode::Unset => Stage::Classifying,
        DialogueMode::Meal | DialogueMode::Correction => Stage::Gathering,
        DialogueMode::Query => Stage::Composing,
    }
}

enum Step {
    Next(Stage),
    Yield(TurnOutcome),
}

/// What a turn hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The intent was not recognized. Nothing was saved; re-prompt.
    Unclassified,
    /// Suspended in Gathering, waiting for the person's next message.
    AwaitingInput { question: Option<String> },
    /// A cycle finished and was reset.
    Completed {
        reply: String,
        dose: Option<DoseResult>,
    },
}

impl TurnOutcome {
    /// The assistant-visible text of the turn, if any.
    pub fn assistant_text(&self) -> Option<&str> {
        match self {
            TurnOutcome::Unclassified => None,
            TurnOutcome::AwaitingInput { question } => question.as_deref(),
            TurnOutcome::Completed { reply, .. } => Some(reply),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TurnOutcome::Unclassified => "unclassified",
            TurnOutcome::AwaitingInput { .. } => "awaiting_input",
            TurnOutcome::Completed { .. } => "completed",
        }
    }
}

/// Text used in place of a dose when no coefficients exist at Calculating.
pub const NO_COEFFICIENTS: &str =
    "Insulin could not be calculated because no coefficients were available.";

fn local_now() -> DateTime<FixedOffset> {
    chrono::Local::now().fixed_offset()
}

/// Runs turns for any number of threads. Turns on the same thread are serialized.
pub struct Orchestrator {
    config: OrchestratorConfig,
    reasoner: Arc<dyn Reasoner>,
    health: Arc<dyn HealthData>,
    checkpoints: Arc<dyn CheckpointStore>,
    gateway: ToolGateway,
    event_tx: broadcast::Sender<OrchestratorEvent>,
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    clock: fn() -> DateTime<FixedOffset>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        reasoner: Arc<dyn Reasoner>,
        nutrition: Arc<dyn NutritionSource>,
        health: Arc<dyn HealthData>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let gateway = ToolGateway::new(nutrition, config.profile.clone());
        Self {
            config,
            reasoner,
            health,
            checkpoints,
            gateway,
            event_tx,
            turn_locks: Mutex::new(HashMap::new()),
            clock: local_now,
        }
    }

    /// Replace the wall clock used for the extractor's time of day.
    pub fn with_clock(mut self, clock: fn() -> DateTime<FixedOffset>) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribe to orchestrator events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Current persisted state of a thread.
    pub async fn thread_state(&self, thread_id: &str) -> Result<ConversationState> {
        self.checkpoints.load(thread_id).await
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    fn thread_lock(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.turn_locks
            .lock()
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }

    fn release_thread_lock(&self, thread_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.turn_locks.lock();
        // Only the map and `lock` hold it: nobody is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(thread_id);
        }
    }

    /// Run one inbound message to its suspension point.
    ///
    /// Errors leave the checkpoint at the last state saved during the turn.
    pub async fn submit_message(&self, thread_id: &str, text: &str) -> Result<TurnOutcome> {
        validate_thread_id(thread_id)?;
        let lock = self.thread_lock(thread_id);
        let result = {
            let _turn = lock.lock().await;
            self.emit(OrchestratorEvent::TurnStart {
                thread_id: thread_id.to_string(),
            });
            self.run_turn(thread_id, text).await
        };
        self.release_thread_lock(thread_id, lock);

        match &result {
            Ok(outcome) => {
                tracing::debug!(thread_id, outcome = outcome.label(), "turn finished");
                self.emit(OrchestratorEvent::TurnEnd {
                    thread_id: thread_id.to_string(),
                    outcome: outcome.label().to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "turn failed");
                self.emit(OrchestratorEvent::Error {
                    thread_id: thread_id.to_string(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_turn(&self, thread_id: &str, text: &str) -> Result<TurnOutcome> {
        let mut state = self.checkpoints.load(thread_id).await?;
        state.normalize();
        state.push(Message::user(text));

        let mut stage = entry_stage(state.dialogue_mode());
        let mut tool_rounds = 0;
        loop {
            tracing::debug!(thread_id, ?stage, "entering stage");
            self.emit(OrchestratorEvent::StageEntered {
                thread_id: thread_id.to_string(),
                stage,
            });

            let step = match stage {
                Stage::Classifying => self.classify(&mut state).await?,
                Stage::Gathering => self.gather(thread_id, &mut state).await?,
                Stage::GatheringToolWait => {
                    self.resolve_tools(thread_id, &mut state, &mut tool_rounds)
                        .await?
                }
                Stage::ExtractingFactors => self.extract(&mut state).await?,
                Stage::Calculating => self.calculate(&mut state),
                Stage::Composing => self.compose(thread_id, &mut state).await?,
            };

            match step {
                Step::Next(next) => stage = next,
                Step::Yield(outcome) => return Ok(outcome),
            }
        }
    }

    fn append(&self, thread_id: &str, state: &mut ConversationState, message: Message) {
        self.emit(OrchestratorEvent::MessageAppended {
            thread_id: thread_id.to_string(),
            message: message.clone(),
        });
        state.push(message);
    }

    async fn classify(&self, state: &mut ConversationState) -> Result<Step> {
        let Some(latest) = state.last_user_message() else {
            return Ok(Step::Yield(TurnOutcome::Unclassified));
        };
        let intent = stages::classify(self.reasoner.as_ref(), latest).await?;
        match intent {
            Some(intent) => {
                let mode = DialogueMode::from(intent);
                state.set_mode(mode);
                Ok(Step::Next(match mode {
                    DialogueMode::Query => Stage::Composing,
                    _ => Stage::Gathering,
                }))
            }
            None => Ok(Step::Yield(TurnOutcome::Unclassified)),
        }
    }

    async fn gather(&self, thread_id: &str, state: &mut ConversationState) -> Result<Step> {
        let tools = self.gateway.gatherer_tools();
        let reply = stages::gather(self.reasoner.as_ref(), state.history(), &tools).await?;
        let decision = stages::decide(&reply);
        let question = reply.text();
        self.append(thread_id, state, reply);

        match decision {
            GatherDecision::ToolCalls(_) => Ok(Step::Next(Stage::GatheringToolWait)),
            GatherDecision::Complete => {
                self.checkpoints.save(thread_id, state).await?;
                Ok(Step::Next(Stage::ExtractingFactors))
            }
            GatherDecision::AwaitUser => {
                self.checkpoints.save(thread_id, state).await?;
                let question = question.trim();
                Ok(Step::Yield(TurnOutcome::AwaitingInput {
                    question: (!question.is_empty()).then(|| question.to_string()),
                }))
            }
        }
    }

    async fn resolve_tools(
        &self,
        thread_id: &str,
        state: &mut ConversationState,
        tool_rounds: &mut usize,
    ) -> Result<Step> {
        let calls = state
            .last_message()
            .map(Message::tool_calls)
            .unwrap_or_default();

        if *tool_rounds >= self.config.max_tool_rounds {
            tracing::warn!(
                thread_id,
                rounds = *tool_rounds,
                "tool round limit reached, waiting for the person"
            );
            for call in &calls {
                let result = ToolResult::error(
                    "Tool limit reached for this message. Ask the person instead.",
                );
                self.append(
                    thread_id,
                    state,
                    Message::tool_result(&call.id, &call.name, result.content, true),
                );
            }
            self.checkpoints.save(thread_id, state).await?;
            return Ok(Step::Yield(TurnOutcome::AwaitingInput { question: None }));
        }
        *tool_rounds += 1;

        for call in calls {
            self.emit(OrchestratorEvent::ToolExecutionStart {
                thread_id: thread_id.to_string(),
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let (result, cached) = match cached_lookup(state, &call) {
                Some(result) => (result, true),
                None => (self.gateway.execute(&call).await, false),
            };
            if result.is_error {
                tracing::warn!(tool = %call.name, error = %result.text_content(), "tool failed");
            } else if !cached {
                remember_lookup(state, &result);
            }

            self.emit(OrchestratorEvent::ToolExecutionEnd {
                thread_id: thread_id.to_string(),
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result: result.text_content(),
                is_error: result.is_error,
                cached,
            });
            self.append(
                thread_id,
                state,
                Message::tool_result(call.id, call.name, result.content, result.is_error),
            );
        }
        Ok(Step::Next(Stage::Gathering))
    }

    async fn extract(&self, state: &mut ConversationState) -> Result<Step> {
        let context =
            health::prepare_context(self.health.as_ref(), &self.config.profile, (self.clock)())
                .await?;
        let coefficients =
            stages::extract(self.reasoner.as_ref(), state.history(), &context).await?;
        state.set_factors(coefficients);
        Ok(Step::Next(Stage::Calculating))
    }

    fn calculate(&self, state: &mut ConversationState) -> Step {
        let outcome = match state.factors() {
            Some(coefficients) => CalculationOutcome::Dose(self.gateway.compute_dose(coefficients)),
            None => {
                tracing::warn!("no coefficients at calculation");
                CalculationOutcome::Unavailable {
                    reason: NO_COEFFICIENTS.to_string(),
                }
            }
        };
        state.set_calculation_result(outcome);
        Step::Next(Stage::Composing)
    }

    async fn compose(&self, thread_id: &str, state: &mut ConversationState) -> Result<Step> {
        let (reply, dose) = match state.dialogue_mode() {
            DialogueMode::Meal | DialogueMode::Correction => {
                let outcome = state.calculation_result().cloned().unwrap_or_else(|| {
                    CalculationOutcome::Unavailable {
                        reason: NO_COEFFICIENTS.to_string(),
                    }
                });
                let reply = stages::compose_dose(
                    self.reasoner.as_ref(),
                    state.history(),
                    state.factors(),
                    &outcome,
                )
                .await?;
                (reply, outcome.dose().cloned())
            }
            DialogueMode::Query | DialogueMode::Unset => {
                (stages::compose_query(self.reasoner.as_ref(), state.history()).await?, None)
            }
        };

        self.append(thread_id, state, Message::assistant(reply.clone()));
        state.reset_cycle();
        self.emit(OrchestratorEvent::CycleReset {
            thread_id: thread_id.to_string(),
        });
        self.checkpoints.save(thread_id, state).await?;

        if let Some(dose) = &dose {
            tracing::info!(
                thread_id,
                base = dose.base_bolus,
                recommended = dose.final_bolus,
                "dose cycle complete"
            );
        } else {
            tracing::info!(thread_id, "cycle complete");
        }
        Ok(Step::Yield(TurnOutcome::Completed { reply, dose }))
    }
}

fn lookup_query(call: &ToolCall) -> Option<&str> {
    if call.name != LOOKUP_NUTRITION {
        return None;
    }
    call.arguments.get("query").and_then(|q| q.as_str())
}

fn cached_lookup(state: &ConversationState, call: &ToolCall) -> Option<ToolResult> {
    let facts = state.cached_nutrition(lookup_query(call)?)?;
    Some(ToolResult::text(
        NutritionLookup::Found(facts.to_vec()).render(),
    ))
}

fn remember_lookup(state: &mut ConversationState, result: &ToolResult) {
    let Some(details) = result
        .details
        .clone()
        .and_then(|d| serde_json::from_value::<NutritionDetails>(d).ok())
    else {
        return;
    };
    if !details.matches.is_empty() {
        state.cache_nutrition(&details.query, details.matches);
    }
}
