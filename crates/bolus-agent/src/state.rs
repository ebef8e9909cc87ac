//! Per-thread conversation state, the unit the checkpoint store persists.

use bolus_ai::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::calculator::{Coefficients, DoseResult};
use crate::nutrition::{normalize_query, NutritionFacts};

/// What the current cycle is about. Drives entry routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueMode {
    #[default]
    Unset,
    Meal,
    Correction,
    Query,
}

/// A recognized classifier label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Meal,
    Correction,
    Query,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Meal => "meal",
            Intent::Correction => "correction",
            Intent::Query => "query",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Intent> for DialogueMode {
    fn from(intent: Intent) -> Self {
        match intent {
            Intent::Meal => DialogueMode::Meal,
            Intent::Correction => DialogueMode::Correction,
            Intent::Query => DialogueMode::Query,
        }
    }
}

/// What the Calculating step produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalculationOutcome {
    Dose(DoseResult),
    /// No coefficients were available; carries the text shown instead of a dose.
    Unavailable { reason: String },
}

impl CalculationOutcome {
    pub fn dose(&self) -> Option<&DoseResult> {
        match self {
            CalculationOutcome::Dose(dose) => Some(dose),
            CalculationOutcome::Unavailable { .. } => None,
        }
    }
}

/// Everything the orchestrator carries between turns of one thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    history: Vec<Message>,
    dialogue_mode: DialogueMode,
    factors: Option<Coefficients>,
    calculation_result: Option<CalculationOutcome>,
    /// Normalized food query to the last facts retrieved for it. Advisory only.
    nutrition_cache: BTreeMap<String, Vec<NutritionFacts>>,
}

impl ConversationState {
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn dialogue_mode(&self) -> DialogueMode {
        self.dialogue_mode
    }

    pub fn factors(&self) -> Option<&Coefficients> {
        self.factors.as_ref()
    }

    pub fn calculation_result(&self) -> Option<&CalculationOutcome> {
        self.calculation_result.as_ref()
    }

    pub fn cached_nutrition(&self, query: &str) -> Option<&[NutritionFacts]> {
        self.nutrition_cache
            .get(&normalize_query(query))
            .map(Vec::as_slice)
    }

    pub fn nutrition_cache_len(&self) -> usize {
        self.nutrition_cache.len()
    }

    /// Most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&Message> {
        self.history.iter().rev().find(|m| m.is_user())
    }

    /// Most recent message of any role.
    pub fn last_message(&self) -> Option<&Message> {
        self.history.last()
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub(crate) fn set_mode(&mut self, mode: DialogueMode) {
        self.dialogue_mode = mode;
    }

    pub(crate) fn set_factors(&mut self, factors: Coefficients) {
        self.factors = Some(factors);
    }

    pub(crate) fn set_calculation_result(&mut self, outcome: CalculationOutcome) {
        self.calculation_result = Some(outcome);
    }

    pub(crate) fn cache_nutrition(&mut self, query: &str, facts: Vec<NutritionFacts>) {
        self.nutrition_cache.insert(normalize_query(query), facts);
    }

    /// End the cycle: mode, factors and result go together.
    pub(crate) fn reset_cycle(&mut self) {
        self.dialogue_mode = DialogueMode::Unset;
        self.factors = None;
        self.calculation_result = None;
    }

    /// Drop per-cycle values that cannot belong to the current mode.
    ///
    /// Factors and results only exist mid-way through a meal or correction
    /// cycle, so a loaded state in any other mode must not carry them.
    pub(crate) fn normalize(&mut self) {
        if !matches!(
            self.dialogue_mode,
            DialogueMode::Meal | DialogueMode::Correction
        ) && (self.factors.is_some() || self.calculation_result.is_some())
        {
            tracing::debug!(mode = ?self.dialogue_mode, "dropping stale cycle values");
            self.factors = None;
            self.calculation_result = None;
        }
    }
}
