//! Tool trait and the gateway that executes tool calls.

use async_trait::async_trait;
use bolus_ai::{Content, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::calculator::{self, ClinicalProfile, Coefficients, DoseResult};
use crate::error::Result;
use crate::nutrition::{
    normalize_query, NutritionFacts, NutritionLookup, NutritionSource, DEFAULT_MATCH_LIMIT,
};

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content to return to the model
    pub content: Vec<Content>,
    /// Whether the execution resulted in an error
    pub is_error: bool,
    /// Optional structured details, kept out of the model's view
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
            details: None,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
            details: None,
        }
    }

    /// Add details to the result
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the text content as a single string
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-validated arguments
    async fn execute(&self, tool_call_id: &str, arguments: serde_json::Value) -> ToolResult;
}

/// Type alias for a boxed tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to a bolus_ai::Tool for API calls
pub fn to_api_tool(tool: &dyn Tool) -> bolus_ai::Tool {
    bolus_ai::Tool::new(tool.name(), tool.description(), tool.parameters_schema())
}

/// Name the gatherer uses to request a nutrition lookup.
pub const LOOKUP_NUTRITION: &str = "lookup_nutrition";

/// Structured payload stored in [`ToolResult::details`] by the nutrition tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionDetails {
    pub query: String,
    pub matches: Vec<NutritionFacts>,
}

/// Looks up macronutrients for a named food.
pub struct NutritionLookupTool {
    source: Arc<dyn NutritionSource>,
    limit: usize,
}

impl NutritionLookupTool {
    pub fn new(source: Arc<dyn NutritionSource>) -> Self {
        Self {
            source,
            limit: DEFAULT_MATCH_LIMIT,
        }
    }
}

#[async_trait]
impl Tool for NutritionLookupTool {
    fn name(&self) -> &str {
        LOOKUP_NUTRITION
    }

    fn description(&self) -> &str {
        "Look up carbohydrate, protein and fat per 100g plus standard and serving sizes for a food. \
         Call this whenever the person names a food you have not looked up yet."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Food name, e.g. \"kimchi fried rice\""
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _tool_call_id: &str, arguments: serde_json::Value) -> ToolResult {
        let Some(query) = arguments.get("query").and_then(|q| q.as_str()) else {
            return ToolResult::error("Missing required argument: query");
        };
        let query = normalize_query(query);
        if query.is_empty() {
            return ToolResult::error("Food name must not be blank");
        }

        match lookup_nutrition(self.source.as_ref(), &query, self.limit).await {
            Ok(lookup) => {
                let result = ToolResult::text(lookup.render());
                let matches = match lookup {
                    NutritionLookup::Found(matches) => matches,
                    NutritionLookup::NotFound => vec![],
                };
                match serde_json::to_value(NutritionDetails { query, matches }) {
                    Ok(value) => result.with_details(value),
                    Err(_) => result,
                }
            }
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "nutrition lookup failed");
                ToolResult::error(format!("Nutrition lookup failed: {}", e))
            }
        }
    }
}

/// Look up `query` in `source`. An empty match list is `NotFound`, not an error.
pub async fn lookup_nutrition(
    source: &dyn NutritionSource,
    query: &str,
    limit: usize,
) -> Result<NutritionLookup> {
    let query = normalize_query(query);
    if query.is_empty() {
        return Ok(NutritionLookup::NotFound);
    }
    let matches = source.search(&query, limit).await?;
    Ok(NutritionLookup::from_matches(matches))
}

/// Typed access to the two external capabilities plus model-facing tool dispatch.
pub struct ToolGateway {
    nutrition: Arc<dyn NutritionSource>,
    profile: ClinicalProfile,
    tools: Vec<BoxedTool>,
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolGateway {
    pub fn new(nutrition: Arc<dyn NutritionSource>, profile: ClinicalProfile) -> Self {
        let mut gateway = Self {
            nutrition: nutrition.clone(),
            profile,
            tools: vec![],
            schema_cache: HashMap::new(),
        };
        gateway.add_tool(Arc::new(NutritionLookupTool::new(nutrition)));
        gateway
    }

    fn add_tool(&mut self, tool: BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
        self.tools.push(tool);
    }

    /// Direct nutrition lookup, the same operation the model-facing tool runs.
    pub async fn lookup_nutrition(&self, query: &str) -> Result<NutritionLookup> {
        lookup_nutrition(self.nutrition.as_ref(), query, DEFAULT_MATCH_LIMIT).await
    }

    /// Run the clinical calculator with this gateway's profile.
    pub fn compute_dose(&self, coefficients: &Coefficients) -> DoseResult {
        calculator::compute_dose(&self.profile, coefficients)
    }

    /// Tool definitions offered to the information gatherer.
    pub fn gatherer_tools(&self) -> Vec<bolus_ai::Tool> {
        self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect()
    }

    /// Execute one model-requested call. Never fails; problems become error results.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            return ToolResult::error(format!("Tool not found: {}", call.name));
        };

        if let Some(err) = self
            .schema_cache
            .get(&call.name)
            .and_then(|validator| validate_with_validator(&call.arguments, validator))
        {
            return ToolResult::error(err);
        }

        tool.execute(&call.id, call.arguments.clone()).await
    }
}

/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}
