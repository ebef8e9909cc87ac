//! Google Generative AI (Gemini) API provider

use crate::{
    error::{Error, Result},
    providers::LlmProvider,
    stream::{MessageEvent, MessageEventStream},
    types::{
        AssistantMetadata, Content, Context, Message, Model, StopReason, StreamOptions, Usage,
    },
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

/// Environment variables checked for a Gemini key, in order
pub const API_KEY_ENV_VARS: &[&str] = &["GOOGLE_API_KEY", "GEMINI_API_KEY"];

/// Google Generative AI client
pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleProvider {
    /// Create a new Google provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    fn build_request(&self, model: &Model, context: &Context, options: &StreamOptions) -> GeminiRequest {
        let contents = context.messages.iter().filter_map(convert_message).collect();

        let system_instruction = context.system_prompt.as_ref().map(|prompt| GeminiContent {
            role: None,
            parts: vec![GeminiPart::Text {
                text: prompt.clone(),
            }],
        });

        let tools = if context.tools.is_empty() {
            None
        } else {
            let function_declarations = context
                .tools
                .iter()
                .map(|t| GeminiFunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: Some(t.parameters.clone()),
                })
                .collect();
            Some(vec![GeminiTool {
                function_declarations,
            }])
        };

        GeminiRequest {
            contents,
            system_instruction,
            tools,
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: Some(options.max_tokens.unwrap_or(model.max_tokens)),
                temperature: options.temperature,
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        let request = self.build_request(model, context, options);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            model.base_url, model.id
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let key = reqwest::header::HeaderValue::from_str(&self.api_key)
            .map_err(|_| Error::InvalidApiKey)?;
        headers.insert("x-goog-api-key", key);

        for (key, value) in &model.headers {
            if let (Ok(name), Ok(val)) = (
                key.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, val);
            }
        }

        tracing::debug!(model = %model.id, messages = context.messages.len(), "gemini request");

        let request_builder = self.client.post(&url).headers(headers).json(&request);
        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.id.clone())))
    }
}

fn convert_message(msg: &Message) -> Option<GeminiContent> {
    let (role, parts) = match msg {
        Message::User { content, .. } => {
            let parts: Vec<GeminiPart> = content
                .iter()
                .filter_map(|c| c.as_text().map(|text| GeminiPart::Text { text: text.to_string() }))
                .collect();
            ("user", parts)
        }
        Message::Assistant { content, .. } => {
            let parts: Vec<GeminiPart> = content
                .iter()
                .filter_map(|c| match c {
                    Content::Text { text } if !text.is_empty() => {
                        Some(GeminiPart::Text { text: text.clone() })
                    }
                    Content::ToolCall {
                        name, arguments, ..
                    } => Some(GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: name.clone(),
                            args: arguments.clone(),
                        },
                    }),
                    _ => None,
                })
                .collect();
            ("model", parts)
        }
        // Gemini matches responses to calls by name, not id
        Message::ToolResult {
            tool_name, content, ..
        } => {
            let response_text = content
                .iter()
                .filter_map(|c| c.as_text())
                .collect::<Vec<_>>()
                .join("");
            let parts = vec![GeminiPart::FunctionResponse {
                function_response: GeminiFunctionResponse {
                    name: tool_name.clone(),
                    response: serde_json::json!({ "result": response_text }),
                },
            }];
            ("function", parts)
        }
    };

    if parts.is_empty() {
        None
    } else {
        Some(GeminiContent {
            role: Some(role.to_string()),
            parts,
        })
    }
}

fn create_stream(
    mut event_source: EventSource,
    model_id: String,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut tool_calls: Vec<(String, String, serde_json::Value)> = Vec::new();
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        yield MessageEvent::Start {
            message: Message::Assistant {
                content: vec![],
                metadata: AssistantMetadata {
                    model: Some(model_id.clone()),
                    ..Default::default()
                },
            },
        };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data.is_empty() || msg.data == "[DONE]" {
                        continue;
                    }

                    let response = match serde_json::from_str::<GeminiStreamResponse>(&msg.data) {
                        Ok(response) => response,
                        Err(e) => {
                            if let Ok(error_response) = serde_json::from_str::<GeminiErrorResponse>(&msg.data) {
                                yield MessageEvent::Error {
                                    message: error_response.error.message,
                                    error_type: error_response.error.status,
                                };
                            } else {
                                yield MessageEvent::Error {
                                    message: format!("Failed to parse chunk: {}", e),
                                    error_type: None,
                                };
                            }
                            event_source.close();
                            return;
                        }
                    };

                    for candidate in &response.candidates {
                        if let Some(ref content) = candidate.content {
                            for part in &content.parts {
                                match part {
                                    GeminiResponsePart::Text { text } => {
                                        accumulated_text.push_str(text);
                                        yield MessageEvent::TextDelta { delta: text.clone() };
                                    }
                                    GeminiResponsePart::FunctionCall { function_call } => {
                                        // Gemini does not issue call ids
                                        let id = format!("call_{}", tool_calls.len());
                                        yield MessageEvent::ToolCall {
                                            id: id.clone(),
                                            name: function_call.name.clone(),
                                            arguments: function_call.args.clone(),
                                        };
                                        tool_calls.push((id, function_call.name.clone(), function_call.args.clone()));
                                    }
                                }
                            }
                        }
                        if let Some(ref reason) = candidate.finish_reason {
                            finish_reason = Some(reason.clone());
                        }
                    }

                    if let Some(ref meta) = response.usage_metadata {
                        usage.input = meta.prompt_token_count.unwrap_or(0);
                        usage.output = meta.candidates_token_count.unwrap_or(0);
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    event_source.close();
                    break;
                }
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    let (message, error_type) = status_error(status, &body);
                    yield MessageEvent::Error { message, error_type: Some(error_type) };
                    event_source.close();
                    return;
                }
                Err(e) => {
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                        error_type: None,
                    };
                    event_source.close();
                    return;
                }
            }
        }

        let mut content = Vec::new();
        if !accumulated_text.is_empty() {
            content.push(Content::Text { text: accumulated_text });
        }
        let has_tool_calls = !tool_calls.is_empty();
        for (id, name, arguments) in tool_calls {
            content.push(Content::ToolCall { id, name, arguments });
        }

        let stop_reason = map_finish_reason(finish_reason.as_deref(), has_tool_calls);

        yield MessageEvent::Done {
            message: Message::Assistant {
                content,
                metadata: AssistantMetadata {
                    model: Some(model_id.clone()),
                    usage: usage.clone(),
                    stop_reason: Some(stop_reason),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            },
            stop_reason,
            usage,
        };
    }
}

fn map_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    if has_tool_calls {
        return StopReason::ToolUse;
    }
    match reason {
        Some("MAX_TOKENS") => StopReason::Length,
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") => StopReason::Safety,
        _ => StopReason::Stop,
    }
}

// Request types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Debug, Serialize)]
struct GeminiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiResponsePart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiResponseFunctionCall,
    },
}

#[derive(Debug, Deserialize)]
struct GeminiResponseFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    /// e.g. "RESOURCE_EXHAUSTED"
    #[serde(default)]
    status: Option<String>,
}

/// Message and error type for a non-success HTTP status.
fn status_error(status: reqwest::StatusCode, body: &str) -> (String, String) {
    let parsed = serde_json::from_str::<GeminiErrorResponse>(body).ok();
    let error_type = parsed
        .as_ref()
        .and_then(|e| e.error.status.clone())
        .unwrap_or_else(|| {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                "rate_limit".to_string()
            } else {
                format!("http_{}", status.as_u16())
            }
        });
    let message = match parsed {
        Some(e) => format!("HTTP {}: {}", status, e.error.message),
        None => format!("HTTP {}: {}", status, body),
    };
    (message, error_type)
}
