//! The reasoning call every stage delegates judgment to.

use async_trait::async_trait;
use bolus_ai::providers::LlmProvider;
use bolus_ai::stream::collect_message;
use bolus_ai::{Context, Message, Model, StreamOptions, Tool, Usage};
use parking_lot::Mutex;
use std::sync::Arc;

/// A completed reasoning call.
#[derive(Debug, Clone)]
pub struct Reply {
    /// The assistant message, possibly carrying tool calls.
    pub message: Message,
    pub usage: Usage,
}

/// `Invoke(policy, messages) -> content + optional tool calls`.
///
/// No retries happen behind this boundary; a failure ends the turn.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn invoke(
        &self,
        policy: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> bolus_ai::Result<Reply>;
}

/// Reasoner backed by a streaming [`LlmProvider`].
pub struct ProviderReasoner {
    provider: Arc<dyn LlmProvider>,
    model: Model,
    options: StreamOptions,
    total_usage: Mutex<Usage>,
}

impl ProviderReasoner {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Model, options: StreamOptions) -> Self {
        Self {
            provider,
            model,
            options,
            total_usage: Mutex::new(Usage::default()),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Tokens used across every call so far.
    pub fn total_usage(&self) -> Usage {
        self.total_usage.lock().clone()
    }
}

#[async_trait]
impl Reasoner for ProviderReasoner {
    async fn invoke(
        &self,
        policy: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> bolus_ai::Result<Reply> {
        let context = Context {
            system_prompt: Some(policy.to_string()),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        };
        let stream = self
            .provider
            .stream(&self.model, &context, &self.options)
            .await?;
        let (message, usage) = collect_message(stream).await?;
        self.total_usage.lock().accumulate(&usage);
        tracing::debug!(
            model = %self.model.id,
            input = usage.input,
            output = usage.output,
            tool_calls = message.tool_calls().len(),
            "reasoning call finished"
        );
        Ok(Reply { message, usage })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use bolus_ai::Content;
    use std::collections::VecDeque;

    /// One recorded invocation.
    #[derive(Debug, Clone)]
    pub struct Call {
        pub policy: String,
        pub messages: Vec<Message>,
        pub tool_names: Vec<String>,
    }

    /// Replays scripted replies in order and records what it was asked.
    #[derive(Default)]
    pub struct ScriptedReasoner {
        replies: Mutex<VecDeque<bolus_ai::Result<Message>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedReasoner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn text(self, text: &str) -> Self {
            self.replies.lock().push_back(Ok(Message::assistant(text)));
            self
        }

        pub fn tool_call(self, id: &str, name: &str, args: serde_json::Value) -> Self {
            self.message(vec![Content::tool_call(id, name, args)])
        }

        pub fn message(self, content: Vec<Content>) -> Self {
            let mut message = Message::assistant("");
            if let Message::Assistant { content: c, .. } = &mut message {
                *c = content;
            }
            self.replies.lock().push_back(Ok(message));
            self
        }

        pub fn failure(self, error: bolus_ai::Error) -> Self {
            self.replies.lock().push_back(Err(error));
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn remaining(&self) -> usize {
            self.replies.lock().len()
        }
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn invoke(
            &self,
            policy: &str,
            messages: &[Message],
            tools: &[Tool],
        ) -> bolus_ai::Result<Reply> {
            self.calls.lock().push(Call {
                policy: policy.to_string(),
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });
            let next = self.replies.lock().pop_front();
            match next {
                Some(Ok(message)) => Ok(Reply {
                    message,
                    usage: Usage::default(),
                }),
                Some(Err(e)) => Err(e),
                None => Err(bolus_ai::Error::UnexpectedResponse(
                    "script exhausted".to_string(),
                )),
            }
        }
    }
}
