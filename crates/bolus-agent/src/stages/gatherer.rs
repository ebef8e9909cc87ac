//! Information gatherer: asks for missing facts and requests nutrition lookups.

use bolus_ai::{Message, Tool, ToolCall};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::Result;
use crate::reasoner::Reasoner;
use crate::stages::prompts::{gatherer_policy, COMPLETION_SENTINEL};

/// What the orchestrator does with a gatherer reply.
#[derive(Debug, Clone, PartialEq)]
pub enum GatherDecision {
    /// Resolve these calls, then ask the gatherer again.
    ToolCalls(Vec<ToolCall>),
    /// The checklist is done.
    Complete,
    /// The reply is a question for the person.
    AwaitUser,
}

/// Run the gatherer over the full history.
pub async fn gather(
    reasoner: &dyn Reasoner,
    history: &[Message],
    tools: &[Tool],
) -> Result<Message> {
    let reply = reasoner.invoke(&gatherer_policy(), history, tools).await?;
    Ok(reply.message)
}

/// Tool calls win over a sentinel in the same reply.
pub fn decide(reply: &Message) -> GatherDecision {
    let calls = reply.tool_calls();
    if !calls.is_empty() {
        return GatherDecision::ToolCalls(calls);
    }
    if is_completion_sentinel(&reply.text()) {
        GatherDecision::Complete
    } else {
        GatherDecision::AwaitUser
    }
}

static SENTINEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i)^[\s"'`*_]*{}[\s.!"'`*_]*$"#,
        regex::escape(COMPLETION_SENTINEL)
    ))
    .unwrap()
});

/// Whether the whole text is the completion sentinel.
///
/// Case, surrounding whitespace, quotes, emphasis markers and trailing
/// punctuation are ignored. Any other words make it an ordinary reply.
pub fn is_completion_sentinel(text: &str) -> bool {
    SENTINEL_RE.is_match(text)
}
