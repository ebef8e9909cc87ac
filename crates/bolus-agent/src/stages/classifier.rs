//! Intent classifier: latest user message in, one of three labels out.

use bolus_ai::Message;

use crate::error::Result;
use crate::reasoner::Reasoner;
use crate::state::Intent;
use crate::stages::prompts::CLASSIFIER_POLICY;

/// Classify `latest`. `Ok(None)` means the label was not recognized.
///
/// Only the one message is sent, never the history.
pub async fn classify(reasoner: &dyn Reasoner, latest: &Message) -> Result<Option<Intent>> {
    let reply = reasoner
        .invoke(CLASSIFIER_POLICY, std::slice::from_ref(latest), &[])
        .await?;
    let label = reply.message.text();
    let intent = parse_label(&label);
    tracing::debug!(label = %label.trim(), ?intent, "classified");
    Ok(intent)
}

/// Exact match after trimming whitespace, quotes and trailing punctuation.
pub fn parse_label(raw: &str) -> Option<Intent> {
    let label = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '*')
        .trim_end_matches(['.', '!'])
        .trim()
        .to_ascii_lowercase();
    match label.as_str() {
        "meal" => Some(Intent::Meal),
        "correction" => Some(Intent::Correction),
        "query" => Some(Intent::Query),
        _ => None,
    }
}
