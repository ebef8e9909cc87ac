//! Streaming event types and utilities

use crate::error::{Error, Result};
use crate::types::{Message, StopReason, Usage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a reply streams in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Initial message structure
    Start { message: Message },
    /// Text content delta
    TextDelta { delta: String },
    /// A complete tool call
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// Message completed successfully
    Done {
        message: Message,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred. `error_type` is the provider's classification when it sent one.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_type: Option<String>,
    },
}

impl MessageEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. } | MessageEvent::Error { .. })
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Drain a stream to its final message.
///
/// Deltas are ignored; providers always emit the fully assembled message in
/// `Done`. A stream that ends without a terminal event is an error.
pub async fn collect_message(mut stream: MessageEventStream) -> Result<(Message, Usage)> {
    while let Some(event) = stream.next().await {
        match event {
            MessageEvent::Done { message, usage, .. } => return Ok((message, usage)),
            MessageEvent::Error {
                message,
                error_type: Some(error_type),
            } => return Err(Error::api(error_type, message)),
            MessageEvent::Error { message, .. } => return Err(Error::Sse(message)),
            MessageEvent::TextDelta { delta } => {
                tracing::trace!(len = delta.len(), "text delta");
            }
            _ => {}
        }
    }
    Err(Error::UnexpectedResponse(
        "stream ended without a final message".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(events: Vec<MessageEvent>) -> MessageEventStream {
        Box::pin(futures::stream::iter(events))
    }

    #[tokio::test]
    async fn test_collect_returns_done_message() {
        let final_msg = Message::assistant("Which foods will you eat?");
        let stream = boxed(vec![
            MessageEvent::Start {
                message: Message::assistant(""),
            },
            MessageEvent::TextDelta {
                delta: "Which foods".into(),
            },
            MessageEvent::Done {
                message: final_msg.clone(),
                stop_reason: StopReason::Stop,
                usage: Usage { input: 12, output: 5 },
            },
        ]);

        let (message, usage) = collect_message(stream).await.unwrap();
        assert_eq!(message.text(), "Which foods will you eat?");
        assert_eq!(usage.input, 12);
    }

    #[tokio::test]
    async fn test_collect_surfaces_error_event() {
        let stream = boxed(vec![MessageEvent::Error {
            message: "quota exhausted".into(),
            error_type: None,
        }]);
        let err = collect_message(stream).await.unwrap_err();
        assert!(err.to_string().contains("quota exhausted"));
    }

    #[tokio::test]
    async fn test_collect_keeps_provider_error_type() {
        let stream = boxed(vec![MessageEvent::Error {
            message: "Quota exceeded".into(),
            error_type: Some("RESOURCE_EXHAUSTED".into()),
        }]);
        let err = collect_message(stream).await.unwrap_err();
        assert!(matches!(err, Error::Api { ref error_type, .. } if error_type == "RESOURCE_EXHAUSTED"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_collect_requires_terminal_event() {
        let stream = boxed(vec![MessageEvent::ToolCall {
            id: "call_0".into(),
            name: "lookup_nutrition".into(),
            arguments: serde_json::json!({}),
        }]);
        assert!(matches!(
            collect_message(stream).await,
            Err(Error::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_terminal_events() {
        assert!(
            MessageEvent::Error {
                message: "x".into(),
                error_type: None
            }
            .is_terminal()
        );
        assert!(!MessageEvent::TextDelta { delta: "x".into() }.is_terminal());
    }
}
