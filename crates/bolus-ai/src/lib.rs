//! bolus-ai: reasoning-call layer
//!
//! Message model shared by every reasoning stage, the streaming event model,
//! and the LLM providers that turn a policy plus a transcript into a reply.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::MessageEventStream;
pub use types::*;
