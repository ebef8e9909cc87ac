//! Reasoning stages. Each one builds a policy, makes one reasoning call and
//! interprets the reply; none of them touches conversation state.

pub mod classifier;
pub mod composer;
pub mod extractor;
pub mod gatherer;
pub mod prompts;

pub use classifier::classify;
pub use composer::{compose_dose, compose_query};
pub use extractor::extract;
pub use gatherer::{decide, gather, GatherDecision};
