//! Error types for bolus-agent

use thiserror::Error;

/// Result type alias using bolus-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Turn-level failures surfaced to the caller.
///
/// An unrecognized intent is not an error (see `TurnOutcome::Unclassified`),
/// and failed tool calls are folded back into the conversation.
#[derive(Error, Debug)]
pub enum Error {
    /// The reasoning call failed
    #[error(transparent)]
    Ai(#[from] bolus_ai::Error),

    /// The coefficient extractor produced output that could not be parsed
    #[error("Coefficient extraction failed: {reason}")]
    Extraction { reason: String },

    /// The health-data store could not be read
    #[error("Health data unavailable: {0}")]
    HealthData(String),

    /// No blood-glucose value from the health store or the conversation
    #[error("No blood glucose reading is available")]
    GlucoseUnavailable,

    /// The checkpoint store failed
    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    /// The thread id cannot be used as a checkpoint key
    #[error("Invalid thread id: {0:?}")]
    InvalidThreadId(String),
}

impl Error {
    pub fn extraction(reason: impl Into<String>) -> Self {
        Self::Extraction {
            reason: reason.into(),
        }
    }

    /// Whether the collaborator (not the conversation) is at fault.
    pub fn is_service_error(&self) -> bool {
        matches!(
            self,
            Error::Ai(_) | Error::HealthData(_) | Error::Checkpoint(_)
        )
    }
}
