//! Error taxonomy for the compliance analysis core.
//!
//! External-service failures never abort an analysis run; they degrade a
//! single adjudication to `context_dependent`. The fatal variants here are
//! the ones a caller must fix (bad SOP data, unknown run).

use thiserror::Error;

/// Result type for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Errors produced by the compliance analysis core
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// No SOP definition exists for the requested procedure
    #[error("no procedure graph found for '{0}'")]
    GraphNotFound(String),

    /// The SOP definition violates a structural invariant
    #[error("procedure graph '{id}' is invalid: {reason}")]
    GraphInvalid { id: String, reason: String },

    /// The requested procedure run does not exist
    #[error("procedure run '{0}' not found")]
    RunNotFound(String),

    /// An observed event failed structural validation. Never surfaces as a
    /// run failure: the event is dropped and a warning attached to the report.
    #[error("malformed observed event: {0}")]
    EventMalformed(String),

    /// The literature or entailment service could not be reached
    #[error("evidence service unavailable: {0}")]
    EvidenceUnavailable(String),

    /// An external evidence call exceeded its deadline
    #[error("evidence request timed out after {0}s")]
    EvidenceTimeout(u64),

    /// The analysis task for this run was aborted before completing
    #[error("analysis for run '{0}' was cancelled")]
    Cancelled(String),

    /// Failure at the storage boundary
    #[error("storage error: {0}")]
    Storage(String),

    /// Failure (de)serializing a report or SOP definition
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalysisError {
    /// Whether this error is local to a single adjudication task and should
    /// degrade that verdict rather than fail the run.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            AnalysisError::EvidenceUnavailable(_) | AnalysisError::EvidenceTimeout(_)
        )
    }
}
