use thiserror::Error;

/// Failure classes the pipeline distinguishes when deciding whether to retry,
/// degrade or abort.
///
/// Stage code returns `anyhow::Result`; these variants ride inside the
/// `anyhow::Error` and are recovered with [`StoryError::classify`].
#[derive(Debug, Error)]
pub enum StoryError {
    /// Transport or authentication failure talking to a remote service.
    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),

    /// A structured response did not match its declared shape or contract.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A generation job could not be submitted.
    #[error("job submission failed: {0}")]
    SubmissionFailed(String),

    /// A generation job reached a terminal non-success state.
    #[error("job {0} failed")]
    JobFailed(String),

    /// A generation job did not finish within its polling budget.
    #[error("job {0} timed out")]
    JobTimedOut(String),

    /// The external encoder used by the static renderer failed.
    #[error("static render failed: {0}")]
    EncodeFailed(String),

    /// Missing credential or invalid setting, detected before any stage runs.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StoryError {
    pub fn classify(err: &anyhow::Error) -> Option<&StoryError> {
        err.downcast_ref::<StoryError>()
    }

    pub fn is_schema_violation(err: &anyhow::Error) -> bool {
        matches!(Self::classify(err), Some(StoryError::SchemaViolation(_)))
    }
}
