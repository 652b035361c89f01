use thiserror::Error;

/// Failure taxonomy for a pipeline run. Any batch-level failure aborts the
/// whole run; partial reports are never emitted.
#[derive(Error, Debug)]
pub enum DigestError {
    /// Bad input caught before any collaborator call (empty dataset,
    /// malformed record). Recoverable by fixing the input and rerunning.
    #[error("Input error: {0}")]
    Input(String),

    /// A prompt template is missing a required placeholder. Raised at
    /// construction time, never mid-run.
    #[error("Invalid prompt template: missing placeholder {0}")]
    Template(&'static str),

    /// Network failure, timeout, 429 or 5xx from a collaborator. Retried
    /// locally; only surfaced after retry exhaustion.
    #[error("Transient error in {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    /// 4xx auth/validation failure or a malformed response body. Not
    /// retried, surfaced immediately.
    #[error("Permanent error in {operation}: {message}")]
    Permanent {
        operation: &'static str,
        message: String,
    },

    /// The model returned 2xx but produced no text. Treated as a failure,
    /// not a valid empty summary.
    #[error("Empty completion in {operation}")]
    EmptyCompletion { operation: &'static str },

    /// A batch failed after exhausting every retry attempt.
    #[error("Batch {batch_index} failed after {attempts} attempts: {source}")]
    BatchExhausted {
        batch_index: usize,
        attempts: u32,
        #[source]
        source: Box<DigestError>,
    },

    /// The slide generation job did not terminate within the poll budget.
    /// The remote job may or may not still complete; the outcome is unknown.
    #[error("Presentation generation {generation_id} still pending after {attempts} polls")]
    PollTimeout {
        generation_id: String,
        attempts: u32,
    },

    /// The slide collaborator reported that the generation job failed.
    #[error("Presentation generation {generation_id} failed: {message}")]
    GenerationFailed {
        generation_id: String,
        message: String,
    },
}

impl DigestError {
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            operation,
            message: message.into(),
        }
    }

    pub fn permanent(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Permanent {
            operation,
            message: message.into(),
        }
    }

    /// Whether the retry loop should attempt this operation again.
    /// Transient transport failures and empty completions are retryable;
    /// everything else aborts immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::EmptyCompletion { .. }
        )
    }
}

pub type DigestResult<T> = Result<T, DigestError>;
