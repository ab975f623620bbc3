use std::time::Duration;

use thiserror::Error;

/// Failure of a single risk classifier or insight generator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Malformed(err.to_string())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

/// Per-client failures. These are logged and the client is left out of the
/// batch; they never surface to the caller.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("risk classification failed for {client_id}: {source}")]
    Classification {
        client_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("insight generation failed for {client_id}: {source}")]
    Insight {
        client_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("risk prediction for {client_id} has no matching client snapshot")]
    CorrelationInconsistency { client_id: String },
}

impl StageFailure {
    pub fn client_id(&self) -> &str {
        match self {
            StageFailure::Classification { client_id, .. }
            | StageFailure::Insight { client_id, .. }
            | StageFailure::CorrelationInconsistency { client_id } => client_id,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            StageFailure::Classification { .. } => "risk",
            StageFailure::Insight { .. } | StageFailure::CorrelationInconsistency { .. } => {
                "insight"
            }
        }
    }
}

/// Batch-level failure: the input cannot be processed at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("client id {0:?} appears more than once in the batch")]
    DuplicateClientId(String),

    #[error("batch contains a client with an empty id")]
    EmptyClientId,
}
