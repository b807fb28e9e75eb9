use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    services::ai_provider::ProviderError,
    state::state_machine::InvalidTransition,
};

/// Coarse classification every failure is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    /// Duplicate or out-of-order request; answers treat duplicates as a silent no-op.
    Conflict,
    InvalidInput,
    Timeout,
    UpstreamFailure,
    Internal,
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Rank is neither a known tier nor a score in 1..=10.
    #[error("invalid rank `{0}`")]
    InvalidRank(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("match `{0}` not found")]
    MatchNotFound(String),
    #[error("question `{question_id}` not found in match `{match_id}`")]
    QuestionNotFound {
        match_id: String,
        question_id: String,
    },
    /// The bank holds nothing for the requested difficulty.
    #[error("no questions available for level {level}")]
    NoQuestionsAvailable { level: u8 },
    /// Questions were not ready before the sourcing deadline.
    #[error("question sourcing timed out")]
    SourcingTimeout,
    /// The verification pass returned something other than a list of questions.
    #[error("question verification failed: {0}")]
    VerificationError(String),
    /// Every generation attempt produced unparseable output.
    #[error("question generation exhausted after {attempts} attempt(s), {accepted}/{requested} accepted")]
    GenerationExhausted {
        requested: usize,
        accepted: usize,
        attempts: u32,
    },
    #[error("upstream failure: {0}")]
    Upstream(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NotFound(_)
            | ServiceError::MatchNotFound(_)
            | ServiceError::QuestionNotFound { .. }
            | ServiceError::NoQuestionsAvailable { .. } => ErrorKind::NotFound,
            ServiceError::InvalidState(_) => ErrorKind::Conflict,
            ServiceError::InvalidInput(_) | ServiceError::InvalidRank(_) => {
                ErrorKind::InvalidInput
            }
            ServiceError::SourcingTimeout | ServiceError::Timeout => ErrorKind::Timeout,
            ServiceError::Unavailable(_)
            | ServiceError::Degraded
            | ServiceError::VerificationError(_)
            | ServiceError::GenerationExhausted { .. }
            | ServiceError::Upstream(_) => ErrorKind::UpstreamFailure,
            ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Corrupted { .. } => ServiceError::Internal(err.to_string()),
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout | ProviderError::Transport { .. } => {
                ServiceError::SourcingTimeout
            }
            other => ServiceError::Upstream(other.to_string()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// An upstream provider failed or returned garbage.
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            other => match other.kind() {
                ErrorKind::NotFound => AppError::NotFound(message),
                ErrorKind::Conflict => AppError::Conflict(message),
                ErrorKind::InvalidInput => AppError::BadRequest(message),
                ErrorKind::Timeout => AppError::GatewayTimeout(message),
                ErrorKind::UpstreamFailure => AppError::BadGateway(message),
                ErrorKind::Internal => AppError::Internal(message),
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::*;

    #[test]
    fn kinds_map_to_http_statuses() {
        let cases = [
            (ServiceError::MatchNotFound("quiz:1".into()), StatusCode::NOT_FOUND),
            (ServiceError::InvalidRank("11".into()), StatusCode::BAD_REQUEST),
            (ServiceError::InvalidState("busy".into()), StatusCode::CONFLICT),
            (ServiceError::SourcingTimeout, StatusCode::GATEWAY_TIMEOUT),
            (
                ServiceError::VerificationError("not a list".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (ServiceError::Degraded, StatusCode::SERVICE_UNAVAILABLE),
            (ServiceError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn corrupted_documents_are_internal_errors() {
        let source = serde_json::from_str::<u8>("x").unwrap_err();
        let err = ServiceError::from(StorageError::corrupted("match::quiz:1", source));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn rejected_transitions_are_conflicts() {
        use crate::state::state_machine::{MatchEvent, MatchPhase};

        let err = ServiceError::from(InvalidTransition {
            from: MatchPhase::Completed,
            event: MatchEvent::Complete,
        });
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
