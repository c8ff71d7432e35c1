use thiserror::Error;

/// Errors produced by the gateway core and backend adapters.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("device not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend protocol error: {0}")]
    Backend(String),

    #[error("authentication failed: {0}")]
    AuthRejected(String),

    #[error("timed out {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<GatewayError> for tonic::Status {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            GatewayError::NotFound(msg) => tonic::Status::not_found(msg),
            GatewayError::Unavailable(msg) => tonic::Status::unavailable(msg),
            GatewayError::AuthRejected(msg) => tonic::Status::unauthenticated(msg),
            GatewayError::Timeout(msg) => tonic::Status::deadline_exceeded(msg),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
