use crate::engine::ServiceError;

/// Errors raised while talking to the Miele cloud.
///
/// `Clone` so a single fetch result can be handed to every coalesced
/// refresh request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authorization expired or was rejected")]
    AuthExpired,

    #[error("device listing failed with status {status}: {body}")]
    FetchFailed { status: u16, body: String },

    #[error("failed to decode device listing: {0}")]
    Decode(String),

    #[error("command for device {device_id} failed with status {status}: {body}")]
    DispatchFailed {
        device_id: String,
        status: u16,
        body: String,
    },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("polling coordinator is not running")]
    CoordinatorGone,
}

impl Error {
    /// Failures the poll loop recovers from by serving the retained snapshot.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::FetchFailed { .. } | Error::Decode(_)
        )
    }
}

impl From<Error> for ServiceError {
    fn from(e: Error) -> Self {
        match e {
            Error::AuthExpired => ServiceError::AuthExpired,
            Error::InvalidCommand(message) => ServiceError::InvalidData(message),
            other => ServiceError::Failed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
