//! Client error types.

use ethfs_types::{NamespaceCode, RecordIndex, RemoteCode, Status, StatusCode, TxId};

/// Errors that can occur while talking to a record store.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport or connectivity failure; the store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the call (authorization, bad arguments, revert).
    #[error("rejected by store: {0}")]
    Rejected(String),

    /// No live record at this index.
    #[error("record {0} not found")]
    RecordNotFound(RecordIndex),

    /// The transaction was accepted but did not commit.
    #[error("transaction {tx} failed to commit: {reason}")]
    CommitFailed { tx: TxId, reason: String },

    /// The endpoint answered with something that is not a valid response.
    #[error("bad response: {0}")]
    BadResponse(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// An internal / unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ClientError> for Status {
    fn from(err: ClientError) -> Self {
        let code = match err {
            ClientError::Unavailable(_) => RemoteCode::UNAVAILABLE,
            ClientError::Rejected(_) => RemoteCode::REJECTED,
            ClientError::RecordNotFound(_) => NamespaceCode::NOT_FOUND,
            ClientError::CommitFailed { .. } => RemoteCode::COMMIT_FAILED,
            ClientError::BadResponse(_) => RemoteCode::BAD_RESPONSE,
            ClientError::Config(_) => StatusCode::INVALID_CONFIG,
            ClientError::Internal(_) => StatusCode::UNKNOWN,
        };
        Status::with_message(code, err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Unavailable(err.to_string())
    }
}

/// Convenience result type.
pub type ClientResult<T> = std::result::Result<T, ClientError>;
