use ds::DeliveryServiceError;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Login payload must be [host, port], got {0} element(s)")]
    MalformedLoginPayload(usize),
    #[error("Invalid port in login payload: {0}")]
    InvalidPort(String),
    #[error("Empty host in login payload")]
    EmptyHost,
}

/// Why a single push to a participant did not count as delivered.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error(transparent)]
    DeliveryServiceError(#[from] DeliveryServiceError),
    #[error("Reply is not an acknowledgment: {0:?}")]
    NotAcknowledged(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Could not listen on {addr}: {source}")]
    BindError {
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    DeliveryServiceError(#[from] DeliveryServiceError),
    #[error("Problem from std::io library: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Couldn't find any available port ({attempts} attempt(s) from {first})")]
    NoAvailablePort { first: u16, attempts: u16 },
    #[error("Cannot resolve server host {0}")]
    UnresolvedHost(String),
    #[error("Expected {expected:?} from the server, got {received:?}")]
    UnexpectedReply { expected: String, received: String },

    #[error(transparent)]
    DeliveryServiceError(#[from] DeliveryServiceError),
    #[error("Problem from std::io library: {0}")]
    IoError(#[from] std::io::Error),
}
