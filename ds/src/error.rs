use std::time::Duration;

use tokio_util::codec::LinesCodecError;

/// Errors originating from the delivery service layer.
///
/// Every variant means the exchange did not complete; callers never retry.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryServiceError {
    #[error("Problem from std::io library: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Envelope framing error: {0}")]
    FramingError(#[from] LinesCodecError),
    #[error("JSON processing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("No envelope received within {0:?}")]
    Timeout(Duration),
    #[error("Connection closed before an envelope arrived")]
    ConnectionClosed,
}
