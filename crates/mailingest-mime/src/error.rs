//! Error types for MIME operations.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
///
/// The top-level [`parse`](crate::parse) never returns these; they surface
/// from the individual decoding steps so each fallback level can be tested.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// The declared charset is unknown or the bytes are not valid in it.
    #[error("Cannot decode bytes as {0}")]
    Charset(String),
}
