// =============================================================================
// Error taxonomy shared across the market-data pipeline
// =============================================================================

/// Convenience alias used throughout library-style modules.
pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds surfaced by the ingestion, analytics and broadcast layers.
///
/// `main.rs` and the long-lived task loops work in terms of `anyhow::Result`
/// and attach context as errors bubble up; modules below that boundary return
/// this typed enum so callers can match on the failure kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Dial/read/write failures on the upstream exchange or downstream
    /// browser sockets.
    #[error("transport error: {0}")]
    Transport(String),

    /// The exchange rejected a frame (`event: "error"`) or sent an envelope
    /// that doesn't match the expected shape.
    #[error("protocol error (code={code:?}): {message}")]
    Protocol {
        code: Option<String>,
        message: String,
    },

    /// A component was asked to act on state it doesn't have yet, e.g. an
    /// `update` frame before any `snapshot`, or analytics over an empty book.
    #[error("state error: {0}")]
    State(String),

    /// A decimal string or other exchange-provided value couldn't be parsed,
    /// or was parsed but is out of its valid domain (e.g. non-positive mid).
    #[error("data error: {0}")]
    Data(String),

    /// Private-channel login was rejected or timed out.
    #[error("auth error: {0}")]
    Auth(String),

    /// The cache (or another downstream collaborator) is unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Data(e.to_string())
    }
}
