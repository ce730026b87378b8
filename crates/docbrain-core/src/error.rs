use thiserror::Error;

/// Engine-boundary error taxonomy. Analysis failure is deliberately absent:
/// the fallback analyzer recovers it locally and clients never see it.
#[derive(Debug, Error)]
pub enum BrainError {
    /// Request rejected before any work (missing query / user id).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Context store unreachable or malformed. Fatal: a request cannot be
    /// routed correctly without its conversation context.
    #[error("context store failure: {0}")]
    Context(#[source] anyhow::Error),

    /// Downstream retrieval+generation agent failed or returned a
    /// non-success status, preserved here when available.
    #[error("downstream agent failure: {message}")]
    Downstream {
        status: Option<u16>,
        message: String,
    },

    /// Failure after the stream already started. Logged and reported
    /// in-band; the response status can no longer change.
    #[error("stream failure: {0}")]
    Stream(String),
}

impl BrainError {
    pub fn downstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Downstream {
            status,
            message: message.into(),
        }
    }
}
