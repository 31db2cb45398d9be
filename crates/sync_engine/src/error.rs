use shared::error::MalformedEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("identity must be set before connecting")]
    IdentityMissing,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to send message: {0}")]
    SendFailure(String),
    #[error("request failed: {0}")]
    Query(String),
    #[error(transparent)]
    MalformedEvent(#[from] MalformedEvent),
}

impl SyncError {
    pub fn query(err: anyhow::Error) -> Self {
        SyncError::Query(format!("{err:#}"))
    }
}
