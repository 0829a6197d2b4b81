use thiserror::Error;

pub type TractResult<T> = Result<T, TractError>;

#[derive(Error, Debug)]
pub enum TractError {
    #[error("Unknown tenant: {0}")]
    TenantUnknown(String),

    #[error("Origin domain not allowed: {0}")]
    DomainForbidden(String),

    #[error("Unknown session: {0}")]
    SessionUnknown(String),

    #[error("Unknown belief slug: {0}")]
    BeliefUnknown(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("SSE subscriber lagging: {0}")]
    SubscriberLagging(String),

    #[error("Content missing from cache and store: {0}")]
    CacheMissHard(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
