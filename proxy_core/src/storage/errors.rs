/// Errors raised by the on-disk stores.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("profile ids exhausted")]
    IdsExhausted,

    #[error("no profile with id {0}")]
    ProfileNotFound(i64),

    #[error("invalid UDP fallback {fallback} for profile {id}: {reason}")]
    InvalidFallback {
        id: i64,
        fallback: i64,
        reason: &'static str,
    },
}
