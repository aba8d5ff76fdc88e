use crate::storage::StorageError;

/// Failures surfaced by [`AppContext`](super::AppContext) operations.
///
/// Migration, asset copy and platform tweak failures never show up here;
/// they are logged and retried on the next start.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Reported by a networking service handler for a failed transition.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service failed to start: {0}")]
    Start(String),

    #[error("service failed to reload: {0}")]
    Reload(String),
}
