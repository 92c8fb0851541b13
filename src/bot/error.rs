//! Bot error types.

/// Bot error type.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("bot is already running")]
    AlreadyRunning,
    #[error("config error: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
    #[error("exchange error: {0}")]
    Exchange(String),
    #[error("notification error: {0}")]
    Notification(String),
    /// A strategy proposed an action that failed validation. This is a
    /// planning bug; the cycle is aborted.
    #[error("invalid action: {0}")]
    InvalidAction(String),
}
