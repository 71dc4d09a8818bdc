use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("failed to spawn host thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("deadlock: no thread ready, blocked: {blocked:?}")]
    Deadlock { blocked: Vec<String> },

    #[error("kernel panic in thread '{thread}': {message}")]
    Panic { thread: String, message: String },
}
