//! Error types for tgmqueue

/// Queue manipulation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Index {index} out of range (queue length {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("Queue is full ({0} tracks)")]
    QueueFull(usize),
}

/// Specialized Result type for tgmqueue
pub type Result<T> = std::result::Result<T, Error>;
