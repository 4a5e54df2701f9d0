//! Error types for multi-rank operations

/// Result type for multi-rank operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort a distributed step.
///
/// Communication failures are fatal for all ranks: there is no retry, and
/// the step's buffer swap never happens, so local state stays unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A single-rank engine error.
    #[error(transparent)]
    Engine(#[from] superpose_core::Error),

    /// A collective or point-to-point exchange failed.
    #[error("communication failure: {0}")]
    Comm(String),
}
