//! Error types for engine operations

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort a simulation step
///
/// A step that fails leaves the current state untouched: the buffer swap is
/// the last operation of a step, so every error path exits before it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A rule reported more bytes than its declared upper bound
    #[error("rule violation: parent {parent} child {child} wrote {wrote} bytes, declared at most {declared}")]
    RuleViolation {
        parent: usize,
        child: u32,
        wrote: usize,
        declared: usize,
    },

    /// A rule produced a different child size between the hashing and the
    /// re-expansion pass
    #[error("rule violation: parent {parent} child {child} re-expanded to {actual} bytes, recorded {recorded}")]
    ChildSizeMismatch {
        parent: usize,
        child: u32,
        recorded: usize,
        actual: usize,
    },

    /// The memory budget collapsed below the minimum state floor
    #[error("out of memory: budget allows {budget} objects but {needed} survivors remain")]
    MemoryExhausted { budget: usize, needed: usize },
}
