use thiserror::Error as ThisError;

/// Errors produced anywhere in the engine: heap allocation, table parsing,
/// rule compilation, and the filter run itself.
#[derive(Debug, ThisError)]
pub enum KradataError {
    /// The table header failed to parse: bad magic, truncated header, or a
    /// column whose offset/size falls outside the row stride.
    #[error("bad table format: {0}")]
    BadFormat(String),

    /// The heap could not satisfy an allocation, or a worker could not be
    /// spawned.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The rule tree referenced an unknown column, mismatched an operation
    /// against a column's type, or carried a numeric value that failed to
    /// parse. Raised before any row is scanned.
    #[error("invalid rule: {0}")]
    RuleError(String),

    /// Use of a freed or unknown `MemoryBlock`, or an out-of-range row index.
    /// A programming error; fatal to the run.
    #[error("invalid memory handle: {0}")]
    InvalidHandle(String),

    /// The run was cancelled (typically because a worker hit a fatal
    /// error and the coordinator raised the cancel flag for the rest).
    /// No partial-result contract is offered.
    #[error("filter run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, KradataError>;
