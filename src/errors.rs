use core::fmt;

/// Errors surfaced at transaction boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    /// The transaction conflicted with a concurrent writer and has aborted.
    /// None of its effects are visible; the caller may retry from scratch.
    Conflict,
    /// Segment allocation failed. Non-fatal: the transaction is still live
    /// and may continue or commit.
    OutOfMemory,
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::Conflict => write!(f, "transaction aborted on conflict"),
            TxError::OutOfMemory => write!(f, "segment allocation failed"),
        }
    }
}

impl std::error::Error for TxError {}
