//! Error and status types shared across the engine.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BtreeError>;

/// Terminal failures surfaced to callers of the public tree operations.
#[derive(Debug, Error)]
pub enum BtreeError {
    /// A node buffer failed a structural or checksum check.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// The requested key or range had no matching entry.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The backing store could not provide a node buffer.
    #[error("node store out of space")]
    SpaceNotAvail,
    /// A put or insert failed after size pre-checks said it would fit.
    #[error("put failed: {0}")]
    PutFailed(&'static str),
    /// A request was malformed (empty range, zero batch size, bad config).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Internal per-step outcome of engine operations.
///
/// `Retry` and the checkpoint pass-throughs never escape the public API;
/// the top-level operation loops absorb them. Only terminal variants map
/// onto [`BtreeError`] or success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation completed.
    Success,
    /// No entry matched the key or range.
    NotFound,
    /// A lock upgrade or generation check failed; restart from the root.
    Retry,
    /// A query filled its batch before exhausting the range.
    HasMore,
    /// The node store could not allocate a node.
    SpaceNotAvail,
    /// A leaf put failed despite passing the size pre-check.
    PutFailed,
    /// An insert into a parent failed despite passing the size pre-check.
    InsertFailed,
    /// Checkpoint pass-through from a persistent store hook.
    CpMismatch,
    /// Fast-path pass-through from a persistent store hook.
    FastPathNotPossible,
    /// The backing store refused further allocations.
    ResourceFull,
    /// A node buffer failed its checksum on refresh.
    CrcMismatch,
    /// A merge window was examined but the left-most node is already full
    /// enough.
    MergeNotRequired,
    /// A node read observed a freed or stale handle.
    NodeFreed,
}

impl Status {
    /// Whether this status ends the current operation successfully.
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success | Status::HasMore)
    }

    /// Map a terminal status onto the public error type.
    ///
    /// Must not be called with `Retry`; the operation loops absorb it.
    pub(crate) fn into_result(self) -> Result<()> {
        match self {
            Status::Success | Status::HasMore | Status::MergeNotRequired => Ok(()),
            Status::NotFound => Err(BtreeError::NotFound("entry")),
            Status::SpaceNotAvail | Status::ResourceFull => Err(BtreeError::SpaceNotAvail),
            Status::PutFailed => Err(BtreeError::PutFailed("leaf insert rejected")),
            Status::InsertFailed => Err(BtreeError::PutFailed("interior insert rejected")),
            Status::CrcMismatch => Err(BtreeError::Corruption("node checksum mismatch")),
            Status::NodeFreed => Err(BtreeError::Corruption("stale node handle")),
            Status::Retry | Status::CpMismatch | Status::FastPathNotPossible => {
                Err(BtreeError::PutFailed("internal status escaped retry loop"))
            }
        }
    }
}
