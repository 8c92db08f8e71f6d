//! Bus error types

use thiserror::Error;

/// Error type for bus operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// Request was malformed (empty subject name)
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Publish addressed a subject with no live subscribers
    #[error("no such subject")]
    NoSuchSubject,

    /// Operation attempted on a closed bus
    #[error("bus is closed")]
    Closed,

    /// Close gave up waiting for in-flight handlers
    #[error("close deadline exceeded")]
    DeadlineExceeded,
}
