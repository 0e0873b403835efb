//! Error types for the explorer index

use thiserror::Error;

/// Explorer error type
#[derive(Debug, Error)]
pub enum Error {
    /// Storage backend error (RocksDB)
    #[error("storage error: {0}")]
    Storage(String),

    /// A write transaction is already active
    #[error("storage unavailable: a write transaction is already active")]
    Busy,

    /// The index contradicts itself or a delta references unknown state.
    ///
    /// Signals corruption or a malformed delta. The update engine is not
    /// safe to continue after returning this.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Operation attempted after shutdown
    #[error("engine is closed")]
    Closed,

    /// Bincode serialization error
    #[error("codec error: {0}")]
    Bincode(#[from] bincode::Error),

    /// I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for explorer operations
pub type Result<T> = std::result::Result<T, Error>;
