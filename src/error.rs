//! Error types for ferropi

use std::time::Duration;

use thiserror::Error;

/// Result type for runtime and run-controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime and run-controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid rank specified
    #[error("Invalid rank: {0}")]
    InvalidRank(i32),

    /// Invalid count specified (e.g. a universe of zero workers)
    #[error("Invalid count: {0}")]
    InvalidCount(i64),

    /// Send and receive buffers of a collective disagree in length
    #[error("Invalid buffer: expected {expected} elements, got {actual}")]
    InvalidBuffer {
        /// Length required by the operation
        expected: usize,
        /// Length that was provided
        actual: usize,
    },

    /// A second send buffer was attached while one is still live
    #[error("A send buffer is already attached on rank {0}")]
    BufferAlreadyAttached(i32),

    /// The attached send buffer cannot hold another message
    #[error(
        "Send buffer exhausted: {requested} bytes requested, {available} of {capacity} available"
    )]
    BufferExhausted {
        /// Payload plus framing overhead of the rejected message
        requested: usize,
        /// Bytes still free in the buffer
        available: usize,
        /// Total capacity of the buffer
        capacity: usize,
    },

    /// A message payload exceeds the channel's maximum length
    #[error("Message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLong {
        /// Payload length
        len: usize,
        /// Largest accepted payload
        max: usize,
    },

    /// The receive buffer is smaller than the matched message
    #[error("Message truncated: {count} bytes pending, buffer holds {capacity}")]
    Truncated {
        /// Size of the pending message
        count: usize,
        /// Size of the receive buffer
        capacity: usize,
    },

    /// Participants disagree about which collective is being executed
    #[error("Collective mismatch at sequence {sequence}: expected {expected}, got {actual}")]
    CollectiveMismatch {
        /// Per-rank collective sequence number where the mismatch occurred
        sequence: u64,
        /// Signature recorded by the first participant
        expected: String,
        /// Signature presented by the late participant
        actual: String,
    },

    /// A blocking operation did not complete before the configured deadline
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Name of the stalled operation
        operation: &'static str,
        /// Configured timeout
        timeout: Duration,
    },

    /// Another worker failed and the universe was torn down
    #[error("Universe aborted: {0}")]
    Aborted(String),

    /// A worker thread panicked
    #[error("Worker {0} panicked")]
    WorkerPanicked(i32),

    /// Writing the report failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a consequence of some other worker failing.
    ///
    /// Used when collecting per-worker results so the root cause is reported
    /// instead of the cascade it triggered.
    pub fn is_secondary(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }

    /// Check a length pair, returning `InvalidBuffer` on mismatch.
    pub fn check_len(expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Error::InvalidBuffer { expected, actual })
        }
    }
}
