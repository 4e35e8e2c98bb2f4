// error.rs
//
// Public error taxonomy for the pipeline. Component errors propagate up
// through the queue as the job's terminal Failed reason; cache errors never
// leave the cache (a cache failure is a miss, not a job failure).

use thiserror::Error;

/// Errors from model acquisition and verification.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Network or HTTP failure while downloading. Retryable by the caller;
    /// the store does not retry internally.
    #[error("model download failed: {0}")]
    DownloadFailed(String),

    /// The downloaded file failed the size or magic-signature check.
    /// The temp file has been discarded; nothing was left at the
    /// destination path.
    #[error("downloaded model is corrupt: {0}")]
    CorruptDownload(String),

    /// Disk-level failure (create, write, rename). Surfaced as-is.
    #[error("model storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a single transcription attempt.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The audio file is missing, unreadable, or empty.
    #[error("invalid input audio: {0}")]
    InvalidInput(String),

    /// The decode call exceeded the configured hard timeout.
    #[error("decode timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The decoder ran but produced no usable text; carries the decoder's
    /// own error payload when it provided one.
    #[error("decoder processing failed: {0}")]
    ProcessingFailed(String),

    /// The decoder collaborator could not be invoked at all.
    #[error("decoder unavailable: {0}")]
    DecoderUnavailable(String),
}

/// Internal cache failures. Swallowed at the cache boundary and logged;
/// callers of the cache only ever observe a miss or a no-op.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted entry could not be deserialized.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

/// Errors from queue bookkeeping calls.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("no job with id {0}")]
    NotFound(crate::queue::JobId),

    /// The job exists but is not in a state the call applies to, e.g.
    /// asking for the result of a job that is still pending.
    #[error("job {0} is in state {1:?}")]
    InvalidState(crate::queue::JobId, crate::queue::JobStatus),
}
