use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChainwatchErr>;

#[derive(Error, Debug)]
pub enum ChainwatchErr {
    /// Malformed action, policy, or approval key.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced approval record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation conflicts with the record's lifecycle state, e.g. a
    /// second consume of the same approval.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The audit hash chain does not verify. Carries the zero-based index
    /// of the first entry whose `prev_hash` fails to match.
    #[error("audit chain integrity broken at entry {index}")]
    Integrity { index: usize },

    /// The SSE stream disconnected or produced unusable frames. Parse
    /// errors on individual tool calls do NOT produce this; they are
    /// recorded on the call itself and the stream continues.
    #[error("stream error: {0}")]
    Stream(String),

    /// Idle timeout while waiting for upstream SSE data.
    #[error("timeout waiting for stream data")]
    Timeout,

    /// The caller cancelled: the downstream receiver hung up while the
    /// stream was still in flight.
    #[error("interrupted by caller")]
    Interrupted,

    /// A remote policy endpoint could not be reached. Callers must treat
    /// this as a Deny.
    #[error("policy endpoint unreachable: {0}")]
    Unreachable(String),

    /// The wrapped child process could not be started.
    #[error("spawn failed: child process could not be started")]
    Spawn,

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("policy file parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
