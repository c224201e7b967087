//! Crate-level error type.
//!
//! Every fallible operation in the library returns [`HuntError`]. Errors are
//! always scoped to the current message turn; none of them is fatal to the
//! process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HuntError {
    /// The server replied with a non-2xx status and no structured body.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Connection, TLS or body-read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be read or parsed.
    #[error("config error in {path}: {detail}")]
    Config { path: String, detail: String },

    /// A marker pair is unusable (empty start or end marker).
    #[error("invalid markers: {0}")]
    InvalidMarkers(String),

    #[error("invalid guidance pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// A message is already in flight for this conversation.
    #[error("a message is already being processed")]
    Busy,

    #[error("message is empty and no image is attached")]
    EmptyMessage,

    #[error("message has {len} characters, the limit is {max}")]
    MessageTooLong { len: usize, max: usize },
}

impl HuntError {
    /// True for failures of the network path (as opposed to local validation).
    pub fn is_transport(&self) -> bool {
        matches!(self, HuntError::Http { .. } | HuntError::Transport(_))
    }
}
