//! Error types for biomaf

use thiserror::Error;

/// Result type alias for biomaf operations
pub type Result<T> = std::result::Result<T, MafError>;

/// Error types that can occur in biomaf
#[derive(Debug, Error)]
pub enum MafError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed MAF text
    ///
    /// `offset` is the logical offset (linear or BGZF virtual) of the block
    /// or header being parsed; `context` holds the nearby text.
    #[error("Invalid MAF format at offset {offset}: {msg}\n  near: {context}")]
    Format {
        /// Logical byte offset where the problem was found
        offset: u64,
        /// Error message
        msg: String,
        /// Surrounding text for diagnosis
        context: String,
    },

    /// Fetched data does not match what the index promised
    #[error("Index/file inconsistency: {msg}")]
    Integrity {
        /// Error message
        msg: String,
    },

    /// Invalid parser or reader configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Invalid range or region
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Malformed or unsupported index file
    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    /// A fetch worker failed or panicked
    #[error("Fetch worker failed: {0}")]
    Worker(String),

    /// All fetch workers are gone but results are still outstanding
    #[error("Fetch pipeline stalled with {outstanding} request(s) outstanding")]
    PipelineStalled {
        /// Merged requests that never completed
        outstanding: usize,
    },
}

impl MafError {
    /// Build a format error, trimming the context to a readable length
    pub fn format(offset: u64, msg: impl Into<String>, context: &[u8]) -> Self {
        MafError::Format {
            offset,
            msg: msg.into(),
            context: excerpt(context),
        }
    }

    /// Whether this error reports an index/file inconsistency
    pub fn is_integrity(&self) -> bool {
        matches!(self, MafError::Integrity { .. })
    }
}

/// Maximum number of context bytes carried in a format error
const CONTEXT_LIMIT: usize = 160;

pub(crate) fn excerpt(text: &[u8]) -> String {
    let end = text.len().min(CONTEXT_LIMIT);
    let mut s = String::from_utf8_lossy(&text[..end]).into_owned();
    if text.len() > CONTEXT_LIMIT {
        s.push_str("...");
    }
    s
}
