//! Output destinations for MAF writing
//!
//! `DataSink` is the write-side counterpart of a MAF input path. The
//! compression applied on write is chosen from the file extension:
//!
//! - `.bgz` / `.bgzf` → BGZF (block-compressed, indexable)
//! - `.gz` → plain gzip (sequential reading only)
//! - anything else → uncompressed
//!
//! # Example
//!
//! ```
//! use biomaf::io::{DataSink, SinkCompression};
//!
//! let sink = DataSink::from_path("chr22.maf.bgz");
//! assert_eq!(sink.compression(), SinkCompression::Bgzf);
//! ```

use std::path::{Path, PathBuf};

/// Compression applied when writing to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCompression {
    /// No compression
    None,
    /// Single-stream gzip
    Gzip,
    /// Blocked gzip with the `BC` extra subfield
    Bgzf,
}

/// Output destination for streaming writes
#[derive(Debug, Clone)]
pub enum DataSink {
    /// Write to a local file path
    Local(PathBuf),

    /// Write to standard output (always uncompressed)
    Stdout,
}

impl DataSink {
    /// Create a sink from a file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self::Local(path.as_ref().to_path_buf())
    }

    /// Create a sink for standard output
    pub fn stdout() -> Self {
        Self::Stdout
    }

    pub(crate) fn extension(&self) -> Option<&str> {
        match self {
            Self::Local(path) => path.extension().and_then(|s| s.to_str()),
            Self::Stdout => None,
        }
    }

    /// Compression implied by the sink's file extension
    pub fn compression(&self) -> SinkCompression {
        match self.extension() {
            Some("bgz") | Some("bgzf") => SinkCompression::Bgzf,
            Some("gz") | Some("gzip") => SinkCompression::Gzip,
            _ => SinkCompression::None,
        }
    }
}
