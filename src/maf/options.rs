//! Parser and reader configuration

use crate::error::{MafError, Result};
use crate::io::chunk::{check_chunk_size, InputFormat};
use crate::maf::record::species_of;
use std::collections::HashSet;

/// Default sequential chunk size (8 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Default positioned-read granularity (4 KiB)
pub const DEFAULT_RANDOM_CHUNK_SIZE: usize = 4096;

/// Default upper bound on a merged fetch (8 MiB)
pub const DEFAULT_MERGE_MAX: u64 = 8 * 1024 * 1024;

/// Chunks buffered ahead of the parser when read-ahead is enabled
pub const DEFAULT_READAHEAD_DEPTH: usize = 4;

/// Which sequences of a block are kept
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SequenceFilter {
    /// Keep every sequence
    #[default]
    All,
    /// Keep only sequences whose species is listed
    OnlySpecies(HashSet<String>),
}

impl SequenceFilter {
    /// Keep only the given species
    pub fn only_species<I, S>(species: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SequenceFilter::OnlySpecies(species.into_iter().map(Into::into).collect())
    }

    /// Whether a sequence with this source name is kept
    #[inline]
    pub fn accepts(&self, source: &str) -> bool {
        match self {
            SequenceFilter::All => true,
            SequenceFilter::OnlySpecies(set) => set.contains(species_of(source)),
        }
    }
}

/// Options shared by the streaming parser and indexed access
///
/// # Example
///
/// ```
/// use biomaf::maf::ParseOptions;
///
/// let options = ParseOptions::default()
///     .with_extended(true)
///     .with_threads(4)
///     .only_species(["hg18", "mm4"]);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Parse `i` and `q` lines
    pub parse_extended: bool,
    /// Parse `e` lines
    pub parse_empty: bool,
    /// Sequential chunk size; power of two
    pub chunk_size: usize,
    /// Positioned-read granularity; power of two
    pub random_chunk_size: usize,
    /// Largest merged fetch for plain files, in bytes
    pub merge_max: u64,
    /// Fetch threads; 1 selects the sequential fetcher
    pub threads: usize,
    /// Treat unrecognized lines as errors
    pub strict: bool,
    /// Sequences kept in parsed blocks
    pub sequence_filter: SequenceFilter,
    /// Prefetch chunks on a background thread while streaming
    pub readahead: bool,
    /// Input format; `None` detects from the path
    pub format: Option<InputFormat>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            parse_extended: false,
            parse_empty: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            random_chunk_size: DEFAULT_RANDOM_CHUNK_SIZE,
            merge_max: DEFAULT_MERGE_MAX,
            threads: 1,
            strict: false,
            sequence_filter: SequenceFilter::All,
            readahead: false,
            format: None,
        }
    }
}

impl ParseOptions {
    /// Parse `i` and `q` lines
    pub fn with_extended(mut self, enabled: bool) -> Self {
        self.parse_extended = enabled;
        self
    }

    /// Parse `e` lines
    pub fn with_empty(mut self, enabled: bool) -> Self {
        self.parse_empty = enabled;
        self
    }

    /// Set the sequential chunk size
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the positioned-read granularity
    pub fn with_random_chunk_size(mut self, size: usize) -> Self {
        self.random_chunk_size = size;
        self
    }

    /// Set the largest merged fetch
    pub fn with_merge_max(mut self, bytes: u64) -> Self {
        self.merge_max = bytes;
        self
    }

    /// Set the number of fetch threads
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Reject unrecognized lines instead of warning
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Keep only sequences of the given species
    pub fn only_species<I, S>(mut self, species: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sequence_filter = SequenceFilter::only_species(species);
        self
    }

    /// Prefetch chunks on a background thread
    pub fn with_readahead(mut self, enabled: bool) -> Self {
        self.readahead = enabled;
        self
    }

    /// Force an input format instead of detecting it
    pub fn with_format(mut self, format: InputFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Check the options before any I/O happens
    pub fn validate(&self) -> Result<()> {
        check_chunk_size("chunk size", self.chunk_size)?;
        check_chunk_size("random-access chunk size", self.random_chunk_size)?;
        if self.threads == 0 {
            return Err(MafError::InvalidConfig(
                "thread count must be at least 1".to_string(),
            ));
        }
        if self.merge_max == 0 {
            return Err(MafError::InvalidConfig(
                "merge limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
