//! Indexed random access to a MAF file
//!
//! [`IndexedMaf`] ties a file to its [`MafIndex`]: interval queries become
//! index lookups, lookups become a merged fetch plan, and fetched blocks
//! are checked again against the query before they are returned.
//!
//! # Example
//!
//! ```no_run
//! use biomaf::index::MafIndex;
//! use biomaf::maf::{BlockFilter, IndexedMaf, ParseOptions};
//! use biomaf::types::GenomicInterval;
//!
//! # fn main() -> biomaf::Result<()> {
//! let index = MafIndex::from_path("chr22.maf.bgz.mafi")?;
//! let maf = IndexedMaf::open("chr22.maf.bgz", index, ParseOptions::default().with_threads(4))?;
//!
//! let region = GenomicInterval::new("hg18.chr22", 16_000_000, 16_100_000)?;
//! let filter = BlockFilter::default().with_all_species(["hg18", "mm8"]);
//! for block in maf.query(&[region], &filter)? {
//!     println!("{} sequences, {} columns", block.sequences.len(), block.text_size());
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{MafError, Result};
use crate::fetch::pipeline::{fetcher_for, BlockFetcher, FileOpener};
use crate::fetch::planner::{plan, FetchRequest};
use crate::index::maf_index::MafIndex;
use crate::io::chunk::InputFormat;
use crate::maf::filter::BlockFilter;
use crate::maf::options::ParseOptions;
use crate::maf::parser::MafReader;
use crate::maf::record::{Block, Header};
use crate::types::GenomicInterval;
use std::path::{Path, PathBuf};
use tracing::info;

/// A MAF file opened together with its index
pub struct IndexedMaf {
    path: PathBuf,
    index: MafIndex,
    options: ParseOptions,
    opener: FileOpener,
    fetcher: Box<dyn BlockFetcher>,
}

impl IndexedMaf {
    /// Open `path` for queries through `index`
    ///
    /// # Errors
    ///
    /// Fails when the options are invalid, the file is plain gzip (which
    /// cannot be read at an offset) or the index was built for a different
    /// storage format.
    pub fn open<P: AsRef<Path>>(path: P, index: MafIndex, options: ParseOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let format = match options.format {
            Some(format) => format,
            None => InputFormat::detect(&path)?,
        };
        if format == InputFormat::Gzip {
            return Err(MafError::InvalidConfig(format!(
                "{} is gzip-compressed; random access needs BGZF",
                path.display()
            )));
        }
        if format.offset_space() != index.offset_space() {
            return Err(MafError::InvalidIndex(format!(
                "index uses {:?} offsets but {} is {:?}",
                index.offset_space(),
                path.display(),
                format
            )));
        }
        Ok(Self {
            opener: FileOpener::new(&path, format, &options),
            fetcher: fetcher_for(&options),
            path,
            index,
            options,
        })
    }

    /// Open `path` with an index file saved by [`MafIndex::write`]
    pub fn open_with_index_file<P: AsRef<Path>, Q: AsRef<Path>>(
        path: P,
        index_path: Q,
        options: ParseOptions,
    ) -> Result<Self> {
        let index = MafIndex::from_path(index_path)?;
        Self::open(path, index, options)
    }

    /// The index queries run against
    pub fn index(&self) -> &MafIndex {
        &self.index
    }

    /// Read the file header
    pub fn header(&self) -> Result<Header> {
        let options = self.options.clone().with_readahead(false);
        Ok(MafReader::from_path(&self.path, options)?.header().clone())
    }

    /// Fetch blocks by explicit requests, in request order
    pub fn fetch(&self, requests: &[FetchRequest]) -> Result<Vec<Block>> {
        let plan = plan(requests, self.index.offset_space(), self.options.merge_max);
        self.fetcher.fetch(&self.opener, &self.options, &plan)
    }

    /// Blocks overlapping any of `intervals` that pass `filter`, by offset
    pub fn query(&self, intervals: &[GenomicInterval], filter: &BlockFilter) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        self.query_each(intervals, filter, |block| {
            blocks.push(block);
            Ok(())
        })?;
        Ok(blocks)
    }

    /// Stream matching blocks to `sink` instead of collecting them
    pub fn query_each<F>(&self, intervals: &[GenomicInterval], filter: &BlockFilter, mut sink: F) -> Result<()>
    where
        F: FnMut(Block) -> Result<()>,
    {
        let entries = self.index.query(intervals);
        let requests = MafIndex::fetch_requests(&entries);
        let plan = plan(&requests, self.index.offset_space(), self.options.merge_max);

        let mut matched = 0usize;
        let mut fetched = 0usize;
        self.fetcher.fetch_each(&self.opener, &self.options, &plan, &mut |block| {
            fetched += 1;
            if overlaps_any(&block, intervals) && filter.matches(&block) {
                matched += 1;
                sink(block)?;
            }
            Ok(())
        })?;
        info!(
            intervals = intervals.len(),
            candidates = entries.len(),
            reads = plan.len(),
            fetched,
            matched,
            "MAF query complete"
        );
        Ok(())
    }
}

/// Whether some sequence of `block` overlaps a query interval on its own
/// source
fn overlaps_any(block: &Block, intervals: &[GenomicInterval]) -> bool {
    block.sequences.iter().filter(|s| !s.is_empty()).any(|seq| {
        let (start, end) = seq.forward_interval();
        intervals
            .iter()
            .any(|iv| iv.sequence == seq.source && iv.overlaps_range(start, end))
    })
}
