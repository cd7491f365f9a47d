//! biomaf: chunked MAF parsing with indexed random access
//!
//! # Overview
//!
//! biomaf reads Multiple Alignment Format (MAF) files of any size without
//! loading them into memory, and retrieves the blocks overlapping genomic
//! intervals through an on-disk bin index.
//!
//! ## Key Features
//!
//! - **Streaming**: fixed-size chunks, blocks joined across chunk boundaries
//! - **Compression**: plain, gzip (sequential) and BGZF (random access)
//! - **Indexed queries**: UCSC binning over reference or all sequences
//! - **Parallel fetch**: separate I/O and parse worker pools, results in
//!   request order
//!
//! ## Quick Start
//!
//! ```no_run
//! use biomaf::{MafReader, ParseOptions};
//!
//! # fn main() -> biomaf::Result<()> {
//! let reader = MafReader::from_path("chr22.maf.gz", ParseOptions::default())?;
//!
//! for block in reader {
//!     let block = block?;
//!     if let Some(reference) = block.reference() {
//!         println!("{}:{}-{}", reference.source, reference.start, reference.end());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Random Access
//!
//! ```no_run
//! use biomaf::{BlockFilter, IndexMode, IndexedMaf, MafIndex, ParseOptions};
//! use biomaf::types::GenomicInterval;
//!
//! # fn main() -> biomaf::Result<()> {
//! let index = MafIndex::build_from_path("chr22.maf.bgz", IndexMode::Reference, ParseOptions::default())?;
//! let maf = IndexedMaf::open("chr22.maf.bgz", index, ParseOptions::default().with_threads(4))?;
//!
//! let region = GenomicInterval::new("hg18.chr22", 16_000_000, 16_100_000)?;
//! let blocks = maf.query(&[region], &BlockFilter::default())?;
//! println!("{} blocks", blocks.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! biomaf emits [`tracing`](https://docs.rs/tracing) events and never
//! installs a subscriber; applications choose where they go.
//!
//! ## Module Organization
//!
//! - [`io`]: chunk sources, BGZF codec, output sinks
//! - [`maf`]: data model, grammar, streaming parser, writer, indexed access
//! - [`fetch`]: fetch planning and the sequential/threaded fetchers
//! - [`index`]: binning scheme and block index
//! - [`types`]: genomic intervals and strands

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod fetch;
pub mod index;
pub mod io;
pub mod maf;
pub mod types;

// Re-export commonly used types
pub use error::{MafError, Result};
pub use index::{IndexMode, MafIndex};
pub use maf::{Block, BlockFilter, Header, IndexedMaf, MafReader, MafWriter, ParseOptions, Sequence};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
