//! Genomic interval index for random access
//!
//! - [`bins`]: UCSC hierarchical binning
//! - [`maf_index`]: block index build, query and persistence

pub mod bins;
pub mod maf_index;

pub use bins::{bin_from_range, bin_level, bin_ranges};
pub use maf_index::{IndexEntry, IndexMode, MafIndex};
