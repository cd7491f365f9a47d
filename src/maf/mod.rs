//! MAF (Multiple Alignment Format) parsing, writing and indexed access
//!
//! # Format
//!
//! A MAF file is a `##maf` header followed by alignment blocks:
//!
//! ```text
//! ##maf version=1 scoring=tba.v8
//! # tba.v8 (((human chimp) baboon) (mouse rat))
//!
//! a score=23262.0
//! s hg18.chr7    27578828 38 + 158545518 AAA-GGGAATGTTAACCAAATGA---ATTGTCTCTTACGGTG
//! s panTro1.chr6 28741140 38 + 161576975 AAA-GGGAATGTTAACCAAATGA---ATTGTCTCTTACGGTG
//! i panTro1.chr6 N 0 C 0
//! e mm4.chr6     53310102 13 + 151104725 I
//! ```
//!
//! - `a`: block start with `key=value` variables
//! - `s`: aligned sequence (source, start, size, strand, source size, text)
//! - `e`: species with no aligning bases here (status code instead of text)
//! - `i`: synteny information for the preceding `s` line
//! - `q`: per-column quality for the preceding `s` line
//!
//! Coordinates are zero-based; reverse-strand starts count from the end of
//! the source sequence.
//!
//! # Modules
//!
//! - [`parser`]: streaming reader over chunked sources
//! - [`access`]: indexed random access
//! - [`writer`]: MAF output

pub mod access;
pub mod filter;
pub mod grammar;
pub mod options;
pub mod parser;
pub mod record;
pub mod writer;

pub use access::IndexedMaf;
pub use filter::BlockFilter;
pub use grammar::{GrammarError, LineRecord};
pub use options::{ParseOptions, SequenceFilter};
pub use parser::{parse_block, parse_blocks_at, MafReader};
pub use record::{Block, Header, Sequence, SequenceData};
pub use writer::MafWriter;
