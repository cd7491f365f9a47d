//! Spatial index over MAF blocks
//!
//! A [`MafIndex`] maps genomic intervals to the blocks aligning them. It is
//! built from one streaming pass over the file and can be saved next to
//! it for later random access.
//!
//! # File format
//!
//! Little-endian binary, gzip-compressed on write. Uncompressed files are
//! accepted on load.
//!
//! ## Header
//! - Magic: `MAFI\x01` (5 bytes)
//! - mode: `0` = reference sequence only, `1` = all sequences (u8)
//! - offset space: `0` = linear, `1` = BGZF virtual (u8)
//! - n_blocks: Blocks seen while building (u64)
//! - n_seq: Number of indexed sequence names (u32)
//!
//! ## Per sequence
//! - l_name: Name length (u32), then the UTF-8 name
//! - n_entry: Number of entries (u64)
//! - entries: `bin` (u32), `start`, `end`, `offset`, `length` (u64 each)
//!
//! # Example
//!
//! ```no_run
//! use biomaf::index::{IndexMode, MafIndex};
//! use biomaf::maf::ParseOptions;
//! use biomaf::types::GenomicInterval;
//!
//! # fn main() -> biomaf::Result<()> {
//! let index = MafIndex::build_from_path("chr22.maf.bgz", IndexMode::Reference, ParseOptions::default())?;
//! index.write("chr22.maf.bgz.mafi")?;
//!
//! let hits = index.query(&[GenomicInterval::new("hg18.chr22", 16_000_000, 16_100_000)?]);
//! println!("{} candidate blocks", hits.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{MafError, Result};
use crate::fetch::planner::FetchRequest;
use crate::index::bins::{bin_from_range, bin_ranges, MAX_COORDINATE};
use crate::io::chunk::{ChunkSource, OffsetSpace};
use crate::maf::options::{ParseOptions, SequenceFilter};
use crate::maf::parser::MafReader;
use crate::maf::record::Block;
use crate::types::GenomicInterval;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Index file magic
const INDEX_MAGIC: &[u8; 5] = b"MAFI\x01";

/// Longest sequence name accepted when loading
const MAX_NAME_LEN: u32 = 1 << 16;

/// Which sequences of each block are indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Only the first (reference) sequence
    Reference,
    /// Every aligned sequence
    AllSequences,
}

impl IndexMode {
    fn to_u8(self) -> u8 {
        match self {
            IndexMode::Reference => 0,
            IndexMode::AllSequences => 1,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(IndexMode::Reference),
            1 => Ok(IndexMode::AllSequences),
            _ => Err(MafError::InvalidIndex(format!("unknown index mode {}", value))),
        }
    }
}

/// One occurrence of a sequence in a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    /// UCSC bin of `[start, end)`
    pub bin: u32,
    /// Forward-strand start of the aligned region
    pub start: u64,
    /// Forward-strand end of the aligned region
    pub end: u64,
    /// Logical offset of the block
    pub offset: u64,
    /// Bytes of block text
    pub length: u64,
}

impl IndexEntry {
    /// Whether the entry's region overlaps `[start, end)`
    #[inline]
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }
}

/// Interval index over the blocks of one MAF file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MafIndex {
    mode: IndexMode,
    space: OffsetSpace,
    sequences: BTreeMap<String, Vec<IndexEntry>>,
    block_count: u64,
}

impl MafIndex {
    /// Create an empty index
    pub fn new(mode: IndexMode, space: OffsetSpace) -> Self {
        Self {
            mode,
            space,
            sequences: BTreeMap::new(),
            block_count: 0,
        }
    }

    /// Index every block produced by `reader`
    ///
    /// # Errors
    ///
    /// The reader must not filter sequences; an index built from filtered
    /// blocks would miss alignments.
    pub fn build<S: ChunkSource>(reader: MafReader<S>, mode: IndexMode) -> Result<Self> {
        if reader.options().sequence_filter != SequenceFilter::All {
            return Err(MafError::InvalidConfig(
                "cannot build an index from a reader with a sequence filter".to_string(),
            ));
        }
        let start = Instant::now();
        let mut index = Self::new(mode, reader.offset_space());
        for block in reader {
            index.add_block(&block?)?;
        }
        index.sort();
        info!(
            blocks = index.block_count,
            sequences = index.sequences.len(),
            entries = index.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "built MAF index"
        );
        Ok(index)
    }

    /// Open a MAF file and index it
    pub fn build_from_path<P: AsRef<Path>>(path: P, mode: IndexMode, options: ParseOptions) -> Result<Self> {
        Self::build(MafReader::from_path(path, options)?, mode)
    }

    /// Add the sequences of one block
    ///
    /// `e` sequences carry no aligned bases and are not indexed.
    pub fn add_block(&mut self, block: &Block) -> Result<()> {
        let selected = match self.mode {
            IndexMode::Reference => &block.sequences[..block.sequences.len().min(1)],
            IndexMode::AllSequences => &block.sequences[..],
        };
        for seq in selected.iter().filter(|s| !s.is_empty() && s.size > 0) {
            let (start, end) = seq.forward_interval();
            if end > MAX_COORDINATE {
                return Err(MafError::InvalidRange(format!(
                    "{}:{}-{} is beyond the largest indexable coordinate",
                    seq.source, start, end
                )));
            }
            self.sequences.entry(seq.source.clone()).or_default().push(IndexEntry {
                bin: bin_from_range(start, end),
                start,
                end,
                offset: block.offset,
                length: block.size as u64,
            });
        }
        self.block_count += 1;
        Ok(())
    }

    fn sort(&mut self) {
        for entries in self.sequences.values_mut() {
            entries.sort_by_key(|e| (e.bin, e.start, e.offset));
        }
    }

    /// Which sequences are indexed
    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    /// Offset space of the indexed file
    pub fn offset_space(&self) -> OffsetSpace {
        self.space
    }

    /// Blocks seen while building
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Names of the indexed sequences, sorted
    pub fn sequence_names(&self) -> impl Iterator<Item = &str> {
        self.sequences.keys().map(String::as_str)
    }

    /// Entries of one sequence, ordered by bin
    pub fn entries(&self, sequence: &str) -> &[IndexEntry] {
        self.sequences.get(sequence).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.sequences.values().map(Vec::len).sum()
    }

    /// Whether the index has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries overlapping any of `intervals`, one per block, by offset
    pub fn query(&self, intervals: &[GenomicInterval]) -> Vec<IndexEntry> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for interval in intervals {
            let entries = self.entries(&interval.sequence);
            if entries.is_empty() {
                continue;
            }
            for (lo, hi) in bin_ranges(interval.start, interval.end) {
                let first = entries.partition_point(|e| e.bin < lo);
                for entry in entries[first..].iter().take_while(|e| e.bin <= hi) {
                    if entry.overlaps(interval.start, interval.end) && seen.insert(entry.offset) {
                        hits.push(*entry);
                    }
                }
            }
        }
        hits.sort_by_key(|e| e.offset);
        hits
    }

    /// One fetch request per entry, in entry order
    pub fn fetch_requests(entries: &[IndexEntry]) -> Vec<FetchRequest> {
        entries
            .iter()
            .map(|e| FetchRequest::single(e.offset, e.length))
            .collect()
    }

    /// Save the index, gzip-compressed
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        self.write_to(&mut encoder)?;
        encoder.finish()?.flush()?;
        Ok(())
    }

    /// Serialize the uncompressed index
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(INDEX_MAGIC)?;
        writer.write_all(&[
            self.mode.to_u8(),
            match self.space {
                OffsetSpace::Linear => 0,
                OffsetSpace::Virtual => 1,
            },
        ])?;
        writer.write_all(&self.block_count.to_le_bytes())?;
        writer.write_all(&(self.sequences.len() as u32).to_le_bytes())?;
        for (name, entries) in &self.sequences {
            writer.write_all(&(name.len() as u32).to_le_bytes())?;
            writer.write_all(name.as_bytes())?;
            writer.write_all(&(entries.len() as u64).to_le_bytes())?;
            for e in entries {
                writer.write_all(&e.bin.to_le_bytes())?;
                for value in [e.start, e.end, e.offset, e.length] {
                    writer.write_all(&value.to_le_bytes())?;
                }
            }
        }
        Ok(())
    }

    /// Load an index, gzip-compressed or not
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut magic = [0u8; 2];
        File::open(path.as_ref())?.read_exact(&mut magic).map_err(truncated)?;

        let file = File::open(path.as_ref())?;
        if magic == [0x1f, 0x8b] {
            Self::parse(&mut BufReader::new(GzDecoder::new(file)))
        } else {
            Self::parse(&mut BufReader::new(file))
        }
    }

    /// Parse an uncompressed index
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 5];
        reader.read_exact(&mut magic).map_err(truncated)?;
        if &magic != INDEX_MAGIC {
            return Err(MafError::InvalidIndex(format!(
                "bad magic: expected {:?}, got {:?}",
                INDEX_MAGIC, magic
            )));
        }
        let mode = IndexMode::from_u8(read_u8(reader)?)?;
        let space = match read_u8(reader)? {
            0 => OffsetSpace::Linear,
            1 => OffsetSpace::Virtual,
            other => {
                return Err(MafError::InvalidIndex(format!("unknown offset space {}", other)));
            }
        };
        let block_count = read_u64(reader)?;
        let n_seq = read_u32(reader)?;

        let mut sequences = BTreeMap::new();
        for _ in 0..n_seq {
            let l_name = read_u32(reader)?;
            if l_name > MAX_NAME_LEN {
                return Err(MafError::InvalidIndex(format!("sequence name of {} bytes", l_name)));
            }
            let mut name = vec![0u8; l_name as usize];
            reader.read_exact(&mut name).map_err(truncated)?;
            let name = String::from_utf8(name)
                .map_err(|e| MafError::InvalidIndex(format!("sequence name is not UTF-8: {}", e)))?;

            let n_entry = read_u64(reader)?;
            let mut entries = Vec::new();
            for _ in 0..n_entry {
                let bin = read_u32(reader)?;
                let entry = IndexEntry {
                    bin,
                    start: read_u64(reader)?,
                    end: read_u64(reader)?,
                    offset: read_u64(reader)?,
                    length: read_u64(reader)?,
                };
                if entry.start >= entry.end || entry.bin != bin_from_range(entry.start, entry.end) {
                    return Err(MafError::InvalidIndex(format!(
                        "inconsistent entry for {}: bin {} for {}-{}",
                        name, entry.bin, entry.start, entry.end
                    )));
                }
                entries.push(entry);
            }
            sequences.insert(name, entries);
        }

        let mut index = MafIndex {
            mode,
            space,
            sequences,
            block_count,
        };
        index.sort();
        Ok(index)
    }
}

fn truncated(e: io::Error) -> MafError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        MafError::InvalidIndex("index file is truncated".to_string())
    } else {
        MafError::Io(e)
    }
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(u64::from_le_bytes(buf))
}
