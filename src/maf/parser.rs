//! Streaming MAF parser
//!
//! # Chunk boundaries
//!
//! The file arrives as independently read chunks, so a block may start in
//! one chunk and end several chunks later. The reader tracks the rightmost
//! block start of the current chunk (`last_block_pos`):
//!
//! - A block starting before `last_block_pos` ends inside the chunk and is
//!   parsed in place.
//! - The block at `last_block_pos` is a trailing fragment. Following chunks
//!   are appended to it until one contains a block start (or data ends),
//!   the joined text is parsed as one block, and scanning resumes at that
//!   block start in the new chunk.
//!
//! A block start is an `a` at the beginning of a line. An `a` at index 0 of
//! a chunk only counts when the text before it ended with `\n`.
//!
//! # Example
//!
//! ```no_run
//! use biomaf::maf::{MafReader, ParseOptions};
//!
//! let mut reader = MafReader::from_path("chr22.maf", ParseOptions::default())?;
//! println!("MAF version {}", reader.header().version());
//! for block in reader {
//!     let block = block?;
//!     println!("{} sequences at offset {}", block.sequences.len(), block.offset);
//! }
//! # Ok::<(), biomaf::MafError>(())
//! ```

use crate::error::{excerpt, MafError, Result};
use crate::io::chunk::{open_chunk_source, ChunkSource, InputFormat, OffsetSpace, ReadAheadSource};
use crate::maf::grammar::{self, GrammarError, LineRecord};
use crate::maf::options::{ParseOptions, DEFAULT_READAHEAD_DEPTH};
use crate::maf::record::{Block, Header, Sequence};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// Whether `data[i]` begins a block
///
/// `line_start` says whether the byte before `data[0]` was a newline (or
/// `data[0]` is the start of the file).
#[inline]
pub(crate) fn is_block_start(data: &[u8], i: usize, line_start: bool) -> bool {
    if data.get(i) != Some(&b'a') {
        return false;
    }
    if i == 0 {
        line_start
    } else {
        data[i - 1] == b'\n'
    }
}

/// First block start at or after `from`
pub(crate) fn find_block_start(data: &[u8], from: usize, line_start: bool) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    if is_block_start(data, from, line_start) {
        return Some(from);
    }
    let mut i = from;
    while let Some(p) = data[i..].iter().position(|&b| b == b'\n') {
        let next = i + p + 1;
        if data.get(next) == Some(&b'a') {
            return Some(next);
        }
        i = next;
    }
    None
}

/// Last block start at or after `from`
pub(crate) fn rfind_block_start(data: &[u8], from: usize, line_start: bool) -> Option<usize> {
    let mut end = data.len();
    while end > from {
        match data[from..end].iter().rposition(|&b| b == b'\n') {
            Some(p) => {
                let nl = from + p;
                if data.get(nl + 1) == Some(&b'a') {
                    return Some(nl + 1);
                }
                end = nl;
            }
            None => break,
        }
    }
    if is_block_start(data, from, line_start) {
        Some(from)
    } else {
        None
    }
}

fn grammar_error(offset: u64, err: GrammarError, line: &str) -> MafError {
    MafError::format(offset, err.to_string(), line.as_bytes())
}

/// Which sequence an `i`/`q` line may attach to
enum Previous<'a> {
    None,
    Kept(usize),
    Dropped(&'a str),
}

/// Parse the text of exactly one block
///
/// `text` runs from the `a` line up to (not including) the next block
/// start; `offset` is the logical offset of its first byte.
pub fn parse_block(text: &[u8], offset: u64, options: &ParseOptions) -> Result<Block> {
    let text_str = std::str::from_utf8(text)
        .map_err(|e| MafError::format(offset, format!("block is not valid UTF-8: {}", e), text))?;
    let mut lines = text_str.split('\n');
    let first = lines.next().unwrap_or_default().trim_end_matches('\r');
    let vars = grammar::parse_block_line(first).map_err(|e| grammar_error(offset, e, first))?;

    let mut sequences = Vec::new();
    let mut filtered = false;
    let mut previous = Previous::None;

    for line in lines {
        let record = grammar::parse_line(line, options.parse_extended, options.parse_empty)
            .map_err(|e| grammar_error(offset, e, line))?;
        match record {
            LineRecord::Sequence(seq) => {
                if options.sequence_filter.accepts(&seq.source) {
                    sequences.push(seq);
                    previous = Previous::Kept(sequences.len() - 1);
                } else {
                    filtered = true;
                    previous = Previous::Dropped(line.split_ascii_whitespace().nth(1).unwrap_or(""));
                }
            }
            LineRecord::Synteny { source, data } => {
                attach(&mut sequences, &previous, 'i', source, |s| s.set_synteny(data))
                    .map_err(|e| grammar_error(offset, e, line))?;
            }
            LineRecord::Quality { source, data } => {
                attach(&mut sequences, &previous, 'q', source, |s| s.set_quality(data))
                    .map_err(|e| grammar_error(offset, e, line))?;
            }
            LineRecord::Ignored | LineRecord::Disabled(_) => {}
            LineRecord::Unknown(tag) => {
                if options.strict {
                    return Err(grammar_error(offset, GrammarError::UnknownTag(tag), line));
                }
                warn!(offset, tag = %tag, "ignoring unrecognized MAF line");
            }
        }
    }

    Ok(Block {
        vars,
        sequences,
        offset,
        size: text.len(),
        filtered,
    })
}

fn attach<F>(
    sequences: &mut [Sequence],
    previous: &Previous<'_>,
    tag: char,
    source: &str,
    apply: F,
) -> std::result::Result<(), GrammarError>
where
    F: FnOnce(&mut Sequence) -> std::result::Result<(), GrammarError>,
{
    let expected = match previous {
        Previous::None => return Err(GrammarError::Orphan(tag)),
        Previous::Kept(idx) => sequences[*idx].source.as_str(),
        Previous::Dropped(src) => src,
    };
    if expected != source {
        return Err(GrammarError::SourceMismatch {
            tag,
            expected: expected.to_string(),
            found: source.to_string(),
        });
    }
    match previous {
        Previous::Kept(idx) => apply(&mut sequences[*idx]),
        _ => Ok(()),
    }
}

/// Parse the blocks starting at `expected` offsets in a fetched buffer
///
/// `buf` holds the bytes read at logical offset `base`. Every expected
/// offset must be a block start in `buf`, and the buffer itself must begin
/// at a block start; anything else means the index does not describe this
/// file. Blocks are returned in the order of `expected`.
pub fn parse_blocks_at(
    buf: &[u8],
    base: u64,
    expected: &[u64],
    space: OffsetSpace,
    options: &ParseOptions,
) -> Result<Vec<Block>> {
    if !is_block_start(buf, 0, true) {
        return Err(MafError::Integrity {
            msg: format!(
                "no block starts at offset {}; found '{}'",
                base,
                excerpt(&buf[..buf.len().min(40)])
            ),
        });
    }

    let wanted: HashSet<u64> = expected.iter().copied().collect();
    let mut found = Vec::with_capacity(expected.len());
    let mut pos = Some(0);
    while let Some(start) = pos {
        let next = find_block_start(buf, start + 1, true);
        let offset = space.advance(base, start);
        if wanted.contains(&offset) {
            let end = next.unwrap_or(buf.len());
            found.push(parse_block(&buf[start..end], offset, options)?);
        }
        pos = next;
    }

    if found.len() != wanted.len() {
        let seen: HashSet<u64> = found.iter().map(|b| b.offset).collect();
        let missing: Vec<u64> = expected.iter().copied().filter(|o| !seen.contains(o)).collect();
        return Err(MafError::Integrity {
            msg: format!(
                "fetched {} of {} blocks at offset {}; no block starts at {:?}",
                found.len(),
                wanted.len(),
                base,
                missing
            ),
        });
    }

    // Duplicate requests for one block each get their own copy.
    expected
        .iter()
        .map(|offset| {
            found
                .iter()
                .find(|b| b.offset == *offset)
                .cloned()
                .ok_or_else(|| MafError::Integrity {
                    msg: format!("block at offset {} missing from fetch", offset),
                })
        })
        .collect()
}

/// Sequential, forward-only MAF reader over a [`ChunkSource`]
///
/// Blocks are produced lazily in file order; the whole file is never held
/// in memory. Iteration stops after the first error.
pub struct MafReader<S: ChunkSource = Box<dyn ChunkSource>> {
    source: S,
    options: ParseOptions,
    space: OffsetSpace,
    header: Header,
    chunk: Vec<u8>,
    chunk_offset: u64,
    chunk_line_start: bool,
    pos: usize,
    last_block_pos: Option<usize>,
    finished: bool,
}

impl MafReader<Box<dyn ChunkSource>> {
    /// Open a MAF file, detecting plain, gzip or BGZF storage
    ///
    /// # Errors
    ///
    /// Configuration problems are reported before the file is opened.
    pub fn from_path<P: AsRef<Path>>(path: P, options: ParseOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();
        let format = match options.format {
            Some(format) => format,
            None => InputFormat::detect(path)?,
        };
        let mut source = open_chunk_source(path, format, options.chunk_size, options.random_chunk_size)?;
        if options.readahead {
            source = Box::new(ReadAheadSource::new(source, DEFAULT_READAHEAD_DEPTH)?);
        }
        debug!(path = %path.display(), ?format, chunk_size = options.chunk_size, "opened MAF file");
        Self::new(source, options)
    }
}

impl<S: ChunkSource> MafReader<S> {
    /// Create a reader and parse the header
    pub fn new(mut source: S, options: ParseOptions) -> Result<Self> {
        options.validate()?;
        let space = source.offset_space();

        // Accumulate chunks until the first block start. It always lies in
        // the last chunk read, which becomes the current chunk.
        let mut acc: Vec<u8> = Vec::new();
        let mut last_start = 0usize;
        let mut last_offset = 0u64;
        let first_block = loop {
            match source.read_next_chunk()? {
                Some(chunk) => {
                    last_start = acc.len();
                    last_offset = chunk.offset;
                    acc.extend_from_slice(&chunk.data);
                    if let Some(b) = find_block_start(&acc, last_start, true) {
                        break Some(b);
                    }
                }
                None => break None,
            }
        };

        let header_end = first_block.unwrap_or(acc.len());
        let header = parse_header_text(&acc[..header_end], &options)?;

        let mut reader = Self {
            source,
            options,
            space,
            header,
            chunk: Vec::new(),
            chunk_offset: 0,
            chunk_line_start: true,
            pos: 0,
            last_block_pos: None,
            finished: first_block.is_none(),
        };
        if let Some(b) = first_block {
            reader.chunk_line_start = last_start == 0 || acc[last_start - 1] == b'\n';
            reader.chunk = acc.split_off(last_start);
            reader.chunk_offset = last_offset;
            reader.pos = b - last_start;
            reader.last_block_pos =
                rfind_block_start(&reader.chunk, reader.pos, reader.chunk_line_start);
        }
        Ok(reader)
    }

    /// The parsed file header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Options this reader was created with
    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Offset arithmetic of the underlying source
    pub fn offset_space(&self) -> OffsetSpace {
        self.space
    }

    /// Parse the next block, or `None` at end of data
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }
        let result = match self.last_block_pos {
            Some(last) if self.pos < last => self.contained_block(last).map(Some),
            _ if self.pos < self.chunk.len() => self.trailing_block().map(Some),
            _ => {
                self.finished = true;
                Ok(None)
            }
        };
        if result.is_err() {
            self.finished = true;
        }
        result
    }

    fn contained_block(&mut self, last: usize) -> Result<Block> {
        let end = find_block_start(&self.chunk, self.pos + 1, self.chunk_line_start).unwrap_or(last);
        let offset = self.space.advance(self.chunk_offset, self.pos);
        let block = parse_block(&self.chunk[self.pos..end], offset, &self.options)?;
        self.pos = end;
        Ok(block)
    }

    fn trailing_block(&mut self) -> Result<Block> {
        let offset = self.space.advance(self.chunk_offset, self.pos);
        let mut joined = std::mem::take(&mut self.chunk);
        joined.drain(..self.pos);
        let trailing_len = joined.len();

        loop {
            let chunk = match self.source.read_next_chunk()? {
                Some(chunk) => chunk,
                None => {
                    self.finished = true;
                    return parse_joined(&joined, trailing_len, offset, &self.options);
                }
            };
            let line_start = joined.last() == Some(&b'\n');
            match find_block_start(&chunk.data, 0, line_start) {
                Some(i) => {
                    joined.extend_from_slice(&chunk.data[..i]);
                    debug!(
                        offset,
                        trailing = trailing_len,
                        leading = joined.len() - trailing_len,
                        "joined block across chunk boundary"
                    );
                    let block = parse_joined(&joined, trailing_len, offset, &self.options)?;
                    self.chunk = chunk.data;
                    self.chunk_offset = chunk.offset;
                    self.chunk_line_start = line_start;
                    self.pos = i;
                    self.last_block_pos = rfind_block_start(&self.chunk, i, line_start);
                    return Ok(block);
                }
                None => joined.extend_from_slice(&chunk.data),
            }
        }
    }
}

fn parse_header_text(text: &[u8], options: &ParseOptions) -> Result<Header> {
    let text_str = std::str::from_utf8(text)
        .map_err(|e| MafError::format(0, format!("header is not valid UTF-8: {}", e), text))?;
    let (header, stray) =
        grammar::parse_header(text_str).map_err(|e| MafError::format(0, e.to_string(), text))?;
    for err in stray {
        if options.strict {
            return Err(MafError::format(0, err.to_string(), text));
        }
        warn!(error = %err, "ignoring unrecognized line in MAF header");
    }
    Ok(header)
}

/// Parse a block assembled from a trailing and a leading fragment
fn parse_joined(joined: &[u8], trailing_len: usize, offset: u64, options: &ParseOptions) -> Result<Block> {
    parse_block(joined, offset, options).map_err(|err| match err {
        MafError::Format { offset, msg, .. } => {
            let (trailing, leading) = joined.split_at(trailing_len);
            let tail = &trailing[trailing.len().saturating_sub(80)..];
            MafError::Format {
                offset,
                msg: format!("{} (block spans a chunk boundary)", msg),
                context: format!(
                    "trailing fragment '{}' | leading fragment '{}'",
                    excerpt(tail),
                    excerpt(&leading[..leading.len().min(80)])
                ),
            }
        }
        other => other,
    })
}

impl<S: ChunkSource> Iterator for MafReader<S> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}
