//! BGZF block codec and compressed output
//!
//! # BGZF
//!
//! A BGZF file is a series of independent gzip members ("blocks"), each at
//! most 64 KiB uncompressed, whose gzip header carries a `BC` extra subfield
//! holding the total compressed block size. Because every block decompresses
//! on its own, a position in the uncompressed stream can be addressed by a
//! [`VirtualOffset`]: the compressed file offset of the block in the high 48
//! bits and the position inside the decompressed block in the low 16 bits.
//!
//! # Block Structure
//!
//! - Bytes 0-1: gzip magic (31, 139)
//! - Byte 3: FLG, must have FEXTRA (0x04)
//! - Bytes 10-11: XLEN (extra field length)
//! - Extra subfields, including SI1='B' (66), SI2='C' (67), SLEN=2, BSIZE
//! - Deflate payload, CRC32, ISIZE (uncompressed length, little-endian u32)
//!
//! Several blocks needed by one positioned read are inflated in parallel with
//! rayon; blocks are written the same way, [`PARALLEL_BLOCK_COUNT`] at a time.

use crate::error::{MafError, Result};
use crate::io::sink::{DataSink, SinkCompression};
use flate2::read::GzDecoder;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use rayon::prelude::*;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};

/// Uncompressed payload per written BGZF block (htslib default)
pub const BGZF_BLOCK_SIZE: usize = 0xff00;

/// Largest uncompressed size a BGZF block may hold
pub const BGZF_MAX_BLOCK_SIZE: usize = 0x10000;

/// Number of BGZF blocks compressed in parallel per flush
pub const PARALLEL_BLOCK_COUNT: usize = 8;

/// Standard 28-byte empty block terminating a BGZF file
pub const BGZF_EOF: [u8; 28] = [
    31, 139, 8, 4, 0, 0, 0, 0, 0, 255, // header
    6, 0, 66, 67, 2, 0, 27, 0, // extra field, BSIZE=27
    3, 0, // empty deflate block
    0, 0, 0, 0, // CRC32
    0, 0, 0, 0, // ISIZE
];

/// Fixed gzip header bytes preceding the extra field
const GZIP_FIXED_HEADER: usize = 12;

/// Virtual file offset in BGZF format.
///
/// - Bits 63-16: compressed offset of the containing block
/// - Bits 15-0: offset within the decompressed block
///
/// ```
/// use biomaf::io::compression::VirtualOffset;
///
/// let voff = VirtualOffset::new(1024, 512);
/// assert_eq!(voff.compressed_offset(), 1024);
/// assert_eq!(voff.uncompressed_offset(), 512);
/// assert_eq!(VirtualOffset::from_raw(voff.as_raw()), voff);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Combine a compressed block offset and a within-block offset
    pub fn new(compressed: u64, uncompressed: u16) -> Self {
        VirtualOffset((compressed << 16) | uncompressed as u64)
    }

    /// Create from raw 64-bit value
    pub fn from_raw(value: u64) -> Self {
        VirtualOffset(value)
    }

    /// Raw 64-bit value
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Compressed file offset of the containing block (high 48 bits)
    pub fn compressed_offset(self) -> u64 {
        self.0 >> 16
    }

    /// Offset within the decompressed block (low 16 bits)
    pub fn uncompressed_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.compressed_offset(), self.uncompressed_offset())
    }
}

/// One raw (still compressed) BGZF block
#[derive(Debug, Clone)]
pub struct BgzfBlock {
    /// Compressed file offset where the block starts
    pub offset: u64,
    /// Complete gzip member, header to ISIZE
    pub data: Vec<u8>,
}

impl BgzfBlock {
    /// Total compressed size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Uncompressed size recorded in the ISIZE trailer
    pub fn uncompressed_len(&self) -> usize {
        let n = self.data.len();
        if n < 4 {
            return 0;
        }
        u32::from_le_bytes([self.data[n - 4], self.data[n - 3], self.data[n - 2], self.data[n - 1]])
            as usize
    }

    /// Inflate the block
    pub fn decompress(&self) -> io::Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(&self.data[..]);
        let mut out = Vec::with_capacity(self.uncompressed_len());
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Find BSIZE in a gzip extra field
fn find_bsize(extra: &[u8]) -> Option<u16> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let si1 = extra[pos];
        let si2 = extra[pos + 1];
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        if si1 == 66 && si2 == 67 && slen == 2 {
            if pos + 6 > extra.len() {
                return None;
            }
            return Some(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
        }
        pos += 4 + slen;
    }
    None
}

/// Check whether `bytes` start with a BGZF block header
///
/// Plain gzip members lack the `BC` subfield and are rejected, so this is
/// the test used to tell `.gz` BGZF files from single-stream gzip.
pub fn is_bgzf_header(bytes: &[u8]) -> bool {
    if bytes.len() < GZIP_FIXED_HEADER || bytes[0] != 31 || bytes[1] != 139 {
        return false;
    }
    if bytes[3] & 0x04 == 0 {
        return false;
    }
    let xlen = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
    let end = GZIP_FIXED_HEADER + xlen;
    if end > bytes.len() {
        return false;
    }
    find_bsize(&bytes[GZIP_FIXED_HEADER..end]).is_some()
}

/// Read one BGZF block starting at the reader's current position
///
/// `offset` is the compressed offset of that position and is recorded in
/// the returned block. Returns `Ok(None)` on a clean end of file.
pub fn read_block<R: Read>(reader: &mut R, offset: u64) -> io::Result<Option<BgzfBlock>> {
    let mut header = [0u8; GZIP_FIXED_HEADER];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..])? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("Truncated BGZF header at offset {}", offset),
                ))
            }
            n => filled += n,
        }
    }

    if header[0] != 31 || header[1] != 139 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Invalid gzip magic at offset {}: [{}, {}]",
                offset, header[0], header[1]
            ),
        ));
    }
    if header[3] & 0x04 == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Block at offset {} has no extra field (not BGZF)", offset),
        ));
    }

    let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
    let mut extra = vec![0u8; xlen];
    reader.read_exact(&mut extra)?;

    let bsize = find_bsize(&extra).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Block at offset {} has no BSIZE subfield", offset),
        )
    })?;
    let block_size = bsize as usize + 1;
    let already_read = GZIP_FIXED_HEADER + xlen;
    if block_size < already_read {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid block size {} < {} at offset {}", block_size, already_read, offset),
        ));
    }

    let mut data = Vec::with_capacity(block_size);
    data.extend_from_slice(&header);
    data.extend_from_slice(&extra);
    data.resize(block_size, 0);
    reader.read_exact(&mut data[already_read..])?;

    Ok(Some(BgzfBlock { offset, data }))
}

/// Inflate several blocks in parallel, preserving their order
pub fn decompress_blocks(blocks: &[BgzfBlock]) -> io::Result<Vec<Vec<u8>>> {
    if blocks.len() == 1 {
        return Ok(vec![blocks[0].decompress()?]);
    }
    blocks.par_iter().map(BgzfBlock::decompress).collect()
}

/// Compress `data` into a single BGZF block
pub fn compress_block(data: &[u8]) -> io::Result<Vec<u8>> {
    if data.len() > BGZF_MAX_BLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("BGZF block payload too large: {} bytes", data.len()),
        ));
    }

    let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
    deflate.write_all(data)?;
    let deflated = deflate.finish()?;

    let mut block = Vec::with_capacity(deflated.len() + 26);
    block.extend_from_slice(&[31, 139, 8, 4, 0, 0, 0, 0, 0, 255]);
    block.extend_from_slice(&6u16.to_le_bytes());
    block.extend_from_slice(&[66, 67]);
    block.extend_from_slice(&2u16.to_le_bytes());
    let bsize_pos = block.len();
    block.extend_from_slice(&0u16.to_le_bytes());
    block.extend_from_slice(&deflated);
    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());

    let total = block.len();
    if total > BGZF_MAX_BLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Compressed BGZF block exceeds 64 KiB ({} bytes)", total),
        ));
    }
    let bsize = (total - 1) as u16;
    block[bsize_pos..bsize_pos + 2].copy_from_slice(&bsize.to_le_bytes());
    Ok(block)
}

/// Parallel BGZF writer
///
/// Buffers up to [`PARALLEL_BLOCK_COUNT`] uncompressed blocks, compresses
/// them with rayon, then writes them in order. `finish` appends the EOF
/// marker block.
pub struct BgzfWriter {
    writer: Box<dyn Write>,
    pending: Vec<Vec<u8>>,
    current: Vec<u8>,
    block_size: usize,
}

impl BgzfWriter {
    /// Create a writer using the standard block payload size
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self::with_block_size(writer, BGZF_BLOCK_SIZE)
    }

    /// Create a writer with a custom block payload size (clamped to 1..=0xff00)
    ///
    /// Small blocks are useful for exercising block-boundary handling.
    pub fn with_block_size(writer: Box<dyn Write>, block_size: usize) -> Self {
        let block_size = block_size.clamp(1, BGZF_BLOCK_SIZE);
        Self {
            writer,
            pending: Vec::with_capacity(PARALLEL_BLOCK_COUNT),
            current: Vec::with_capacity(block_size),
            block_size,
        }
    }

    fn flush_blocks(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let compressed: Vec<_> = self
            .pending
            .par_iter()
            .map(|block| compress_block(block))
            .collect::<io::Result<Vec<_>>>()?;
        for block in compressed {
            self.writer.write_all(&block)?;
        }
        self.pending.clear();
        Ok(())
    }

    /// Flush everything and write the EOF marker
    pub fn finish(mut self) -> io::Result<()> {
        if !self.current.is_empty() {
            let block = std::mem::take(&mut self.current);
            self.pending.push(block);
        }
        self.flush_blocks()?;
        self.writer.write_all(&BGZF_EOF)?;
        self.writer.flush()
    }
}

impl Write for BgzfWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut remaining = buf;
        while !remaining.is_empty() {
            let space = self.block_size - self.current.len();
            let n = remaining.len().min(space);
            self.current.extend_from_slice(&remaining[..n]);
            remaining = &remaining[n..];

            if self.current.len() >= self.block_size {
                let block = std::mem::replace(&mut self.current, Vec::with_capacity(self.block_size));
                self.pending.push(block);
                if self.pending.len() >= PARALLEL_BLOCK_COUNT {
                    self.flush_blocks()?;
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Writer applying the compression chosen for a [`DataSink`]
///
/// `finish` must be called to finalize gzip/BGZF output; dropping the
/// writer finalizes on a best-effort basis.
pub enum CompressedWriter {
    /// Uncompressed, buffered
    Plain(Option<BufWriter<Box<dyn Write>>>),
    /// Single-stream gzip
    Gzip(Option<GzEncoder<BufWriter<Box<dyn Write>>>>),
    /// BGZF
    Bgzf(Option<BgzfWriter>),
}

impl CompressedWriter {
    /// Create a writer for `sink`, compression chosen from its extension
    pub fn new(sink: DataSink) -> Result<Self> {
        let compression = sink.compression();
        let inner: Box<dyn Write> = match sink {
            DataSink::Local(path) => Box::new(File::create(&path)?),
            DataSink::Stdout => Box::new(io::stdout()),
        };
        Ok(match compression {
            SinkCompression::None => Self::plain(inner),
            SinkCompression::Gzip => Self::gzip(inner),
            SinkCompression::Bgzf => Self::bgzf(inner),
        })
    }

    /// Uncompressed writer over `writer`
    pub fn plain(writer: Box<dyn Write>) -> Self {
        CompressedWriter::Plain(Some(BufWriter::new(writer)))
    }

    /// Gzip writer over `writer`
    pub fn gzip(writer: Box<dyn Write>) -> Self {
        CompressedWriter::Gzip(Some(GzEncoder::new(BufWriter::new(writer), Compression::default())))
    }

    /// BGZF writer over `writer`
    pub fn bgzf(writer: Box<dyn Write>) -> Self {
        CompressedWriter::Bgzf(Some(BgzfWriter::new(writer)))
    }

    /// BGZF writer with a custom block payload size
    pub fn bgzf_with_block_size(writer: Box<dyn Write>, block_size: usize) -> Self {
        CompressedWriter::Bgzf(Some(BgzfWriter::with_block_size(writer, block_size)))
    }

    fn active(&mut self) -> io::Result<&mut dyn Write> {
        let w: Option<&mut dyn Write> = match self {
            CompressedWriter::Plain(w) => w.as_mut().map(|w| w as &mut dyn Write),
            CompressedWriter::Gzip(w) => w.as_mut().map(|w| w as &mut dyn Write),
            CompressedWriter::Bgzf(w) => w.as_mut().map(|w| w as &mut dyn Write),
        };
        w.ok_or_else(|| io::Error::new(io::ErrorKind::Other, "writer already finished"))
    }

    /// Finalize compression and flush
    pub fn finish(mut self) -> Result<()> {
        self.finish_inner().map_err(MafError::from)
    }

    fn finish_inner(&mut self) -> io::Result<()> {
        match self {
            CompressedWriter::Plain(w) => match w.take() {
                Some(mut w) => w.flush(),
                None => Ok(()),
            },
            CompressedWriter::Gzip(w) => match w.take() {
                Some(enc) => enc.finish()?.flush(),
                None => Ok(()),
            },
            CompressedWriter::Bgzf(w) => match w.take() {
                Some(w) => w.finish(),
                None => Ok(()),
            },
        }
    }
}

impl Write for CompressedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.active()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.active()?.flush()
    }
}

impl Drop for CompressedWriter {
    fn drop(&mut self) {
        let _ = self.finish_inner();
    }
}
