//! Chunked byte sources for the MAF parser
//!
//! A [`ChunkSource`] hands the parser a file as a series of independently
//! read buffers ("chunks") and serves positioned reads for random access.
//! Every chunk carries the logical offset of its first byte:
//!
//! - **Plain** and **gzip** sources use linear offsets into the
//!   uncompressed text.
//! - **BGZF** sources return one decompressed block per chunk and use
//!   [`VirtualOffset`]s, so `chunk.offset + i` is the virtual offset of byte
//!   `i` of that chunk.
//!
//! The [`OffsetSpace`] of a source says which arithmetic applies; the parser,
//! the index and the fetch planner all work in that space.

use crate::error::{MafError, Result};
use crate::io::compression::{decompress_blocks, is_bgzf_header, read_block, VirtualOffset};
use crossbeam_channel::{bounded, Receiver};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// One buffer of file data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Logical offset of `data[0]`
    pub offset: u64,
    /// Uncompressed bytes
    pub data: Vec<u8>,
}

/// How logical offsets relate to byte positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSpace {
    /// Byte offsets into the uncompressed text
    Linear,
    /// BGZF virtual offsets
    Virtual,
}

impl OffsetSpace {
    /// Offset of the byte `delta` positions after `base`
    ///
    /// In the virtual space this is only meaningful while the result stays
    /// inside `base`'s compressed block.
    pub fn advance(self, base: u64, delta: usize) -> u64 {
        base + delta as u64
    }

    /// Byte distance from `base` to `target`, if both are addressable from
    /// the same buffer start
    pub fn distance(self, base: u64, target: u64) -> Option<usize> {
        match self {
            OffsetSpace::Linear => target.checked_sub(base).map(|d| d as usize),
            OffsetSpace::Virtual => {
                let (b, t) = (VirtualOffset::from_raw(base), VirtualOffset::from_raw(target));
                if b.compressed_offset() != t.compressed_offset() {
                    return None;
                }
                t.uncompressed_offset()
                    .checked_sub(b.uncompressed_offset())
                    .map(|d| d as usize)
            }
        }
    }

    /// Identity of the physical unit containing `offset`
    ///
    /// For BGZF this is the compressed block offset; linear offsets are
    /// their own unit.
    pub fn block_key(self, offset: u64) -> u64 {
        match self {
            OffsetSpace::Linear => offset,
            OffsetSpace::Virtual => VirtualOffset::from_raw(offset).compressed_offset(),
        }
    }
}

/// Source of chunks for sequential parsing and positioned reads
pub trait ChunkSource: Send {
    /// Next chunk in file order, or `None` at end of data
    fn read_next_chunk(&mut self) -> Result<Option<Chunk>>;

    /// Read exactly `len` uncompressed bytes starting at logical `offset`
    ///
    /// Sequential reading resumes after the bytes returned here.
    fn read_chunk_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Logical offset of the next sequential read
    fn pos(&self) -> u64;

    /// Offset arithmetic used by this source
    fn offset_space(&self) -> OffsetSpace;
}

impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    fn read_next_chunk(&mut self) -> Result<Option<Chunk>> {
        (**self).read_next_chunk()
    }

    fn read_chunk_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        (**self).read_chunk_at(offset, len)
    }

    fn pos(&self) -> u64 {
        (**self).pos()
    }

    fn offset_space(&self) -> OffsetSpace {
        (**self).offset_space()
    }
}

/// Storage format of a MAF file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Uncompressed text
    Plain,
    /// Single-stream gzip (sequential access only)
    Gzip,
    /// Blocked gzip
    Bgzf,
}

impl InputFormat {
    /// Choose a format from the file extension, sniffing `.gz` files
    ///
    /// `.bgz`/`.bgzf` are BGZF; `.gz` is BGZF when its first member carries
    /// the `BC` subfield and plain gzip otherwise; everything else is plain.
    pub fn detect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("bgz") | Some("bgzf") => Ok(InputFormat::Bgzf),
            Some("gz") => {
                let mut head = [0u8; 64];
                let mut file = File::open(path)?;
                let n = read_up_to(&mut file, &mut head)?;
                if is_bgzf_header(&head[..n]) {
                    Ok(InputFormat::Bgzf)
                } else {
                    Ok(InputFormat::Gzip)
                }
            }
            _ => Ok(InputFormat::Plain),
        }
    }

    /// Offset space produced by sources of this format
    pub fn offset_space(self) -> OffsetSpace {
        match self {
            InputFormat::Bgzf => OffsetSpace::Virtual,
            InputFormat::Plain | InputFormat::Gzip => OffsetSpace::Linear,
        }
    }
}

/// Check that a chunk size is a non-zero power of two
pub fn check_chunk_size(name: &str, size: usize) -> Result<()> {
    if !size.is_power_of_two() {
        return Err(MafError::InvalidConfig(format!(
            "{} must be a power of two, got {}",
            name, size
        )));
    }
    Ok(())
}

/// Fill `buf` as far as the reader allows; returns bytes read
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Open a chunk source over a file
pub fn open_chunk_source<P: AsRef<Path>>(
    path: P,
    format: InputFormat,
    chunk_size: usize,
    random_chunk_size: usize,
) -> Result<Box<dyn ChunkSource>> {
    check_chunk_size("chunk size", chunk_size)?;
    check_chunk_size("random-access chunk size", random_chunk_size)?;
    let file = File::open(path.as_ref())?;
    let source: Box<dyn ChunkSource> = match format {
        InputFormat::Plain => Box::new(PlainChunkSource::new(file, chunk_size, random_chunk_size)?),
        InputFormat::Gzip => Box::new(GzipChunkSource::new(file, chunk_size)?),
        InputFormat::Bgzf => Box::new(BgzfChunkSource::new(BufReader::new(file))),
    };
    Ok(source)
}

/// Uncompressed text read in power-of-two sized chunks
#[derive(Debug)]
pub struct PlainChunkSource<R> {
    inner: R,
    chunk_size: usize,
    random_chunk_size: usize,
    pos: u64,
}

impl<R: Read + Seek + Send> PlainChunkSource<R> {
    /// Create a source; both sizes must be powers of two
    pub fn new(inner: R, chunk_size: usize, random_chunk_size: usize) -> Result<Self> {
        check_chunk_size("chunk size", chunk_size)?;
        check_chunk_size("random-access chunk size", random_chunk_size)?;
        Ok(Self {
            inner,
            chunk_size,
            random_chunk_size,
            pos: 0,
        })
    }
}

impl<R: Read + Seek + Send> ChunkSource for PlainChunkSource<R> {
    fn read_next_chunk(&mut self) -> Result<Option<Chunk>> {
        let mut data = vec![0u8; self.chunk_size];
        let n = read_up_to(&mut self.inner, &mut data)?;
        if n == 0 {
            return Ok(None);
        }
        data.truncate(n);
        let offset = self.pos;
        self.pos += n as u64;
        Ok(Some(Chunk { offset, data }))
    }

    fn read_chunk_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.inner.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let step = (len - filled).min(self.random_chunk_size);
            let n = read_up_to(&mut self.inner, &mut data[filled..filled + step])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.pos = offset + filled as u64;
        if filled < len {
            return Err(MafError::Integrity {
                msg: format!(
                    "read of {} bytes at offset {} hit end of file after {} bytes",
                    len, offset, filled
                ),
            });
        }
        Ok(data)
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn offset_space(&self) -> OffsetSpace {
        OffsetSpace::Linear
    }
}

/// Single-stream gzip text, sequential only
pub struct GzipChunkSource<R: Read> {
    decoder: MultiGzDecoder<R>,
    chunk_size: usize,
    pos: u64,
}

impl<R: Read + Send> GzipChunkSource<R> {
    /// Create a source reading `chunk_size` uncompressed bytes per chunk
    pub fn new(inner: R, chunk_size: usize) -> Result<Self> {
        check_chunk_size("chunk size", chunk_size)?;
        Ok(Self {
            decoder: MultiGzDecoder::new(inner),
            chunk_size,
            pos: 0,
        })
    }
}

impl<R: Read + Send> ChunkSource for GzipChunkSource<R> {
    fn read_next_chunk(&mut self) -> Result<Option<Chunk>> {
        let mut data = vec![0u8; self.chunk_size];
        let n = read_up_to(&mut self.decoder, &mut data)
            .map_err(|e| MafError::Compression(format!("gzip stream at offset {}: {}", self.pos, e)))?;
        if n == 0 {
            return Ok(None);
        }
        data.truncate(n);
        let offset = self.pos;
        self.pos += n as u64;
        Ok(Some(Chunk { offset, data }))
    }

    fn read_chunk_at(&mut self, offset: u64, _len: usize) -> Result<Vec<u8>> {
        Err(MafError::InvalidConfig(format!(
            "positioned read at offset {} on a gzip stream; recompress with BGZF for random access",
            offset
        )))
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn offset_space(&self) -> OffsetSpace {
        OffsetSpace::Linear
    }
}

/// BGZF text, one decompressed block per chunk
#[derive(Debug)]
pub struct BgzfChunkSource<R> {
    inner: R,
    /// Compressed offset of the next block to read
    next_block: u64,
    /// Virtual offset of the next sequential byte
    pos: u64,
}

impl<R: Read + Seek + Send> BgzfChunkSource<R> {
    /// Create a source positioned at the start of the file
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            next_block: 0,
            pos: 0,
        }
    }
}

impl<R: Read + Seek + Send> ChunkSource for BgzfChunkSource<R> {
    fn read_next_chunk(&mut self) -> Result<Option<Chunk>> {
        loop {
            let block = match read_block(&mut self.inner, self.next_block)
                .map_err(|e| MafError::Compression(e.to_string()))?
            {
                Some(block) => block,
                None => return Ok(None),
            };
            self.next_block += block.size() as u64;
            self.pos = VirtualOffset::new(self.next_block, 0).as_raw();

            let data = block
                .decompress()
                .map_err(|e| MafError::Compression(format!("block at {}: {}", block.offset, e)))?;
            if data.is_empty() {
                // EOF marker or padding block
                continue;
            }
            return Ok(Some(Chunk {
                offset: VirtualOffset::new(block.offset, 0).as_raw(),
                data,
            }));
        }
    }

    fn read_chunk_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let voff = VirtualOffset::from_raw(offset);
        let skip = voff.uncompressed_offset() as usize;
        self.inner.seek(SeekFrom::Start(voff.compressed_offset()))?;
        self.next_block = voff.compressed_offset();

        let mut blocks = Vec::new();
        let mut available = 0usize;
        while available < skip + len {
            match read_block(&mut self.inner, self.next_block)
                .map_err(|e| MafError::Compression(e.to_string()))?
            {
                Some(block) => {
                    self.next_block += block.size() as u64;
                    available += block.uncompressed_len();
                    blocks.push(block);
                }
                None => break,
            }
        }

        let inflated = decompress_blocks(&blocks)
            .map_err(|e| MafError::Compression(format!("read at {}: {}", voff, e)))?
            .concat();
        if inflated.len() < skip + len {
            return Err(MafError::Integrity {
                msg: format!(
                    "read of {} bytes at virtual offset {} hit end of file ({} bytes available)",
                    len,
                    voff,
                    inflated.len().saturating_sub(skip)
                ),
            });
        }
        debug!(offset = %voff, len, blocks = blocks.len(), "bgzf positioned read");
        self.pos = VirtualOffset::new(self.next_block, 0).as_raw();
        Ok(inflated[skip..skip + len].to_vec())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn offset_space(&self) -> OffsetSpace {
        OffsetSpace::Virtual
    }
}

/// Sequential source prefetching chunks on a background thread
///
/// The worker only reads; chunk order and content are unchanged. At most
/// `depth` chunks are buffered ahead of the parser.
pub struct ReadAheadSource {
    rx: Option<Receiver<Result<Option<Chunk>>>>,
    handle: Option<JoinHandle<()>>,
    space: OffsetSpace,
    pos: u64,
    done: bool,
}

impl ReadAheadSource {
    /// Move `source` onto a prefetch thread buffering up to `depth` chunks
    pub fn new(mut source: Box<dyn ChunkSource>, depth: usize) -> Result<Self> {
        let space = source.offset_space();
        let pos = source.pos();
        let (tx, rx) = bounded(depth.max(1));
        let handle = thread::Builder::new()
            .name("biomaf-readahead".to_string())
            .spawn(move || loop {
                let next = source.read_next_chunk();
                let last = !matches!(next, Ok(Some(_)));
                if tx.send(next).is_err() || last {
                    break;
                }
            })?;
        Ok(Self {
            rx: Some(rx),
            handle: Some(handle),
            space,
            pos,
            done: false,
        })
    }
}

impl ChunkSource for ReadAheadSource {
    fn read_next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }
        let rx = match &self.rx {
            Some(rx) => rx,
            None => return Ok(None),
        };
        match rx.recv() {
            Ok(Ok(Some(chunk))) => {
                self.pos = self.space.advance(chunk.offset, chunk.data.len());
                Ok(Some(chunk))
            }
            Ok(Ok(None)) => {
                self.done = true;
                Ok(None)
            }
            Ok(Err(e)) => {
                self.done = true;
                Err(e)
            }
            Err(_) => {
                self.done = true;
                Err(MafError::Worker("read-ahead worker exited unexpectedly".to_string()))
            }
        }
    }

    fn read_chunk_at(&mut self, offset: u64, _len: usize) -> Result<Vec<u8>> {
        Err(MafError::InvalidConfig(format!(
            "positioned read at offset {} on a read-ahead source",
            offset
        )))
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn offset_space(&self) -> OffsetSpace {
        self.space
    }
}

impl Drop for ReadAheadSource {
    fn drop(&mut self) {
        // Closing the channel unblocks a worker waiting to send.
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::compression::BgzfWriter;
    use std::io::{Cursor, Write};
    use std::sync::{Arc, Mutex};

    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, b: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(b);
            Ok(b.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn bgzf_bytes(payload: &[u8], block_size: usize) -> Vec<u8> {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut writer = BgzfWriter::with_block_size(Box::new(SharedBuf(buf.clone())), block_size);
        writer.write_all(payload).unwrap();
        writer.finish().unwrap();
        let out = buf.lock().unwrap().clone();
        out
    }

    fn drain(source: &mut dyn ChunkSource) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = source.read_next_chunk().unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn test_chunk_size_must_be_power_of_two() {
        assert!(check_chunk_size("chunk size", 4096).is_ok());
        assert!(check_chunk_size("chunk size", 1).is_ok());
        assert!(check_chunk_size("chunk size", 0).is_err());
        assert!(check_chunk_size("chunk size", 1000).is_err());

        let err = PlainChunkSource::new(Cursor::new(Vec::<u8>::new()), 1000, 4096).unwrap_err();
        assert!(matches!(err, MafError::InvalidConfig(_)));
    }

    #[test]
    fn test_plain_chunks_cover_file() {
        let text: Vec<u8> = (0..100u8).collect();
        let mut source = PlainChunkSource::new(Cursor::new(text.clone()), 16, 4).unwrap();
        let chunks = drain(&mut source);
        assert_eq!(chunks.len(), 7);
        assert_eq!(chunks[1].offset, 16);
        assert_eq!(chunks[6].data.len(), 4);
        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_plain_positioned_read() {
        let text: Vec<u8> = (0..100u8).collect();
        let mut source = PlainChunkSource::new(Cursor::new(text), 16, 4).unwrap();
        assert_eq!(source.read_chunk_at(10, 7).unwrap(), (10..17u8).collect::<Vec<_>>());
        assert_eq!(source.pos(), 17);
        assert!(source.read_chunk_at(95, 10).unwrap_err().is_integrity());
    }

    #[test]
    fn test_bgzf_chunks_are_blocks() {
        let payload: Vec<u8> = (0..3000u32).map(|i| b'a' + (i % 26) as u8).collect();
        let data = bgzf_bytes(&payload, 1024);
        let mut source = BgzfChunkSource::new(Cursor::new(data));
        let chunks = drain(&mut source);
        assert_eq!(chunks.len(), 3);
        assert_eq!(VirtualOffset::from_raw(chunks[0].offset).compressed_offset(), 0);
        assert!(chunks.iter().all(|c| VirtualOffset::from_raw(c.offset).uncompressed_offset() == 0));
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.clone()).collect();
        assert_eq!(joined, payload);
    }

    #[test]
    fn test_bgzf_positioned_read_spans_blocks() {
        let payload: Vec<u8> = (0..3000u32).map(|i| b'a' + (i % 26) as u8).collect();
        let data = bgzf_bytes(&payload, 1024);
        let mut source = BgzfChunkSource::new(Cursor::new(data));
        let chunks = drain(&mut source);

        // 100 bytes before the end of block 0 through 50 bytes into block 1
        let start = chunks[0].offset + 924;
        let bytes = source.read_chunk_at(start, 150).unwrap();
        assert_eq!(bytes, payload[924..1074].to_vec());
    }

    #[test]
    fn test_gzip_source_is_sequential_only() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"##maf version=1\n").unwrap();
        let gz = enc.finish().unwrap();

        let mut source = GzipChunkSource::new(Cursor::new(gz), 8).unwrap();
        let chunks = drain(&mut source);
        assert_eq!(chunks.len(), 2);
        assert!(matches!(
            source.read_chunk_at(0, 4),
            Err(MafError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_read_ahead_preserves_order() {
        let text: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let inner = PlainChunkSource::new(Cursor::new(text.clone()), 64, 64).unwrap();
        let mut source = ReadAheadSource::new(Box::new(inner), 2).unwrap();
        let chunks = drain(&mut source);
        assert_eq!(chunks.first().map(|c| c.offset), Some(0));
        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(joined, text);
        assert_eq!(source.pos(), 5000);
    }

    #[test]
    fn test_offset_space_distance() {
        let base = VirtualOffset::new(500, 10).as_raw();
        let same = VirtualOffset::new(500, 110).as_raw();
        let other = VirtualOffset::new(900, 0).as_raw();
        assert_eq!(OffsetSpace::Virtual.distance(base, same), Some(100));
        assert_eq!(OffsetSpace::Virtual.distance(base, other), None);
        assert_eq!(OffsetSpace::Virtual.block_key(same), 500);
        assert_eq!(OffsetSpace::Linear.distance(10, 25), Some(15));
        assert_eq!(OffsetSpace::Linear.distance(25, 10), None);
    }
}
