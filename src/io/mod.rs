//! I/O module: chunked sources, BGZF codec and output sinks
//!
//! The parser never reads a MAF file as one piece. It pulls fixed-size
//! chunks from a [`ChunkSource`] (plain, gzip or BGZF) and, for random
//! access, issues positioned reads against the same abstraction.

pub mod chunk;
pub mod compression;
pub mod sink;

pub use chunk::{
    open_chunk_source, BgzfChunkSource, Chunk, ChunkSource, GzipChunkSource, InputFormat,
    OffsetSpace, PlainChunkSource, ReadAheadSource,
};
pub use compression::{CompressedWriter, VirtualOffset};
pub use sink::{DataSink, SinkCompression};
