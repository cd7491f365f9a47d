//! Execution of fetch plans
//!
//! A [`BlockFetcher`] turns merged requests into parsed blocks, emitted in
//! plan order. Two implementations exist:
//!
//! - [`SequentialFetcher`]: one file handle, read and parse in turn.
//! - [`ThreadedFetcher`]: a pool of I/O workers pulls requests from a shared
//!   queue and performs positioned reads, each on its own file handle. Raw
//!   buffers go through a bounded channel to a pool of parse workers.
//!   Parsed groups return to the calling thread, which restores plan order
//!   with a [`ReorderBuffer`] and waits with a timeout so it can notice
//!   workers that have died or hung.
//!
//! Any worker error stops further reads and is returned to the caller.
//! Workers are detached threads: after an error or a stall the caller
//! returns at once, and a worker blocked in a read exits when the read
//! completes.

use crate::error::{MafError, Result};
use crate::fetch::planner::FetchRequest;
use crate::fetch::reorder::ReorderBuffer;
use crate::io::chunk::{open_chunk_source, ChunkSource, InputFormat, OffsetSpace};
use crate::maf::options::ParseOptions;
use crate::maf::parser::parse_blocks_at;
use crate::maf::record::Block;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Opens an independent source for each worker
pub trait SourceOpener: Sync {
    /// Open a fresh source positioned at the start of the file
    fn open(&self) -> Result<Box<dyn ChunkSource>>;
}

impl<F> SourceOpener for F
where
    F: Fn() -> Result<Box<dyn ChunkSource>> + Sync,
{
    fn open(&self) -> Result<Box<dyn ChunkSource>> {
        self()
    }
}

/// Opens a MAF file on disk
#[derive(Debug, Clone)]
pub struct FileOpener {
    path: PathBuf,
    format: InputFormat,
    chunk_size: usize,
    random_chunk_size: usize,
}

impl FileOpener {
    /// Opener for `path` in `format`, using the chunk sizes of `options`
    pub fn new(path: impl Into<PathBuf>, format: InputFormat, options: &ParseOptions) -> Self {
        Self {
            path: path.into(),
            format,
            chunk_size: options.chunk_size,
            random_chunk_size: options.random_chunk_size,
        }
    }
}

impl SourceOpener for FileOpener {
    fn open(&self) -> Result<Box<dyn ChunkSource>> {
        open_chunk_source(&self.path, self.format, self.chunk_size, self.random_chunk_size)
    }
}

/// Runs a fetch plan, emitting blocks in plan order
pub trait BlockFetcher: Send + Sync {
    /// Fetch every request of `plan`, passing blocks to `sink` in order
    fn fetch_each(
        &self,
        opener: &dyn SourceOpener,
        options: &ParseOptions,
        plan: &[FetchRequest],
        sink: &mut dyn FnMut(Block) -> Result<()>,
    ) -> Result<()>;

    /// Fetch every request of `plan` into a vector
    fn fetch(
        &self,
        opener: &dyn SourceOpener,
        options: &ParseOptions,
        plan: &[FetchRequest],
    ) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        self.fetch_each(opener, options, plan, &mut |block| {
            blocks.push(block);
            Ok(())
        })?;
        Ok(blocks)
    }
}

/// Choose the fetcher for `options.threads`
pub fn fetcher_for(options: &ParseOptions) -> Box<dyn BlockFetcher> {
    if options.threads > 1 {
        Box::new(ThreadedFetcher::new(options.threads))
    } else {
        Box::new(SequentialFetcher)
    }
}

fn fetch_one(
    source: &mut dyn ChunkSource,
    request: &FetchRequest,
    options: &ParseOptions,
) -> Result<Vec<Block>> {
    let buf = source.read_chunk_at(request.offset, request.length as usize)?;
    parse_blocks_at(
        &buf,
        request.offset,
        &request.block_offsets,
        source.offset_space(),
        options,
    )
}

/// Reads and parses on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialFetcher;

impl BlockFetcher for SequentialFetcher {
    fn fetch_each(
        &self,
        opener: &dyn SourceOpener,
        options: &ParseOptions,
        plan: &[FetchRequest],
        sink: &mut dyn FnMut(Block) -> Result<()>,
    ) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let mut source = opener.open()?;
        for request in plan {
            for block in fetch_one(source.as_mut(), request, options)? {
                sink(block)?;
            }
        }
        Ok(())
    }
}

/// Bytes read for one request, on their way to a parse worker
struct RawRead {
    slot: usize,
    data: Vec<u8>,
    space: OffsetSpace,
}

enum Completion {
    Parsed { slot: usize, blocks: Vec<Block> },
    Failed(MafError),
}

/// Tells the coordinator when a worker thread dies by panicking
struct PanicNotice {
    done: Sender<Completion>,
    cancelled: Arc<AtomicBool>,
}

impl Drop for PanicNotice {
    fn drop(&mut self) {
        if thread::panicking() {
            self.cancelled.store(true, Ordering::SeqCst);
            let name = thread::current().name().unwrap_or("fetch worker").to_string();
            let _ = self
                .done
                .send(Completion::Failed(MafError::Worker(format!("{} panicked", name))));
        }
    }
}

/// Parallel fetcher with separate I/O and parse pools
#[derive(Debug, Clone)]
pub struct ThreadedFetcher {
    io_workers: usize,
    parse_workers: usize,
    poll_interval: Duration,
    stall_timeout: Duration,
}

impl ThreadedFetcher {
    /// Split `threads` between I/O and parse workers
    pub fn new(threads: usize) -> Self {
        let io_workers = ((threads + 1) / 2).max(1);
        let parse_workers = threads.saturating_sub(io_workers).max(1);
        Self::with_workers(io_workers, parse_workers)
    }

    /// Explicit pool sizes
    pub fn with_workers(io_workers: usize, parse_workers: usize) -> Self {
        Self {
            io_workers: io_workers.max(1),
            parse_workers: parse_workers.max(1),
            poll_interval: Duration::from_secs(1),
            stall_timeout: Duration::from_secs(600),
        }
    }

    /// How long the coordinator waits between liveness checks
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Give up when no request completes for this long
    ///
    /// The fetch returns as soon as the stall is noticed; a worker stuck in
    /// a read is left to finish in the background.
    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }
}

fn io_worker(
    mut source: Box<dyn ChunkSource>,
    plan: Arc<[FetchRequest]>,
    requests: Receiver<usize>,
    raw: Sender<RawRead>,
    done: Sender<Completion>,
    cancelled: Arc<AtomicBool>,
) {
    let _notice = PanicNotice {
        done: done.clone(),
        cancelled: Arc::clone(&cancelled),
    };
    let space = source.offset_space();
    for slot in requests.iter() {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let request = &plan[slot];
        match source.read_chunk_at(request.offset, request.length as usize) {
            Ok(data) => {
                if raw.send(RawRead { slot, data, space }).is_err() {
                    break;
                }
            }
            Err(e) => {
                cancelled.store(true, Ordering::SeqCst);
                let _ = done.send(Completion::Failed(e));
                break;
            }
        }
    }
}

fn parse_worker(
    plan: Arc<[FetchRequest]>,
    raw: Receiver<RawRead>,
    done: Sender<Completion>,
    options: Arc<ParseOptions>,
    cancelled: Arc<AtomicBool>,
) {
    let _notice = PanicNotice {
        done: done.clone(),
        cancelled: Arc::clone(&cancelled),
    };
    for read in raw.iter() {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let request = &plan[read.slot];
        let completion = match parse_blocks_at(
            &read.data,
            request.offset,
            &request.block_offsets,
            read.space,
            &options,
        ) {
            Ok(blocks) => Completion::Parsed {
                slot: read.slot,
                blocks,
            },
            Err(e) => {
                cancelled.store(true, Ordering::SeqCst);
                Completion::Failed(e)
            }
        };
        if done.send(completion).is_err() {
            break;
        }
    }
}

impl ThreadedFetcher {
    fn reassemble(
        &self,
        requests: usize,
        done: &Receiver<Completion>,
        sink: &mut dyn FnMut(Block) -> Result<()>,
    ) -> Result<()> {
        let mut order = ReorderBuffer::new(requests);
        let mut last_progress = Instant::now();
        while !order.is_complete() {
            match done.recv_timeout(self.poll_interval) {
                Ok(Completion::Parsed { slot, blocks }) => {
                    last_progress = Instant::now();
                    for group in order.push(slot, blocks)? {
                        for block in group {
                            sink(block)?;
                        }
                    }
                }
                Ok(Completion::Failed(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    let waited = last_progress.elapsed();
                    if waited >= self.stall_timeout {
                        return Err(MafError::PipelineStalled {
                            outstanding: order.outstanding(),
                        });
                    }
                    warn!(
                        outstanding = order.outstanding(),
                        buffered = order.buffered(),
                        waited_ms = waited.as_millis() as u64,
                        "waiting for fetch workers"
                    );
                }
                // Every worker has exited with requests still outstanding.
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(MafError::PipelineStalled {
                        outstanding: order.outstanding(),
                    })
                }
            }
        }
        Ok(())
    }
}

impl BlockFetcher for ThreadedFetcher {
    fn fetch_each(
        &self,
        opener: &dyn SourceOpener,
        options: &ParseOptions,
        plan: &[FetchRequest],
        sink: &mut dyn FnMut(Block) -> Result<()>,
    ) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let io_workers = self.io_workers.min(plan.len());
        let parse_workers = self.parse_workers.min(plan.len());
        let start = Instant::now();
        debug!(io_workers, parse_workers, requests = plan.len(), "starting threaded fetch");

        // Handles are opened here so open failures surface before any
        // thread starts.
        let sources = (0..io_workers)
            .map(|_| opener.open())
            .collect::<Result<Vec<_>>>()?;
        let shared: Arc<[FetchRequest]> = Arc::from(plan);
        let options = Arc::new(options.clone());
        let cancelled = Arc::new(AtomicBool::new(false));

        let (request_tx, request_rx) = unbounded::<usize>();
        for slot in 0..plan.len() {
            // The receiver is alive until the workers are spawned.
            let _ = request_tx.send(slot);
        }
        drop(request_tx);

        let (raw_tx, raw_rx) = bounded::<RawRead>(parse_workers * 2);
        let (done_tx, done_rx) = bounded::<Completion>(parse_workers * 2);

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(io_workers + parse_workers);
        for (i, source) in sources.into_iter().enumerate() {
            let (plan, requests, raw, done) = (Arc::clone(&shared), request_rx.clone(), raw_tx.clone(), done_tx.clone());
            let cancelled = Arc::clone(&cancelled);
            handles.push(
                thread::Builder::new()
                    .name(format!("maf-io-{}", i))
                    .spawn(move || io_worker(source, plan, requests, raw, done, cancelled))?,
            );
        }
        for i in 0..parse_workers {
            let (plan, raw, done) = (Arc::clone(&shared), raw_rx.clone(), done_tx.clone());
            let (options, cancelled) = (Arc::clone(&options), Arc::clone(&cancelled));
            handles.push(
                thread::Builder::new()
                    .name(format!("maf-parse-{}", i))
                    .spawn(move || parse_worker(plan, raw, done, options, cancelled))?,
            );
        }
        // Workers hold the only remaining ends, so a dead pool
        // disconnects the channels.
        drop(request_rx);
        drop(raw_tx);
        drop(raw_rx);
        drop(done_tx);

        let result = self.reassemble(plan.len(), &done_rx, sink);
        drop(done_rx);

        if let Err(e) = result {
            cancelled.store(true, Ordering::SeqCst);
            let running = handles.iter().filter(|h| !h.is_finished()).count();
            if running > 0 {
                warn!(running, error = %e, "abandoning fetch workers still in flight");
            }
            return Err(e);
        }

        // Every request completed, so the workers are only draining empty
        // queues.
        let panicked = handles.into_iter().map(JoinHandle::join).filter(|r| r.is_err()).count();
        if panicked > 0 {
            return Err(MafError::Worker(format!("{} fetch worker(s) panicked", panicked)));
        }
        info!(
            requests = plan.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "threaded fetch complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::chunk::{Chunk, PlainChunkSource};
    use std::io::Cursor;

    const TEXT: &str = "##maf version=1\n\
a score=1\ns hg18.chr1 0 4 + 100 ACGT\n\n\
a score=2\ns hg18.chr1 4 4 + 100 TTTT\n\n\
a score=3\ns hg18.chr1 8 4 + 100 GGGG\n\n";

    fn requests() -> Vec<FetchRequest> {
        let starts: Vec<usize> = TEXT.match_indices("\na").map(|(i, _)| i + 1).collect();
        starts
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let end = starts.get(i + 1).copied().unwrap_or(TEXT.len());
                FetchRequest::single(s as u64, (end - s) as u64)
            })
            .collect()
    }

    fn opener() -> impl SourceOpener {
        || -> Result<Box<dyn ChunkSource>> {
            Ok(Box::new(PlainChunkSource::new(Cursor::new(TEXT.as_bytes().to_vec()), 64, 16)?))
        }
    }

    fn scores(blocks: &[Block]) -> Vec<Option<f64>> {
        blocks.iter().map(Block::score).collect()
    }

    #[test]
    fn test_sequential_fetch_in_plan_order() {
        let reqs = requests();
        let plan = vec![reqs[2].clone(), reqs[0].clone(), reqs[1].clone()];
        let blocks = SequentialFetcher.fetch(&opener(), &ParseOptions::default(), &plan).unwrap();
        assert_eq!(scores(&blocks), vec![Some(3.0), Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_threaded_matches_sequential() {
        let reqs = requests();
        let plan = vec![reqs[1].clone(), reqs[2].clone(), reqs[0].clone(), reqs[1].clone()];
        let options = ParseOptions::default();
        let expected = SequentialFetcher.fetch(&opener(), &options, &plan).unwrap();
        let threaded = ThreadedFetcher::with_workers(3, 2)
            .fetch(&opener(), &options, &plan)
            .unwrap();
        assert_eq!(threaded, expected);
    }

    #[test]
    fn test_integrity_error_propagates() {
        let mut bad = requests()[1].clone();
        bad.offset += 1;
        bad.block_offsets = vec![bad.offset];
        let plan = vec![requests()[0].clone(), bad];
        let err = ThreadedFetcher::with_workers(2, 2)
            .fetch(&opener(), &ParseOptions::default(), &plan)
            .unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_open_failure_propagates() {
        let failing = || -> Result<Box<dyn ChunkSource>> { Err(MafError::InvalidConfig("no file".into())) };
        let err = ThreadedFetcher::with_workers(2, 1)
            .fetch(&failing, &ParseOptions::default(), &requests())
            .unwrap_err();
        assert!(matches!(err, MafError::InvalidConfig(_)));
    }

    struct HangingSource {
        delay: Duration,
    }

    impl ChunkSource for HangingSource {
        fn read_next_chunk(&mut self) -> Result<Option<Chunk>> {
            Ok(None)
        }
        fn read_chunk_at(&mut self, _offset: u64, _len: usize) -> Result<Vec<u8>> {
            thread::sleep(self.delay);
            Ok(Vec::new())
        }
        fn pos(&self) -> u64 {
            0
        }
        fn offset_space(&self) -> OffsetSpace {
            OffsetSpace::Linear
        }
    }

    #[test]
    fn test_stall_is_reported() {
        let hanging = || -> Result<Box<dyn ChunkSource>> {
            Ok(Box::new(HangingSource {
                delay: Duration::from_millis(300),
            }))
        };
        let err = ThreadedFetcher::with_workers(1, 1)
            .poll_interval(Duration::from_millis(10))
            .stall_timeout(Duration::from_millis(50))
            .fetch(&hanging, &ParseOptions::default(), &requests())
            .unwrap_err();
        assert!(matches!(err, MafError::PipelineStalled { outstanding: 3 }));
    }

    #[test]
    fn test_hung_read_does_not_block_caller() {
        let hanging = || -> Result<Box<dyn ChunkSource>> {
            Ok(Box::new(HangingSource {
                delay: Duration::from_secs(10),
            }))
        };
        let started = Instant::now();
        let err = ThreadedFetcher::with_workers(2, 1)
            .poll_interval(Duration::from_millis(10))
            .stall_timeout(Duration::from_millis(100))
            .fetch(&hanging, &ParseOptions::default(), &requests())
            .unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, MafError::PipelineStalled { outstanding: 3 }));
        assert!(elapsed < Duration::from_secs(2), "fetch returned after {:?}", elapsed);
    }

    struct PanickingSource;

    impl ChunkSource for PanickingSource {
        fn read_next_chunk(&mut self) -> Result<Option<Chunk>> {
            Ok(None)
        }
        fn read_chunk_at(&mut self, _offset: u64, _len: usize) -> Result<Vec<u8>> {
            panic!("read failed hard");
        }
        fn pos(&self) -> u64 {
            0
        }
        fn offset_space(&self) -> OffsetSpace {
            OffsetSpace::Linear
        }
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let panicking = || -> Result<Box<dyn ChunkSource>> { Ok(Box::new(PanickingSource)) };
        let err = ThreadedFetcher::with_workers(1, 1)
            .poll_interval(Duration::from_millis(10))
            .fetch(&panicking, &ParseOptions::default(), &requests())
            .unwrap_err();
        assert!(matches!(err, MafError::Worker(_)), "unexpected error {:?}", err);
    }

    #[test]
    fn test_same_offset_with_different_extents() {
        let reqs = requests();
        let mut pair = reqs[0].clone();
        pair.length += reqs[1].length;
        pair.block_offsets.push(reqs[1].offset);
        let plan = vec![pair.clone(), reqs[0].clone(), pair, reqs[2].clone(), reqs[0].clone()];

        let options = ParseOptions::default();
        let expected = SequentialFetcher.fetch(&opener(), &options, &plan).unwrap();
        assert_eq!(
            scores(&expected),
            vec![Some(1.0), Some(2.0), Some(1.0), Some(1.0), Some(2.0), Some(3.0), Some(1.0)]
        );
        for _ in 0..20 {
            let threaded = ThreadedFetcher::with_workers(4, 3)
                .fetch(&opener(), &options, &plan)
                .unwrap();
            assert_eq!(threaded, expected);
        }
    }

    #[test]
    fn test_fetcher_selection() {
        let plan = requests();
        let options = ParseOptions::default().with_threads(4);
        let blocks = fetcher_for(&options).fetch(&opener(), &options, &plan).unwrap();
        assert_eq!(scores(&blocks), vec![Some(1.0), Some(2.0), Some(3.0)]);
    }
}
