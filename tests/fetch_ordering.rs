//! Threaded fetch ordering under randomized I/O latency
//!
//! Workers finish out of order when reads take unpredictable time; the
//! fetcher must still hand blocks back in plan order.

use biomaf::fetch::{plan, BlockFetcher, FetchRequest, SequentialFetcher, ThreadedFetcher};
use biomaf::io::chunk::{open_chunk_source, Chunk, ChunkSource, InputFormat, OffsetSpace};
use biomaf::maf::{Block, MafReader, ParseOptions};
use biomaf::{MafError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

fn sample_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/chr22_sample.maf")
}

fn options() -> ParseOptions {
    ParseOptions::default().with_extended(true).with_empty(true)
}

fn scan() -> Vec<Block> {
    MafReader::from_path(sample_path(), options())
        .expect("Failed to open sample")
        .collect::<Result<Vec<_>>>()
        .expect("Failed to scan sample")
}

/// Sleeps a random few milliseconds before every positioned read
struct SlowSource {
    inner: Box<dyn ChunkSource>,
    max_delay_ms: u64,
}

impl ChunkSource for SlowSource {
    fn read_next_chunk(&mut self) -> Result<Option<Chunk>> {
        self.inner.read_next_chunk()
    }

    fn read_chunk_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
        thread::sleep(Duration::from_millis(delay));
        self.inner.read_chunk_at(offset, len)
    }

    fn pos(&self) -> u64 {
        self.inner.pos()
    }

    fn offset_space(&self) -> OffsetSpace {
        self.inner.offset_space()
    }
}

fn open_slow(max_delay_ms: u64) -> Result<Box<dyn ChunkSource>> {
    let inner = open_chunk_source(sample_path(), InputFormat::Plain, 1 << 16, 4096)?;
    Ok(Box::new(SlowSource { inner, max_delay_ms }))
}

/// Requests for `picks` in order, each a single block
fn requests_for(blocks: &[Block], picks: &[usize]) -> Vec<FetchRequest> {
    picks
        .iter()
        .map(|&i| FetchRequest::single(blocks[i].offset, blocks[i].size as u64))
        .collect()
}

#[test]
fn test_random_delays_keep_plan_order() {
    let blocks = scan();
    let opener = || open_slow(5);

    for seed in 0..6u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut picks: Vec<usize> = (0..blocks.len()).collect();
        picks.shuffle(&mut rng);
        // A few repeated blocks so the plan carries duplicate offsets
        for _ in 0..4 {
            picks.push(rng.gen_range(0..blocks.len()));
        }
        let merge_max = if seed % 2 == 0 { 1 } else { 4096 };
        let plan = plan(&requests_for(&blocks, &picks), OffsetSpace::Linear, merge_max);

        let expected: Vec<Block> = plan
            .iter()
            .flat_map(|r| &r.block_offsets)
            .map(|&offset| {
                blocks
                    .iter()
                    .find(|b| b.offset == offset)
                    .cloned()
                    .expect("planned offset is a block")
            })
            .collect();

        let sequential = SequentialFetcher
            .fetch(&opener, &options(), &plan)
            .expect("Sequential fetch failed");
        assert_eq!(sequential, expected, "seed {}", seed);

        let threaded = ThreadedFetcher::with_workers(4, 3)
            .poll_interval(Duration::from_millis(20))
            .fetch(&opener, &options(), &plan)
            .expect("Threaded fetch failed");
        assert_eq!(threaded, expected, "seed {}", seed);
    }
}

#[test]
fn test_unmerged_requests_match_input_order() {
    let blocks = scan();
    let opener = || open_slow(3);
    let picks: Vec<usize> = (0..blocks.len()).rev().collect();
    let plan = plan(&requests_for(&blocks, &picks), OffsetSpace::Linear, 1);
    assert_eq!(plan.len(), blocks.len());

    let fetched = ThreadedFetcher::new(6)
        .fetch(&opener, &options(), &plan)
        .expect("Threaded fetch failed");
    let expected: Vec<Block> = blocks.iter().rev().cloned().collect();
    assert_eq!(fetched, expected);
}

#[test]
fn test_streaming_sink_sees_plan_order() {
    let blocks = scan();
    let opener = || open_slow(4);
    let mut rng = StdRng::seed_from_u64(42);
    let mut picks: Vec<usize> = (0..blocks.len()).collect();
    picks.shuffle(&mut rng);
    let plan = plan(&requests_for(&blocks, &picks), OffsetSpace::Linear, 1);

    let mut seen = Vec::new();
    ThreadedFetcher::with_workers(3, 2)
        .fetch_each(&opener, &options(), &plan, &mut |block| {
            seen.push(block.offset);
            Ok(())
        })
        .expect("Threaded fetch failed");
    let expected: Vec<u64> = picks.iter().map(|&i| blocks[i].offset).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_sink_error_stops_fetch() {
    let blocks = scan();
    let opener = || open_slow(2);
    let picks: Vec<usize> = (0..blocks.len()).collect();
    let plan = plan(&requests_for(&blocks, &picks), OffsetSpace::Linear, 1);

    let mut delivered = 0;
    let err = ThreadedFetcher::with_workers(2, 2)
        .fetch_each(&opener, &options(), &plan, &mut |_| {
            delivered += 1;
            if delivered == 5 {
                return Err(MafError::InvalidConfig("consumer gave up".to_string()));
            }
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, MafError::InvalidConfig(_)));
    assert_eq!(delivered, 5);
}
