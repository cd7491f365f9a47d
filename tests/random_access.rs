//! Indexed random access against a sequential scan of the same file
//!
//! For every storage format and fetcher, an indexed query must return
//! exactly the blocks a full scan finds overlapping the query.

use biomaf::fetch::FetchRequest;
use biomaf::io::chunk::OffsetSpace;
use biomaf::io::compression::CompressedWriter;
use biomaf::io::DataSink;
use biomaf::maf::{Block, BlockFilter, IndexedMaf, MafReader, MafWriter, ParseOptions};
use biomaf::types::GenomicInterval;
use biomaf::{IndexMode, MafError, MafIndex, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn test_data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

fn options() -> ParseOptions {
    ParseOptions::default().with_extended(true).with_empty(true)
}

fn scan(path: &Path) -> Vec<Block> {
    MafReader::from_path(path, options())
        .expect("Failed to open MAF")
        .collect::<Result<Vec<_>>>()
        .expect("Failed to scan MAF")
}

/// Blocks of a full scan with a sequence overlapping `interval`
fn brute_force(blocks: &[Block], interval: &GenomicInterval) -> Vec<Block> {
    blocks
        .iter()
        .filter(|block| {
            block.sequences.iter().filter(|s| !s.is_empty()).any(|s| {
                let (start, end) = s.forward_interval();
                s.source == interval.sequence && interval.overlaps_range(start, end)
            })
        })
        .cloned()
        .collect()
}

/// Copy the sample into `dir` as BGZF with small blocks so MAF blocks
/// straddle BGZF blocks
fn write_bgzf(dir: &Path) -> PathBuf {
    let path = dir.join("chr22_sample.maf.bgz");
    let file = File::create(&path).expect("Failed to create BGZF file");
    let mut writer = CompressedWriter::bgzf_with_block_size(Box::new(file), 512);
    let data = fs::read(test_data("chr22_sample.maf")).expect("Failed to read sample");
    writer.write_all(&data).expect("Failed to compress");
    writer.finish().expect("Failed to finish BGZF");
    path
}

fn queries() -> Vec<GenomicInterval> {
    let mut queries = vec![
        GenomicInterval::new("hg18.chr22", 0, 1 << 32).expect("valid interval"),
        GenomicInterval::new("hg18.chr22", 16_000_000, 16_000_001).expect("valid interval"),
        GenomicInterval::new("hg18.chr22", 16_000_150, 16_000_900).expect("valid interval"),
        GenomicInterval::new("hg18.chr22", 16_002_000, 16_004_000).expect("valid interval"),
        GenomicInterval::new("hg18.chr22", 20_000_000, 20_000_100).expect("valid interval"),
        GenomicInterval::new("hg19.chr22", 0, 1000).expect("valid interval"),
    ];
    // Whole-sequence queries for the other species, forward coordinates
    for (source, total) in [
        ("panTro2.chr22", 49_737_984),
        ("rheMac2.chr10", 94_855_758),
        ("mm9.chr15", 103_494_974),
        ("rn4.chr7", 145_729_302),
        ("canFam2.chr10", 69_331_447),
    ] {
        queries.push(GenomicInterval::new(source, 0, total).expect("valid interval"));
    }
    queries
}

fn check_against_scan(maf_path: &Path, index: &MafIndex, query_options: ParseOptions) {
    let blocks = scan(maf_path);
    let maf = IndexedMaf::open(maf_path, index.clone(), query_options).expect("Failed to open indexed MAF");
    for interval in queries() {
        let expected = brute_force(&blocks, &interval);
        let found = maf
            .query(std::slice::from_ref(&interval), &BlockFilter::default())
            .expect("Query failed");
        assert_eq!(found, expected, "query {}", interval);
    }
}

// ============================================================================
// Plain files
// ============================================================================

#[test]
fn test_plain_queries_match_scan() {
    let path = test_data("chr22_sample.maf");
    let index = MafIndex::build_from_path(&path, IndexMode::AllSequences, options()).expect("Failed to build index");
    assert_eq!(index.block_count(), 24);
    assert_eq!(index.offset_space(), OffsetSpace::Linear);

    check_against_scan(&path, &index, options());
    check_against_scan(&path, &index, options().with_threads(4));
    check_against_scan(&path, &index, options().with_threads(3).with_merge_max(256));
}

#[test]
fn test_reference_index_covers_only_reference() {
    let path = test_data("chr22_sample.maf");
    let index = MafIndex::build_from_path(&path, IndexMode::Reference, options()).expect("Failed to build index");
    assert_eq!(index.sequence_names().collect::<Vec<_>>(), vec!["hg18.chr22"]);
    assert_eq!(index.len(), 24);

    let maf = IndexedMaf::open(&path, index, options()).expect("Failed to open indexed MAF");
    let mouse = GenomicInterval::new("mm9.chr15", 0, 103_494_974).expect("valid interval");
    assert!(maf.query(&[mouse], &BlockFilter::default()).expect("Query failed").is_empty());

    let all = GenomicInterval::new("hg18.chr22", 0, 49_691_432).expect("valid interval");
    assert_eq!(maf.query(&[all], &BlockFilter::default()).expect("Query failed"), scan(&path));
}

#[test]
fn test_multiple_intervals_return_each_block_once() {
    let path = test_data("chr22_sample.maf");
    let index = MafIndex::build_from_path(&path, IndexMode::AllSequences, options()).expect("Failed to build index");
    let maf = IndexedMaf::open(&path, index, options().with_threads(2)).expect("Failed to open indexed MAF");

    let intervals = [
        GenomicInterval::new("hg18.chr22", 16_000_000, 16_001_000).expect("valid interval"),
        GenomicInterval::new("hg18.chr22", 16_000_500, 16_001_500).expect("valid interval"),
        GenomicInterval::new("panTro2.chr22", 0, 49_737_984).expect("valid interval"),
    ];
    let found = maf.query(&intervals, &BlockFilter::default()).expect("Query failed");
    let mut offsets: Vec<u64> = found.iter().map(|b| b.offset).collect();
    let count = offsets.len();
    offsets.dedup();
    assert_eq!(offsets.len(), count, "a block was returned twice");
    assert!(offsets.windows(2).all(|w| w[0] < w[1]), "blocks out of file order");
}

#[test]
fn test_query_with_block_filter() {
    let path = test_data("chr22_sample.maf");
    let index = MafIndex::build_from_path(&path, IndexMode::Reference, options()).expect("Failed to build index");
    let maf = IndexedMaf::open(&path, index, options()).expect("Failed to open indexed MAF");
    let all = [GenomicInterval::new("hg18.chr22", 0, 49_691_432).expect("valid interval")];

    let filter = BlockFilter::default().with_all_species(["hg18", "rn4"]).min_text_size(40);
    let found = maf.query(&all, &filter).expect("Query failed");
    let expected: Vec<Block> = scan(&path).into_iter().filter(|b| filter.matches(b)).collect();
    assert!(!expected.is_empty());
    assert_eq!(found, expected);
    for block in &found {
        assert!(block.has_species("rn4"));
        assert!(block.text_size() >= 40);
    }
}

// ============================================================================
// BGZF files
// ============================================================================

#[test]
fn test_bgzf_queries_match_scan() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_bgzf(dir.path());
    let index = MafIndex::build_from_path(&path, IndexMode::AllSequences, options()).expect("Failed to build index");
    assert_eq!(index.offset_space(), OffsetSpace::Virtual);
    assert_eq!(index.block_count(), 24);

    check_against_scan(&path, &index, options());
    check_against_scan(&path, &index, options().with_threads(4));
}

#[test]
fn test_index_from_one_format_rejected_for_another() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let bgzf = write_bgzf(dir.path());
    let plain_index = MafIndex::build_from_path(test_data("chr22_sample.maf"), IndexMode::Reference, options())
        .expect("Failed to build index");
    assert!(matches!(
        IndexedMaf::open(&bgzf, plain_index, options()),
        Err(MafError::InvalidIndex(_))
    ));
}

#[test]
fn test_writer_bgzf_output_is_indexable() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("rewritten.maf.bgz");

    let reader = MafReader::from_path(test_data("chr22_sample.maf"), options()).expect("Failed to open");
    let header = reader.header().clone();
    let mut writer = MafWriter::to_sink(DataSink::from_path(&path)).expect("Failed to create writer");
    writer.write_header(&header).expect("Failed to write header");
    for block in reader {
        writer.write_block(&block.expect("Failed to parse")).expect("Failed to write block");
    }
    writer.finish().expect("Failed to finish writer");

    let index = MafIndex::build_from_path(&path, IndexMode::AllSequences, options()).expect("Failed to build index");
    assert_eq!(index.offset_space(), OffsetSpace::Virtual);
    check_against_scan(&path, &index, options().with_threads(2));
}

// ============================================================================
// Index persistence
// ============================================================================

#[test]
fn test_saved_index_round_trip() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let maf_path = write_bgzf(dir.path());
    let index_path = dir.path().join("chr22_sample.maf.bgz.mafi");

    let index = MafIndex::build_from_path(&maf_path, IndexMode::AllSequences, options()).expect("Failed to build index");
    index.write(&index_path).expect("Failed to save index");
    let loaded = MafIndex::from_path(&index_path).expect("Failed to load index");
    assert_eq!(loaded, index);

    let maf = IndexedMaf::open_with_index_file(&maf_path, &index_path, options()).expect("Failed to open");
    assert_eq!(maf.header().expect("header").scoring(), Some("tba.v8"));
    let all = GenomicInterval::new("hg18.chr22", 0, 49_691_432).expect("valid interval");
    assert_eq!(maf.query(&[all], &BlockFilter::default()).expect("Query failed").len(), 24);
}

#[test]
fn test_uncompressed_index_loads() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let index_path = dir.path().join("raw.mafi");
    let index = MafIndex::build_from_path(test_data("chr22_sample.maf"), IndexMode::Reference, options())
        .expect("Failed to build index");

    let mut raw = Vec::new();
    index.write_to(&mut raw).expect("Failed to serialize index");
    fs::write(&index_path, &raw).expect("Failed to write index");
    assert_eq!(MafIndex::from_path(&index_path).expect("Failed to load index"), index);

    fs::write(&index_path, &raw[..raw.len() / 2]).expect("Failed to write index");
    assert!(matches!(MafIndex::from_path(&index_path), Err(MafError::InvalidIndex(_))));
}

#[test]
fn test_filtered_reader_cannot_build_index() {
    let reader = MafReader::from_path(test_data("chr22_sample.maf"), options().only_species(["hg18"]))
        .expect("Failed to open");
    assert!(matches!(
        MafIndex::build(reader, IndexMode::Reference),
        Err(MafError::InvalidConfig(_))
    ));
}

// ============================================================================
// Integrity
// ============================================================================

#[test]
fn test_stale_index_is_detected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("edited.maf");
    let index = MafIndex::build_from_path(test_data("chr22_sample.maf"), IndexMode::Reference, options())
        .expect("Failed to build index");

    // An extra header comment shifts every block
    let original = fs::read_to_string(test_data("chr22_sample.maf")).expect("Failed to read sample");
    let edited = original.replacen("\n", "\n# realigned\n", 1);
    fs::write(&path, edited).expect("Failed to write edited file");

    for threads in [1, 4] {
        let maf = IndexedMaf::open(&path, index.clone(), options().with_threads(threads)).expect("Failed to open");
        let all = GenomicInterval::new("hg18.chr22", 0, 49_691_432).expect("valid interval");
        let err = maf.query(&[all], &BlockFilter::default()).unwrap_err();
        assert!(err.is_integrity(), "expected integrity error, got {:?}", err);
    }
}

#[test]
fn test_fetch_preserves_request_order() {
    let path = test_data("chr22_sample.maf");
    let index = MafIndex::build_from_path(&path, IndexMode::Reference, options()).expect("Failed to build index");
    let blocks = scan(&path);
    let maf = IndexedMaf::open(&path, index, options().with_threads(4)).expect("Failed to open");

    let order = [7usize, 0, 23, 7, 12, 3, 4, 5];
    let requests: Vec<FetchRequest> = order
        .iter()
        .map(|&i| FetchRequest::single(blocks[i].offset, blocks[i].size as u64))
        .collect();
    let fetched = maf.fetch(&requests).expect("Fetch failed");
    let expected: Vec<Block> = order.iter().map(|&i| blocks[i].clone()).collect();
    assert_eq!(fetched, expected);
}
