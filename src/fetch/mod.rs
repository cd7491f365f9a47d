//! Random-access block fetching
//!
//! Index lookups become [`FetchRequest`]s, the [planner](planner) merges
//! them into physical reads, and a [`BlockFetcher`] executes the plan,
//! returning blocks in request order whether it runs on one thread or many.

pub mod pipeline;
pub mod planner;
pub mod reorder;

pub use pipeline::{
    fetcher_for, BlockFetcher, FileOpener, SequentialFetcher, SourceOpener, ThreadedFetcher,
};
pub use planner::{merge_bgzf, merge_linear, plan, FetchRequest, MergedFetchRequest};
pub use reorder::ReorderBuffer;
