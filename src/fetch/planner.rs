//! Merging of block lookups into physical reads
//!
//! Index lookups arrive as one `(offset, length)` pair per block. Reading
//! them one at a time wastes seeks, so nearby lookups are merged:
//!
//! - **Linear offsets**: a request joins the previous group only when it
//!   starts exactly where that group ends and the group stays within
//!   `merge_max` bytes.
//! - **BGZF virtual offsets**: requests are grouped by the compressed block
//!   holding their start, contiguous or not, since the whole block has to
//!   be inflated anyway. A group spans from its first offset to the end of
//!   its furthest request.
//!
//! Groups keep the order in which they first appear.

use crate::io::chunk::OffsetSpace;
use crate::io::compression::VirtualOffset;
use std::collections::HashMap;
use tracing::debug;

/// One physical read and the block starts expected inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Logical offset of the first byte to read
    pub offset: u64,
    /// Uncompressed bytes to read
    pub length: u64,
    /// Offsets of the blocks the read must contain, in output order
    pub block_offsets: Vec<u64>,
}

/// A request after merging; same shape as a single lookup
pub type MergedFetchRequest = FetchRequest;

impl FetchRequest {
    /// Request for a single block
    pub fn single(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            block_offsets: vec![offset],
        }
    }

    /// Linear offset just past the request
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Merge lookups into reads for the given offset space
pub fn plan(requests: &[FetchRequest], space: OffsetSpace, merge_max: u64) -> Vec<MergedFetchRequest> {
    let merged = match space {
        OffsetSpace::Linear => merge_linear(requests, merge_max),
        OffsetSpace::Virtual => merge_bgzf(requests),
    };
    debug!(
        requests = requests.len(),
        reads = merged.len(),
        ?space,
        "planned fetch"
    );
    merged
}

/// Merge exactly adjacent requests up to `merge_max` bytes per read
pub fn merge_linear(requests: &[FetchRequest], merge_max: u64) -> Vec<MergedFetchRequest> {
    let mut merged: Vec<FetchRequest> = Vec::new();
    for req in requests {
        if let Some(last) = merged.last_mut() {
            if last.end() == req.offset && last.length + req.length <= merge_max {
                last.length += req.length;
                last.block_offsets.extend_from_slice(&req.block_offsets);
                continue;
            }
        }
        merged.push(req.clone());
    }
    merged
}

/// Group requests by the compressed BGZF block they start in
pub fn merge_bgzf(requests: &[FetchRequest]) -> Vec<MergedFetchRequest> {
    let mut groups: Vec<Vec<&FetchRequest>> = Vec::new();
    let mut slot: HashMap<u64, usize> = HashMap::new();
    for req in requests {
        let key = OffsetSpace::Virtual.block_key(req.offset);
        let idx = *slot.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[idx].push(req);
    }

    groups
        .into_iter()
        .filter_map(|group| {
            let start = group.iter().map(|r| r.offset).min()?;
            let compressed = VirtualOffset::from_raw(start).compressed_offset();
            let base = VirtualOffset::from_raw(start).uncompressed_offset() as u64;
            let end = group
                .iter()
                .map(|r| VirtualOffset::from_raw(r.offset).uncompressed_offset() as u64 + r.length)
                .max()?;
            Some(FetchRequest {
                offset: VirtualOffset::new(compressed, base as u16).as_raw(),
                length: end - base,
                block_offsets: group.iter().flat_map(|r| r.block_offsets.iter().copied()).collect(),
            })
        })
        .collect()
}
