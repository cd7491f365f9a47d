//! UCSC hierarchical binning
//!
//! Every interval is assigned to the smallest bin that fully contains it.
//!
//! # Standard scheme (`end <= 512 Mbp`)
//!
//! Five levels, finest first:
//!
//! | level | bin span | bins | first id |
//! |---|---|---|---|
//! | 4 | 128 Kbp | 4096 | 585 |
//! | 3 | 1 Mbp | 512 | 73 |
//! | 2 | 8 Mbp | 64 | 9 |
//! | 1 | 64 Mbp | 8 | 1 |
//! | 0 | 512 Mbp | 1 | 0 |
//!
//! # Extended scheme (`end > 512 Mbp`)
//!
//! Six levels up to 4 Gbp, numbered from 4681 so the two schemes never
//! share an id. Intervals on long chromosomes use it; everything else keeps
//! its standard bin.
//!
//! Levels reported by [`bin_level`] count from the coarsest extended level
//! (4 Gbp), so a standard level-0 bin and an extended level-1 bin both
//! span 512 Mbp and report level 1.

/// log2 of the finest bin span
pub const BIN_FIRST_SHIFT: u32 = 17;

/// log2 of the span ratio between adjacent levels
pub const BIN_NEXT_SHIFT: u32 = 3;

/// Largest end coordinate of the standard scheme
pub const STANDARD_MAX_END: u64 = 1 << 29;

/// Largest coordinate the extended scheme can bin
pub const MAX_COORDINATE: u64 = 1 << 32;

/// Id offset separating extended bins from standard ones
pub const OLD_TO_EXTENDED: u32 = 4681;

const STANDARD_OFFSETS: [u32; 5] = [512 + 64 + 8 + 1, 64 + 8 + 1, 8 + 1, 1, 0];
const EXTENDED_OFFSETS: [u32; 6] = [4096 + 512 + 64 + 8 + 1, 512 + 64 + 8 + 1, 64 + 8 + 1, 8 + 1, 1, 0];

#[inline]
fn last_base(start: u64, end: u64) -> u64 {
    if end > start {
        end - 1
    } else {
        start
    }
}

/// Bin of the half-open interval `[start, end)`
///
/// Coordinates at or beyond [`MAX_COORDINATE`] are clamped into the last
/// extended bin; callers index only intervals below it.
pub fn bin_from_range(start: u64, end: u64) -> u32 {
    let last = last_base(start, end);
    let mut start_bin = start.min(MAX_COORDINATE - 1) >> BIN_FIRST_SHIFT;
    let mut end_bin = last.min(MAX_COORDINATE - 1) >> BIN_FIRST_SHIFT;
    if end <= STANDARD_MAX_END {
        for &offset in &STANDARD_OFFSETS {
            if start_bin == end_bin {
                return offset + start_bin as u32;
            }
            start_bin >>= BIN_NEXT_SHIFT;
            end_bin >>= BIN_NEXT_SHIFT;
        }
        0
    } else {
        for &offset in &EXTENDED_OFFSETS {
            if start_bin == end_bin {
                return OLD_TO_EXTENDED + offset + start_bin as u32;
            }
            start_bin >>= BIN_NEXT_SHIFT;
            end_bin >>= BIN_NEXT_SHIFT;
        }
        OLD_TO_EXTENDED
    }
}

/// Inclusive bin-id ranges that may hold intervals overlapping `[start, end)`
///
/// One range per level of each scheme. Standard ranges are omitted when the
/// query starts beyond the standard scheme's reach.
pub fn bin_ranges(start: u64, end: u64) -> Vec<(u32, u32)> {
    let last = last_base(start, end).min(MAX_COORDINATE - 1);
    let start = start.min(MAX_COORDINATE - 1);
    let mut ranges = Vec::with_capacity(STANDARD_OFFSETS.len() + EXTENDED_OFFSETS.len());

    if start < STANDARD_MAX_END {
        let mut s = start >> BIN_FIRST_SHIFT;
        let mut e = last.min(STANDARD_MAX_END - 1) >> BIN_FIRST_SHIFT;
        for &offset in &STANDARD_OFFSETS {
            ranges.push((offset + s as u32, offset + e as u32));
            s >>= BIN_NEXT_SHIFT;
            e >>= BIN_NEXT_SHIFT;
        }
    }

    let mut s = start >> BIN_FIRST_SHIFT;
    let mut e = last >> BIN_FIRST_SHIFT;
    for &offset in &EXTENDED_OFFSETS {
        ranges.push((OLD_TO_EXTENDED + offset + s as u32, OLD_TO_EXTENDED + offset + e as u32));
        s >>= BIN_NEXT_SHIFT;
        e >>= BIN_NEXT_SHIFT;
    }
    ranges
}

/// Depth of a bin; larger is finer
pub fn bin_level(bin: u32) -> usize {
    let (local, offsets, shift): (u32, &[u32], usize) = if bin >= OLD_TO_EXTENDED {
        (bin - OLD_TO_EXTENDED, &EXTENDED_OFFSETS, 0)
    } else {
        (bin, &STANDARD_OFFSETS, 1)
    };
    // Offsets are finest first; find the coarsest level whose first id is
    // not above `local`.
    let depth = offsets.len() - 1;
    for (i, &offset) in offsets.iter().enumerate() {
        if local >= offset {
            return depth - i + shift;
        }
    }
    shift
}

/// Span in bases of the bins at `level`
pub fn level_span(level: usize) -> u64 {
    let coarsest = BIN_FIRST_SHIFT + BIN_NEXT_SHIFT * (EXTENDED_OFFSETS.len() as u32 - 1);
    1u64 << (coarsest - BIN_NEXT_SHIFT * level as u32)
}
