//! Coordinate types shared by the parser, index and query layers
//!
//! All intervals are **0-based, half-open** `[start, end)`, matching MAF
//! `s` line coordinates: `start` is inclusive, `end = start + size` is
//! exclusive.
//!
//! ```
//! use biomaf::types::{GenomicInterval, Strand};
//! use std::str::FromStr;
//!
//! let a = GenomicInterval::new("hg18.chr7", 100, 200)?;
//! let b = GenomicInterval::new("hg18.chr7", 150, 250)?;
//! assert!(a.overlaps(&b));
//! assert_eq!(a.length(), 100);
//! assert_eq!(Strand::from_str("-")?, Strand::Reverse);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{MafError, Result};
use crate::maf::grammar::GrammarError;
use std::fmt;
use std::str::FromStr;

/// A genomic interval on a named sequence (e.g. `hg18.chr7`)
///
/// # Invariants
///
/// - `start < end` (enforced by the constructor)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenomicInterval {
    /// Full MAF source name, `species.chromosome`
    pub sequence: String,

    /// Start position (0-based, inclusive)
    pub start: u64,

    /// End position (0-based, exclusive)
    pub end: u64,
}

impl GenomicInterval {
    /// Create an interval
    ///
    /// # Errors
    ///
    /// Returns [`MafError::InvalidRange`] if `start >= end`.
    pub fn new(sequence: impl Into<String>, start: u64, end: u64) -> Result<Self> {
        if start >= end {
            return Err(MafError::InvalidRange(format!(
                "start ({}) >= end ({})",
                start, end
            )));
        }
        Ok(GenomicInterval {
            sequence: sequence.into(),
            start,
            end,
        })
    }

    /// Length of the interval
    #[inline]
    pub fn length(&self) -> u64 {
        self.end - self.start
    }

    /// Whether two intervals share at least one base on the same sequence
    pub fn overlaps(&self, other: &Self) -> bool {
        self.sequence == other.sequence && self.overlaps_range(other.start, other.end)
    }

    /// Whether `[start, end)` shares at least one base with this interval
    #[inline]
    pub fn overlaps_range(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }

    /// Whether this interval completely contains another
    pub fn contains(&self, other: &Self) -> bool {
        self.sequence == other.sequence && self.start <= other.start && self.end >= other.end
    }
}

impl fmt::Display for GenomicInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.sequence, self.start, self.end)
    }
}

/// Strand of an aligned sequence
///
/// MAF only knows two strands; `.` and other tokens are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    /// Plus strand (`+`)
    Forward,
    /// Minus strand (`-`)
    Reverse,
}

impl Strand {
    /// The strand token as written in MAF
    pub fn as_char(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

impl FromStr for Strand {
    type Err = GrammarError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            _ => Err(GrammarError::InvalidStrand(s.to_string())),
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_rejects_empty() {
        assert!(GenomicInterval::new("hg18.chr1", 10, 10).is_err());
        assert!(GenomicInterval::new("hg18.chr1", 20, 10).is_err());
    }

    #[test]
    fn test_interval_overlap_requires_same_sequence() {
        let a = GenomicInterval::new("hg18.chr1", 100, 200).unwrap();
        let b = GenomicInterval::new("hg18.chr2", 100, 200).unwrap();
        let c = GenomicInterval::new("hg18.chr1", 200, 300).unwrap();
        assert!(!a.overlaps(&b));
        assert!(!a.overlaps(&c)); // half-open: touching is not overlapping
        assert!(a.overlaps_range(199, 201));
    }

    #[test]
    fn test_strand_parse() {
        assert_eq!("+".parse::<Strand>().unwrap(), Strand::Forward);
        assert_eq!("-".parse::<Strand>().unwrap(), Strand::Reverse);
        assert!(".".parse::<Strand>().is_err());
        assert!("x".parse::<Strand>().is_err());
        assert_eq!(Strand::Reverse.to_string(), "-");
    }
}
