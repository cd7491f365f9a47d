//! MAF data model: header, blocks and aligned sequences

use crate::maf::grammar::{GrammarError, Vars};
use crate::types::Strand;

/// File header: `##maf` variables plus free-text alignment parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    vars: Vars,
    alignment_params: Option<String>,
}

impl Header {
    /// Create a header; `vars` must contain `version`
    pub fn new(vars: Vars, alignment_params: Option<String>) -> Result<Self, GrammarError> {
        if !vars.iter().any(|(k, _)| k == "version") {
            return Err(GrammarError::MissingVersion);
        }
        Ok(Self {
            vars,
            alignment_params,
        })
    }

    /// Value of a header variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// MAF version (always present)
    pub fn version(&self) -> &str {
        self.get("version").unwrap_or_default()
    }

    /// Scoring scheme, if declared
    pub fn scoring(&self) -> Option<&str> {
        self.get("scoring")
    }

    /// All header variables in file order
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    /// Comment lines between `##maf` and the first block, space-joined
    pub fn alignment_params(&self) -> Option<&str> {
        self.alignment_params.as_deref()
    }
}

/// Payload of a [`Sequence`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceData {
    /// `s` line: aligned text, plus `q`/`i` data when extended parsing is on
    Aligned {
        /// Aligned bases including `-` gaps
        text: String,
        /// Per-column quality from a `q` line
        quality: Option<String>,
        /// Fields of an `i` line after the source
        synteny: Vec<String>,
    },
    /// `e` line: the species has no aligning bases here
    Empty {
        /// One-character status code
        status: char,
    },
}

/// One aligned sequence of a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// `species.chromosome`
    pub source: String,
    /// Zero-based start, on `strand`
    pub start: u64,
    /// Number of non-gap bases in the aligned region
    pub size: u64,
    /// Strand the coordinates refer to
    pub strand: Strand,
    /// Length of the whole source sequence
    pub source_size: u64,
    /// Text or empty-line status
    pub data: SequenceData,
}

impl Sequence {
    /// Species part of the source name (prefix before the first `.`)
    pub fn species(&self) -> &str {
        species_of(&self.source)
    }

    /// End of the aligned region on `strand` (exclusive)
    #[inline]
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    /// Aligned region in forward-strand coordinates
    ///
    /// Reverse-strand coordinates count from the end of the source, so
    /// `[start, end)` maps to `[source_size - end, source_size - start)`.
    pub fn forward_interval(&self) -> (u64, u64) {
        match self.strand {
            Strand::Forward => (self.start, self.end()),
            Strand::Reverse => (
                self.source_size.saturating_sub(self.end()),
                self.source_size.saturating_sub(self.start),
            ),
        }
    }

    /// Aligned text; empty for `e` sequences
    pub fn text(&self) -> &str {
        match &self.data {
            SequenceData::Aligned { text, .. } => text,
            SequenceData::Empty { .. } => "",
        }
    }

    /// Whether this sequence came from an `e` line
    pub fn is_empty(&self) -> bool {
        matches!(self.data, SequenceData::Empty { .. })
    }

    /// Status code of an `e` sequence
    pub fn status(&self) -> Option<char> {
        match self.data {
            SequenceData::Empty { status } => Some(status),
            SequenceData::Aligned { .. } => None,
        }
    }

    /// Quality string from a `q` line
    pub fn quality(&self) -> Option<&str> {
        match &self.data {
            SequenceData::Aligned { quality, .. } => quality.as_deref(),
            SequenceData::Empty { .. } => None,
        }
    }

    /// Synteny fields from an `i` line
    pub fn synteny(&self) -> &[String] {
        match &self.data {
            SequenceData::Aligned { synteny, .. } => synteny,
            SequenceData::Empty { .. } => &[],
        }
    }

    /// Whether the text contains any gap column
    pub fn is_gapped(&self) -> bool {
        self.text().contains('-')
    }

    pub(crate) fn set_quality(&mut self, value: &str) -> Result<(), GrammarError> {
        match &mut self.data {
            SequenceData::Aligned { quality, .. } => {
                *quality = Some(value.to_string());
                Ok(())
            }
            SequenceData::Empty { .. } => Err(GrammarError::Orphan('q')),
        }
    }

    pub(crate) fn set_synteny(&mut self, value: Vec<String>) -> Result<(), GrammarError> {
        match &mut self.data {
            SequenceData::Aligned { synteny, .. } => {
                *synteny = value;
                Ok(())
            }
            SequenceData::Empty { .. } => Err(GrammarError::Orphan('i')),
        }
    }
}

/// Species part of a `species.chromosome` source name
pub fn species_of(source: &str) -> &str {
    source.split('.').next().unwrap_or(source)
}

/// One alignment block
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Variables from the `a` line
    pub vars: Vars,
    /// Sequences in file order; the first is the reference
    pub sequences: Vec<Sequence>,
    /// Logical offset of the `a` line (linear or BGZF virtual)
    pub offset: u64,
    /// Bytes of block text, from the `a` line to the next block
    pub size: usize,
    /// Set when a sequence filter dropped at least one line
    pub filtered: bool,
}

impl Block {
    /// Value of a block variable
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `score` variable as a number
    pub fn score(&self) -> Option<f64> {
        self.var("score").and_then(|s| s.parse().ok())
    }

    /// First sequence of the block
    pub fn reference(&self) -> Option<&Sequence> {
        self.sequences.first()
    }

    /// Alignment width: text length of the first non-empty sequence
    pub fn text_size(&self) -> usize {
        self.sequences
            .iter()
            .find(|s| !s.is_empty())
            .map_or(0, |s| s.text().len())
    }

    /// Species present, in sequence order
    pub fn species(&self) -> Vec<&str> {
        self.sequences.iter().map(Sequence::species).collect()
    }

    /// Whether any sequence belongs to `species`
    pub fn has_species(&self, species: &str) -> bool {
        self.sequences.iter().any(|s| s.species() == species)
    }

    /// Columns where every non-empty sequence has a gap
    ///
    /// Returns `(column, run length)` pairs in column order. Such columns
    /// appear after a sequence filter removes the only species with bases
    /// there.
    pub fn find_gaps(&self) -> Vec<(usize, usize)> {
        let texts: Vec<&[u8]> = self
            .sequences
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.text().as_bytes())
            .collect();
        if texts.is_empty() {
            return Vec::new();
        }
        let width = texts.iter().map(|t| t.len()).min().unwrap_or(0);

        let mut gaps = Vec::new();
        let mut run: Option<usize> = None;
        for col in 0..width {
            let all_gap = texts.iter().all(|t| t[col] == b'-');
            match (all_gap, run) {
                (true, None) => run = Some(col),
                (false, Some(start)) => {
                    gaps.push((start, col - start));
                    run = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run {
            gaps.push((start, width - start));
        }
        gaps
    }

    /// Remove the columns reported by [`find_gaps`](Self::find_gaps)
    ///
    /// Quality strings lose the same columns. Returns the number of columns
    /// removed.
    pub fn remove_gaps(&mut self) -> usize {
        let gaps = self.find_gaps();
        let removed: usize = gaps.iter().map(|&(_, len)| len).sum();
        if removed == 0 {
            return 0;
        }
        for seq in &mut self.sequences {
            if let SequenceData::Aligned { text, quality, .. } = &mut seq.data {
                if let Some(q) = quality.as_mut() {
                    if q.len() == text.len() {
                        *q = strip_columns(q, &gaps);
                    }
                }
                *text = strip_columns(text, &gaps);
            }
        }
        removed
    }

    /// Whether `next` can be appended to this block by [`join`](Self::join)
    ///
    /// Both blocks must carry the same sources in the same order, all
    /// aligned, on the same strands, with each sequence of `next` starting
    /// where the matching sequence of `self` ends.
    pub fn joinable_with(&self, next: &Block) -> bool {
        self.sequences.len() == next.sequences.len()
            && !self.sequences.is_empty()
            && self.sequences.iter().zip(&next.sequences).all(|(a, b)| {
                !a.is_empty()
                    && !b.is_empty()
                    && a.source == b.source
                    && a.strand == b.strand
                    && a.end() == b.start
            })
    }

    /// Concatenate two adjacent blocks into one
    ///
    /// Returns `None` unless [`joinable_with`](Self::joinable_with) holds.
    /// The result keeps this block's variables and offset; quality survives
    /// only when both sides have it, synteny is taken from `next`.
    pub fn join(&self, next: &Block) -> Option<Block> {
        if !self.joinable_with(next) {
            return None;
        }
        let sequences = self
            .sequences
            .iter()
            .zip(&next.sequences)
            .map(|(a, b)| {
                let text = format!("{}{}", a.text(), b.text());
                let quality = match (a.quality(), b.quality()) {
                    (Some(qa), Some(qb)) => Some(format!("{}{}", qa, qb)),
                    _ => None,
                };
                Sequence {
                    source: a.source.clone(),
                    start: a.start,
                    size: a.size + b.size,
                    strand: a.strand,
                    source_size: a.source_size,
                    data: SequenceData::Aligned {
                        text,
                        quality,
                        synteny: b.synteny().to_vec(),
                    },
                }
            })
            .collect();
        Some(Block {
            vars: self.vars.clone(),
            sequences,
            offset: self.offset,
            size: self.size + next.size,
            filtered: self.filtered || next.filtered,
        })
    }
}

fn strip_columns(text: &str, gaps: &[(usize, usize)]) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    for &(start, len) in gaps {
        if start > bytes.len() {
            break;
        }
        out.extend_from_slice(&bytes[pos..start]);
        pos = (start + len).min(bytes.len());
    }
    out.extend_from_slice(&bytes[pos..]);
    String::from_utf8_lossy(&out).into_owned()
}
