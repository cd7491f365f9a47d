//! Block-level filters applied after parsing or fetching

use crate::maf::record::Block;

/// Conditions a block must meet to be returned by a query
///
/// An empty filter accepts every block.
///
/// ```
/// use biomaf::maf::BlockFilter;
///
/// let filter = BlockFilter::default()
///     .min_sequences(3)
///     .with_all_species(["hg18", "mm4"]);
/// assert!(!filter.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockFilter {
    /// Minimum number of sequences
    pub min_sequences: Option<usize>,
    /// Minimum alignment width
    pub min_text_size: Option<usize>,
    /// Maximum alignment width
    pub max_text_size: Option<usize>,
    /// Every one of these species must be present
    pub all_species: Vec<String>,
    /// At least one of these species must be present
    pub any_species: Vec<String>,
}

impl BlockFilter {
    /// Require at least `n` sequences
    pub fn min_sequences(mut self, n: usize) -> Self {
        self.min_sequences = Some(n);
        self
    }

    /// Require an alignment width of at least `n` columns
    pub fn min_text_size(mut self, n: usize) -> Self {
        self.min_text_size = Some(n);
        self
    }

    /// Require an alignment width of at most `n` columns
    pub fn max_text_size(mut self, n: usize) -> Self {
        self.max_text_size = Some(n);
        self
    }

    /// Require every listed species
    pub fn with_all_species<I, S>(mut self, species: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.all_species = species.into_iter().map(Into::into).collect();
        self
    }

    /// Require at least one listed species
    pub fn with_any_species<I, S>(mut self, species: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.any_species = species.into_iter().map(Into::into).collect();
        self
    }

    /// Whether no condition is set
    pub fn is_empty(&self) -> bool {
        self == &BlockFilter::default()
    }

    /// Whether `block` passes every condition
    pub fn matches(&self, block: &Block) -> bool {
        if let Some(n) = self.min_sequences {
            if block.sequences.len() < n {
                return false;
            }
        }
        if self.min_text_size.is_some() || self.max_text_size.is_some() {
            let width = block.text_size();
            if self.min_text_size.map_or(false, |n| width < n)
                || self.max_text_size.map_or(false, |n| width > n)
            {
                return false;
            }
        }
        if !self.all_species.iter().all(|s| block.has_species(s)) {
            return false;
        }
        self.any_species.is_empty() || self.any_species.iter().any(|s| block.has_species(s))
    }
}
