//! Restores request order for out-of-order completions

use crate::error::{MafError, Result};
use std::collections::BTreeMap;

/// Buffers completed fetches until every earlier request has completed
///
/// Completions are keyed by their slot in the plan, so two requests with
/// the same offset but different extents are never confused.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    len: usize,
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> ReorderBuffer<T> {
    /// Track completions for slots `0..len`, released in slot order
    pub fn new(len: usize) -> Self {
        Self {
            len,
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Record the completion of `slot` and return every item now in order
    pub fn push(&mut self, slot: usize, item: T) -> Result<Vec<T>> {
        if slot >= self.len || slot < self.next || self.pending.contains_key(&slot) {
            return Err(MafError::Integrity {
                msg: format!(
                    "unexpected completion for request {} of {} ({} released)",
                    slot, self.len, self.next
                ),
            });
        }
        self.pending.insert(slot, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push(item);
            self.next += 1;
        }
        Ok(ready)
    }

    /// Requests not yet released
    pub fn outstanding(&self) -> usize {
        self.len - self.next
    }

    /// Completions held back waiting for earlier requests
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Whether every expected completion has been released
    pub fn is_complete(&self) -> bool {
        self.next == self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_release() {
        let mut buf = ReorderBuffer::new(3);
        assert_eq!(buf.push(0, 'a').unwrap(), vec!['a']);
        assert_eq!(buf.push(1, 'b').unwrap(), vec!['b']);
        assert_eq!(buf.push(2, 'c').unwrap(), vec!['c']);
        assert!(buf.is_complete());
    }

    #[test]
    fn test_out_of_order_release() {
        let mut buf = ReorderBuffer::new(3);
        assert!(buf.push(2, 'c').unwrap().is_empty());
        assert!(buf.push(1, 'b').unwrap().is_empty());
        assert_eq!(buf.buffered(), 2);
        assert_eq!(buf.outstanding(), 3);
        assert_eq!(buf.push(0, 'a').unwrap(), vec!['a', 'b', 'c']);
        assert_eq!(buf.buffered(), 0);
        assert!(buf.is_complete());
    }

    #[test]
    fn test_repeated_slot_rejected() {
        let mut buf = ReorderBuffer::new(3);
        assert!(buf.push(2, 3).unwrap().is_empty());
        assert!(buf.push(2, 4).unwrap_err().is_integrity());
        assert_eq!(buf.push(0, 1).unwrap(), vec![1]);
        assert!(buf.push(0, 5).unwrap_err().is_integrity());
        assert_eq!(buf.push(1, 2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_slot_out_of_range() {
        let mut buf: ReorderBuffer<()> = ReorderBuffer::new(1);
        assert!(buf.push(1, ()).unwrap_err().is_integrity());
        assert!(!buf.is_complete());
    }

    #[test]
    fn test_empty_plan_is_complete() {
        let buf: ReorderBuffer<u8> = ReorderBuffer::new(0);
        assert!(buf.is_complete());
        assert_eq!(buf.outstanding(), 0);
    }
}
