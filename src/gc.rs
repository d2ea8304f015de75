//! Per-request tracking of temporaries created while scanning parameters.
//!
//! Values produced by type conversion (for example an integer formatted as a
//! string) must stay alive until the request finishes, because handlers keep
//! referring to them. [`GcList`] owns them in chained blocks and releases
//! everything at once when dropped, in block order.

use log::trace;

const INITIAL_BLOCK_SLOTS: usize = 4;

const fn block_slots(index: usize) -> usize { INITIAL_BLOCK_SLOTS << index }

/// Chained blocks of values released together at teardown.
///
/// The first block holds four values; every further block is twice the size
/// of the previous one. Values are never released individually.
///
/// # Examples
///
/// ```
/// use binrpc::gc::GcList;
///
/// let mut gc = GcList::new();
/// for n in 0..5 {
///     gc.track(n.to_string());
/// }
/// assert_eq!(gc.len(), 5);
/// assert_eq!(gc.blocks(), 2);
/// ```
#[derive(Debug)]
pub struct GcList<T> {
    blocks: Vec<Vec<T>>,
}

impl<T> Default for GcList<T> {
    fn default() -> Self { Self::new() }
}

impl<T> GcList<T> {
    /// Create an empty list; no block is allocated until the first value.
    #[must_use]
    pub const fn new() -> Self { Self { blocks: Vec::new() } }

    /// Take ownership of `value` until the list is dropped and return a
    /// reference to the stored value.
    pub fn track(&mut self, value: T) -> &T {
        let full = self
            .blocks
            .last()
            .is_none_or(|block| block.len() == block_slots(self.blocks.len() - 1));
        if full {
            let slots = block_slots(self.blocks.len());
            self.blocks.push(Vec::with_capacity(slots));
        }
        let idx = self.blocks.len() - 1;
        let block = &mut self.blocks[idx];
        block.push(value);
        &block[block.len() - 1]
    }

    /// Number of tracked values.
    #[must_use]
    pub fn len(&self) -> usize { self.blocks.iter().map(Vec::len).sum() }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.blocks.iter().all(Vec::is_empty) }

    /// Number of allocated blocks.
    #[must_use]
    pub fn blocks(&self) -> usize { self.blocks.len() }
}

impl<T> Drop for GcList<T> {
    fn drop(&mut self) {
        if !self.blocks.is_empty() {
            trace!(
                "releasing request temporaries: values={}, blocks={}",
                self.len(),
                self.blocks.len()
            );
        }
        // blocks and their values drop front to back
    }
}
