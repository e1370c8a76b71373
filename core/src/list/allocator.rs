//! Slab allocator backing [`List`](super::List) nodes.
//!
//! Nodes live in one contiguous `Vec` that grows in fixed-size batches. A
//! released slot goes onto a free list and is handed out again by the next
//! allocation, with its generation bumped so that stale
//! [`ElementId`](super::ElementId)s can be told apart from live ones.
//!
//! Slot `0` is reserved for the list sentinel and is never handed out.

/// Index of the sentinel node inside every allocator.
pub(crate) const SENTINEL: u32 = 0;

/// A single list node. `value` is `None` while the slot sits on the free list.
#[derive(Debug)]
pub(crate) struct Node<T> {
    pub(crate) value: Option<T>,
    pub(crate) prev: u32,
    pub(crate) next: u32,
    pub(crate) generation: u32,
    pub(crate) escaped: bool,
}

impl<T> Node<T> {
    fn vacant() -> Self {
        Self {
            value: None,
            prev: SENTINEL,
            next: SENTINEL,
            generation: 0,
            escaped: false,
        }
    }
}

/// Batch-growing slot pool for list nodes.
///
/// # Example
///
/// ```
/// use strand_core::list::{Allocator, List};
///
/// let list = List::with_allocator(Allocator::with_batch_size(64));
/// list.push_back(1u32);
/// assert_eq!(list.allocator_stats().capacity, 64);
/// assert_eq!(list.allocator_stats().outstanding, 1);
/// ```
#[derive(Debug)]
pub struct Allocator<T> {
    nodes: Vec<Node<T>>,
    free: Vec<u32>,
    batch_size: usize,
    outstanding: usize,
}

/// Snapshot of allocator occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Slots currently handed out (live or escaped but not yet collected).
    pub outstanding: usize,
    /// Slots reserved so far, excluding the sentinel.
    pub capacity: usize,
    /// Slots reserved per growth step.
    pub batch_size: usize,
}

impl<T> Allocator<T> {
    /// Slots reserved per growth step when no batch size is given.
    pub const DEFAULT_BATCH_SIZE: usize = 16;

    /// Creates an allocator with [`DEFAULT_BATCH_SIZE`](Self::DEFAULT_BATCH_SIZE).
    pub fn new() -> Self {
        Self::with_batch_size(Self::DEFAULT_BATCH_SIZE)
    }

    /// Creates an allocator that grows `batch_size` slots at a time.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn with_batch_size(batch_size: usize) -> Self {
        assert!(batch_size > 0, "Allocator batch size must be non-zero");
        Self {
            nodes: vec![Node::vacant()],
            free: Vec::new(),
            batch_size,
            outstanding: 0,
        }
    }

    /// Returns current occupancy.
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            outstanding: self.outstanding,
            capacity: self.capacity(),
            batch_size: self.batch_size,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Hands out a slot holding `value`.
    pub(crate) fn alloc(&mut self, value: T) -> u32 {
        if self.free.is_empty() {
            self.grow();
        }
        let index = self.free.pop().unwrap_or_else(|| self.push_vacant());
        let node = &mut self.nodes[index as usize];
        node.value = Some(value);
        node.escaped = false;
        self.outstanding += 1;
        index
    }

    /// Returns a slot to the free list, yielding its value.
    pub(crate) fn release(&mut self, index: u32) -> Option<T> {
        debug_assert_ne!(index, SENTINEL, "sentinel slot cannot be released");
        let node = &mut self.nodes[index as usize];
        let value = node.value.take()?;
        node.generation = node.generation.wrapping_add(1);
        node.escaped = false;
        node.prev = SENTINEL;
        node.next = SENTINEL;
        self.free.push(index);
        self.outstanding -= 1;
        Some(value)
    }

    #[inline]
    pub(crate) fn node(&self, index: u32) -> &Node<T> {
        &self.nodes[index as usize]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, index: u32) -> &mut Node<T> {
        &mut self.nodes[index as usize]
    }

    /// Returns the node at `index` only if it is occupied with `generation`.
    pub(crate) fn live(&self, index: u32, generation: u32) -> Option<&Node<T>> {
        if index == SENTINEL {
            return None;
        }
        self.nodes
            .get(index as usize)
            .filter(|n| n.value.is_some() && n.generation == generation)
    }

    fn grow(&mut self) {
        let start = self.nodes.len();
        self.nodes.reserve(self.batch_size);
        for _ in 0..self.batch_size {
            self.nodes.push(Node::vacant());
        }
        // Lowest index is popped first.
        self.free.extend((start..self.nodes.len()).rev().map(|i| i as u32));
    }

    fn push_vacant(&mut self) -> u32 {
        self.nodes.push(Node::vacant());
        (self.nodes.len() - 1) as u32
    }
}

impl<T> Default for Allocator<T> {
    fn default() -> Self {
        Self::new()
    }
}
