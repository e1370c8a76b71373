//! Tombstone list: a doubly linked list whose removals are deferred.
//!
//! [`List::escape`] only flags an element; the element stays linked (and
//! invisible to traversals) until [`List::gc`] unlinks every flagged element
//! in a single forward sweep. Because nothing is unlinked while a traversal is
//! running, visitors may freely push, insert and escape elements of the list
//! they are walking.
//!
//! Every method takes `&self`: the list is meant to be shared through `Rc`
//! between the code that walks it and the callbacks that mutate it. Values
//! are cloned out before a visitor runs, so no borrow is held across user
//! code. Store cheap-to-clone values (`Rc`, ids).
//!
//! ```
//! use strand_core::list::List;
//!
//! let list = List::new();
//! let a = list.push_back("a");
//! let b = list.push_back("b");
//! list.push_back("c");
//!
//! let mut seen = Vec::new();
//! list.traversal(|id, value| {
//!     if id == a {
//!         list.escape(b);
//!     }
//!     seen.push(value);
//!     true
//! });
//! assert_eq!(seen, ["a", "c"]);
//!
//! list.gc();
//! assert_eq!(list.len(), 2);
//! ```

mod allocator;
mod gc;

pub use allocator::{Allocator, AllocatorStats};
pub use gc::{Gc, GcCollector, GcPending};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use allocator::SENTINEL;

/// Handle to an element of a [`List`].
///
/// Handles are generational: once the element has been collected, the slot
/// may be reused, but the old handle no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId {
    index: u32,
    generation: u32,
}

struct Inner<T> {
    alloc: Allocator<T>,
    len: usize,
    escaped: usize,
}

struct CollectorLink {
    collector: Rc<dyn GcCollector>,
    this: Weak<dyn Gc>,
    registered: bool,
}

/// Doubly linked list with O(1) escape and deferred compaction.
pub struct List<T> {
    inner: RefCell<Inner<T>>,
    traversing: Cell<u32>,
    collector: RefCell<Option<CollectorLink>>,
}

impl<T> List<T> {
    pub fn new() -> Self {
        Self::with_allocator(Allocator::new())
    }

    /// Creates a list drawing its nodes from `alloc`.
    pub fn with_allocator(alloc: Allocator<T>) -> Self {
        Self {
            inner: RefCell::new(Inner {
                alloc,
                len: 0,
                escaped: 0,
            }),
            traversing: Cell::new(0),
            collector: RefCell::new(None),
        }
    }

    /// Number of live (non-escaped) elements.
    pub fn len(&self) -> usize {
        self.inner.borrow().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of escaped elements still linked, waiting for [`gc`](Self::gc).
    pub fn escaped_count(&self) -> usize {
        self.inner.borrow().escaped
    }

    pub fn allocator_stats(&self) -> AllocatorStats {
        self.inner.borrow().alloc.stats()
    }

    /// Returns `true` while a traversal or iterator over this list is alive.
    pub fn is_traversing(&self) -> bool {
        self.traversing.get() > 0
    }

    pub fn push_back(&self, value: T) -> ElementId {
        let mut inner = self.inner.borrow_mut();
        let last = inner.alloc.node(SENTINEL).prev;
        inner.link_after(last, value)
    }

    pub fn push_front(&self, value: T) -> ElementId {
        self.inner.borrow_mut().link_after(SENTINEL, value)
    }

    /// Inserts `value` right before `mark`. Returns `None` if `mark` no
    /// longer belongs to the list. An escaped mark is still a valid position.
    pub fn insert_before(&self, value: T, mark: ElementId) -> Option<ElementId> {
        let mut inner = self.inner.borrow_mut();
        let prev = inner.alloc.live(mark.index, mark.generation)?.prev;
        Some(inner.link_after(prev, value))
    }

    /// Inserts `value` right after `mark`. See [`insert_before`](Self::insert_before).
    pub fn insert_after(&self, value: T, mark: ElementId) -> Option<ElementId> {
        let mut inner = self.inner.borrow_mut();
        inner.alloc.live(mark.index, mark.generation)?;
        Some(inner.link_after(mark.index, value))
    }

    /// Marks the element removed. Returns `false` if it was already escaped
    /// or is not in the list.
    pub fn escape(&self, id: ElementId) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            match inner.alloc.live(id.index, id.generation) {
                Some(node) if !node.escaped => {}
                _ => return false,
            }
            inner.alloc.node_mut(id.index).escaped = true;
            inner.len -= 1;
            inner.escaped += 1;
        }
        self.notify_collector();
        true
    }

    /// Returns `true` if `id` refers to a live, non-escaped element.
    pub fn contains(&self, id: ElementId) -> bool {
        self.inner
            .borrow()
            .alloc
            .live(id.index, id.generation)
            .is_some_and(|n| !n.escaped)
    }

    /// Returns `true` if `id` is still linked but escaped.
    pub fn is_escaped(&self, id: ElementId) -> bool {
        self.inner
            .borrow()
            .alloc
            .live(id.index, id.generation)
            .is_some_and(|n| n.escaped)
    }

    /// Runs `f` against the element's value.
    ///
    /// `f` must not touch this list.
    pub fn with_value<R>(&self, id: ElementId, f: impl FnOnce(&T) -> R) -> Option<R> {
        let inner = self.inner.borrow();
        let node = inner.alloc.live(id.index, id.generation)?;
        if node.escaped {
            return None;
        }
        node.value.as_ref().map(f)
    }

    /// Escapes every live element.
    pub fn clear(&self) {
        let ids: Vec<ElementId> = {
            let inner = self.inner.borrow();
            let mut ids = Vec::with_capacity(inner.len);
            let mut cursor = inner.alloc.node(SENTINEL).next;
            while cursor != SENTINEL {
                let node = inner.alloc.node(cursor);
                if !node.escaped {
                    ids.push(ElementId {
                        index: cursor,
                        generation: node.generation,
                    });
                }
                cursor = node.next;
            }
            ids
        };
        for id in ids {
            self.escape(id);
        }
    }

    /// Unlinks every escaped element and returns its slot to the allocator.
    ///
    /// Deferred while a traversal is active; the list then stays registered
    /// with its collector so the next sweep picks it up.
    pub fn gc(&self) {
        if self.is_traversing() {
            if let Some(link) = self.collector.borrow_mut().as_mut() {
                link.registered = false;
            }
            self.notify_collector();
            return;
        }

        let freed = self.inner.borrow_mut().sweep();
        if let Some(link) = self.collector.borrow_mut().as_mut() {
            link.registered = false;
        }
        // Values are dropped with no borrow held.
        drop(freed);
    }

    fn notify_collector(&self) {
        let pending = {
            let mut link = self.collector.borrow_mut();
            match link.as_mut() {
                Some(link) if !link.registered => {
                    link.registered = true;
                    Some((link.collector.clone(), link.this.clone()))
                }
                _ => None,
            }
        };
        if let Some((collector, this)) = pending {
            collector.collect_gc(this);
        }
    }

    fn iter_from(&self, forward: bool) -> Iter<'_, T> {
        self.traversing.set(self.traversing.get() + 1);
        Iter {
            list: self,
            cursor: SENTINEL,
            forward,
            done: false,
        }
    }
}

impl<T: 'static> List<T> {
    /// Attaches `collector`; from now on the first escape after each sweep
    /// registers this list with it.
    pub fn set_gc_collector(self: &Rc<Self>, collector: Rc<dyn GcCollector>) {
        let this: Weak<dyn Gc> = Rc::downgrade(self) as Weak<dyn Gc>;
        *self.collector.borrow_mut() = Some(CollectorLink {
            collector,
            this,
            registered: false,
        });
        if self.escaped_count() > 0 {
            self.notify_collector();
        }
    }
}

impl<T: Clone> List<T> {
    /// Returns a clone of the element's value if it is live.
    pub fn get(&self, id: ElementId) -> Option<T> {
        self.with_value(id, T::clone)
    }

    pub fn front(&self) -> Option<(ElementId, T)> {
        self.iter().next()
    }

    pub fn back(&self) -> Option<(ElementId, T)> {
        self.iter_rev().next()
    }

    /// Iterates live elements front to back.
    ///
    /// The iterator holds no borrow between steps; the list may be mutated
    /// while it is alive. Collection is deferred until it is dropped.
    pub fn iter(&self) -> Iter<'_, T> {
        self.iter_from(true)
    }

    /// Iterates live elements back to front.
    pub fn iter_rev(&self) -> Iter<'_, T> {
        self.iter_from(false)
    }

    /// Visits live elements front to back until `visitor` returns `false`.
    pub fn traversal(&self, mut visitor: impl FnMut(ElementId, T) -> bool) {
        for (id, value) in self.iter() {
            if !visitor(id, value) {
                break;
            }
        }
    }

    /// Visits live elements back to front until `visitor` returns `false`.
    pub fn reverse_traversal(&self, mut visitor: impl FnMut(ElementId, T) -> bool) {
        for (id, value) in self.iter_rev() {
            if !visitor(id, value) {
                break;
            }
        }
    }

    /// Snapshot of live values, front to back.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().map(|(_, v)| v).collect()
    }
}

impl<T> Inner<T> {
    fn link_after(&mut self, at: u32, value: T) -> ElementId {
        let index = self.alloc.alloc(value);
        let next = self.alloc.node(at).next;
        {
            let node = self.alloc.node_mut(index);
            node.prev = at;
            node.next = next;
        }
        self.alloc.node_mut(at).next = index;
        self.alloc.node_mut(next).prev = index;
        self.len += 1;
        ElementId {
            index,
            generation: self.alloc.node(index).generation,
        }
    }

    fn sweep(&mut self) -> Vec<T> {
        let mut freed = Vec::with_capacity(self.escaped);
        if self.escaped == 0 {
            return freed;
        }
        let mut cursor = self.alloc.node(SENTINEL).next;
        while cursor != SENTINEL {
            let node = self.alloc.node(cursor);
            let next = node.next;
            if node.escaped {
                let prev = node.prev;
                self.alloc.node_mut(prev).next = next;
                self.alloc.node_mut(next).prev = prev;
                if let Some(value) = self.alloc.release(cursor) {
                    freed.push(value);
                }
            }
            cursor = next;
        }
        self.escaped = 0;
        freed
    }
}

impl<T> Gc for List<T> {
    fn gc(&self) {
        List::gc(self);
    }

    fn need_gc(&self) -> bool {
        self.escaped_count() > 0
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("List")
            .field("len", &inner.len)
            .field("escaped", &inner.escaped)
            .field("traversing", &self.traversing.get())
            .finish()
    }
}

/// Iterator over live elements; see [`List::iter`].
pub struct Iter<'a, T> {
    list: &'a List<T>,
    cursor: u32,
    forward: bool,
    done: bool,
}

impl<T: Clone> Iterator for Iter<'_, T> {
    type Item = (ElementId, T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let inner = self.list.inner.borrow();
        loop {
            let node = inner.alloc.node(self.cursor);
            self.cursor = if self.forward { node.next } else { node.prev };
            if self.cursor == SENTINEL {
                self.done = true;
                return None;
            }
            let node = inner.alloc.node(self.cursor);
            if node.escaped {
                continue;
            }
            if let Some(value) = &node.value {
                let id = ElementId {
                    index: self.cursor,
                    generation: node.generation,
                };
                return Some((id, value.clone()));
            }
        }
    }
}

impl<T> Drop for Iter<'_, T> {
    fn drop(&mut self) {
        self.list.traversing.set(self.list.traversing.get() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(list: &List<u32>) -> Vec<u32> {
        list.to_vec()
    }

    // -----------------------------------------------------------------------
    // Basic linking
    // -----------------------------------------------------------------------

    #[test]
    fn push_and_insert_order() {
        let list = List::new();
        let b = list.push_back(2);
        list.push_front(1);
        let d = list.push_back(4);
        list.insert_before(3, d).unwrap();
        list.insert_after(5, d).unwrap();
        list.insert_after(25, b).unwrap();

        assert_eq!(values(&list), [1, 2, 25, 3, 4, 5]);
        assert_eq!(list.len(), 6);
        assert_eq!(list.front().map(|(_, v)| v), Some(1));
        assert_eq!(list.back().map(|(_, v)| v), Some(5));
    }

    #[test]
    fn insert_relative_to_stale_handle_fails() {
        let list = List::new();
        let a = list.push_back(1);
        list.escape(a);
        // Escaped but still linked: a valid position.
        assert!(list.insert_after(2, a).is_some());
        list.gc();
        assert!(list.insert_after(3, a).is_none());
        assert!(list.insert_before(3, a).is_none());
        assert_eq!(values(&list), [2]);
    }

    #[test]
    fn escape_is_idempotent() {
        let list = List::new();
        let a = list.push_back(1);
        assert!(list.escape(a));
        assert!(!list.escape(a));
        assert_eq!(list.len(), 0);
        assert_eq!(list.escaped_count(), 1);
        assert!(list.is_escaped(a));
        assert!(!list.contains(a));
        assert_eq!(list.get(a), None);
    }

    #[test]
    fn reverse_traversal_visits_back_to_front() {
        let list = List::new();
        for i in 0..5 {
            list.push_back(i);
        }
        let mut seen = Vec::new();
        list.reverse_traversal(|_, v| {
            seen.push(v);
            v != 2
        });
        assert_eq!(seen, [4, 3, 2]);
    }

    // -----------------------------------------------------------------------
    // Tombstone safety
    // -----------------------------------------------------------------------

    #[test]
    fn escape_during_traversal_skips_unvisited() {
        let list = List::new();
        let ids: Vec<_> = (0..6).map(|i| list.push_back(i)).collect();

        let mut seen = Vec::new();
        list.traversal(|id, v| {
            seen.push(v);
            if id == ids[1] {
                // current, an already-visited and an unvisited element
                list.escape(ids[1]);
                list.escape(ids[0]);
                list.escape(ids[4]);
            }
            true
        });

        assert_eq!(seen, [0, 1, 2, 3, 5]);
        assert_eq!(values(&list), [2, 3, 5]);
    }

    #[test]
    fn push_during_traversal_is_visited() {
        let list = List::new();
        list.push_back(0);
        let mut seen = Vec::new();
        list.traversal(|_, v| {
            seen.push(v);
            if v < 3 {
                list.push_back(v + 1);
            }
            true
        });
        assert_eq!(seen, [0, 1, 2, 3]);
    }

    #[test]
    fn push_front_during_traversal_is_not_visited() {
        let list = List::new();
        list.push_back(1);
        let mut seen = Vec::new();
        list.traversal(|_, v| {
            seen.push(v);
            list.push_front(0);
            true
        });
        assert_eq!(seen, [1]);
        assert_eq!(values(&list), [0, 1]);
    }

    #[test]
    fn gc_during_traversal_is_deferred() {
        let pending = Rc::new(GcPending::new());
        let list = Rc::new(List::new());
        list.set_gc_collector(pending.clone());
        let ids: Vec<_> = (0..4).map(|i| list.push_back(i)).collect();

        let mut seen = Vec::new();
        list.traversal(|id, v| {
            seen.push(v);
            if id == ids[0] {
                list.escape(ids[1]);
                list.gc();
                assert_eq!(list.escaped_count(), 1);
            }
            true
        });
        assert_eq!(seen, [0, 2, 3]);
        // The deferred sweep re-registers; the duplicate entry is a no-op.
        assert_eq!(pending.len(), 2);

        assert_eq!(pending.run(), 1);
        assert_eq!(list.escaped_count(), 0);
        assert_eq!(list.allocator_stats().outstanding, 3);
    }

    #[test]
    fn gc_len_matches_never_escaped_count() {
        let list = List::with_allocator(Allocator::with_batch_size(4));
        let mut kept = Vec::new();
        let mut ids = Vec::new();
        for i in 0..40u32 {
            ids.push(list.push_back(i));
            if i % 3 == 0 {
                list.escape(ids[(i / 2) as usize]);
            }
        }
        for (i, id) in ids.iter().enumerate() {
            if list.contains(*id) {
                kept.push(i as u32);
            }
        }

        list.traversal(|_, _| true);
        list.gc();

        assert_eq!(list.len(), kept.len());
        assert_eq!(values(&list), kept);
        assert_eq!(list.allocator_stats().outstanding, kept.len());
        assert_eq!(list.escaped_count(), 0);
    }

    #[test]
    fn slots_are_reused_after_gc() {
        let list = List::with_allocator(Allocator::with_batch_size(8));
        let ids: Vec<_> = (0..8).map(|i| list.push_back(i)).collect();
        for id in &ids {
            list.escape(*id);
        }
        list.gc();
        for i in 0..8 {
            list.push_back(i);
        }
        assert_eq!(list.allocator_stats().capacity, 8);
        assert!(ids.iter().all(|id| !list.contains(*id)));
    }

    // -----------------------------------------------------------------------
    // Collector
    // -----------------------------------------------------------------------

    #[test]
    fn collector_registration_happens_once_per_sweep() {
        let pending = Rc::new(GcPending::new());
        let list = Rc::new(List::new());
        list.set_gc_collector(pending.clone());

        let a = list.push_back(1);
        let b = list.push_back(2);
        list.escape(a);
        list.escape(b);
        assert_eq!(pending.len(), 1);

        pending.run();
        assert!(pending.is_empty());

        let c = list.push_back(3);
        list.escape(c);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn dropped_list_is_skipped_by_collector() {
        let pending = Rc::new(GcPending::new());
        {
            let list = Rc::new(List::new());
            list.set_gc_collector(pending.clone());
            let a = list.push_back(1);
            list.escape(a);
        }
        assert_eq!(pending.run(), 0);
    }

    #[test]
    fn clear_escapes_everything() {
        let list = List::new();
        for i in 0..3 {
            list.push_back(i);
        }
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.escaped_count(), 3);
        list.gc();
        assert_eq!(list.allocator_stats().outstanding, 0);
    }
}
