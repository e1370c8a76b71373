//! Deferred garbage collection for tombstone containers.
//!
//! A container that accumulates escaped entries reports itself to a
//! [`GcCollector`] once; the collector batches the actual sweeps and runs them
//! at a convenient point (a GC tick of the owning runtime), so that escaping
//! from inside a traversal never rewrites links.

use std::cell::RefCell;
use std::rc::Weak;

/// A container that can compact itself.
pub trait Gc {
    /// Physically removes escaped entries.
    fn gc(&self);

    /// Returns `true` while escaped entries are waiting for [`gc`](Self::gc).
    fn need_gc(&self) -> bool;
}

/// Receives "I have garbage" notifications from [`Gc`] containers.
pub trait GcCollector {
    /// Registers `target` for the next sweep.
    fn collect_gc(&self, target: Weak<dyn Gc>);
}

/// A [`GcCollector`] that keeps a pending list and sweeps it on demand.
///
/// ```
/// use std::rc::Rc;
/// use strand_core::list::{GcPending, List};
///
/// let pending = Rc::new(GcPending::new());
/// let list = Rc::new(List::new());
/// list.set_gc_collector(pending.clone());
///
/// let id = list.push_back(7);
/// list.escape(id);
/// assert_eq!(pending.len(), 1);
///
/// assert_eq!(pending.run(), 1);
/// assert!(pending.is_empty());
/// ```
#[derive(Default)]
pub struct GcPending {
    pending: RefCell<Vec<Weak<dyn Gc>>>,
}

impl GcPending {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of containers waiting for a sweep.
    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Sweeps every registered container that is still alive and clears the
    /// pending list. Returns how many containers were swept.
    ///
    /// Containers registered while the sweep runs are kept for the next call.
    pub fn run(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.borrow_mut());
        let mut swept = 0;
        for target in batch {
            if let Some(target) = target.upgrade()
                && target.need_gc()
            {
                target.gc();
                swept += 1;
            }
        }
        if swept > 0 {
            log::debug!("GC swept {} containers", swept);
        }
        swept
    }
}

impl GcCollector for GcPending {
    fn collect_gc(&self, target: Weak<dyn Gc>) {
        self.pending.borrow_mut().push(target);
    }
}
