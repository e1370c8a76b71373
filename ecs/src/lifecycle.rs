//! Lifecycle states and hook capability flags.
//!
//! States only move forward: [`StateCell::advance`] ignores any value that is
//! not strictly greater than the current one.

use std::cell::Cell;

use bitflags::bitflags;

/// Lifecycle of an [`Entity`](crate::Entity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityState {
    /// Created, not yet registered with a context.
    Birth,
    /// Registered with a context's entity manager.
    Enter,
    /// `awake` hooks running.
    Awake,
    /// `start` hooks running.
    Start,
    /// Fully initialized; receives updates.
    Alive,
    /// Removal in progress.
    Leave,
    /// `shut` hooks running.
    Shut,
    /// Torn down.
    Death,
}

/// Lifecycle of a [`Component`](crate::Component).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentState {
    Birth,
    /// Added to an entity.
    Attach,
    Awake,
    Start,
    Alive,
    /// Removed from its entity.
    Detach,
    Shut,
    Death,
}

bitflags! {
    /// Lifecycle hooks an entity behavior or component actually implements.
    ///
    /// Read once when the object is bound to a runtime; only the hooks named
    /// here are ever invoked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Lifecycle: u16 {
        const AWAKE = 1 << 0;
        const START = 1 << 1;
        const UPDATE = 1 << 2;
        const LATE_UPDATE = 1 << 3;
        const SHUT = 1 << 4;
        const DISPOSE = 1 << 5;
        /// Entity only: after every component has started.
        const INIT_FIN = 1 << 6;
        /// Entity only: after every component has shut.
        const SHUT_FIN = 1 << 7;
    }
}

/// A monotonic state holder.
#[derive(Debug)]
pub(crate) struct StateCell<S: Copy + Ord>(Cell<S>);

impl<S: Copy + Ord> StateCell<S> {
    pub(crate) fn new(initial: S) -> Self {
        Self(Cell::new(initial))
    }

    #[inline]
    pub(crate) fn get(&self) -> S {
        self.0.get()
    }

    /// Moves to `next` if it is later than the current state.
    pub(crate) fn advance(&self, next: S) -> bool {
        if next <= self.0.get() {
            return false;
        }
        self.0.set(next);
        true
    }
}
