//! Local (single-thread) events.
//!
//! An [`Event<S>`] keeps its subscribers, `Rc<S>` values for some subscriber
//! trait `S`, in a tombstone [`List`], so that subscribers may bind and
//! unbind (themselves or others) while the event is being emitted.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use strand_ecs::event::{Event, bind};
//!
//! trait OnDamage {
//!     fn on_damage(&self, amount: u32);
//! }
//!
//! struct Health(Cell<u32>);
//! impl OnDamage for Health {
//!     fn on_damage(&self, amount: u32) {
//!         self.0.set(self.0.get().saturating_sub(amount));
//!     }
//! }
//!
//! let event: Event<dyn OnDamage> = Event::new();
//! let health = Rc::new(Health(Cell::new(10)));
//! let mut hook = bind(&event, health.clone() as Rc<dyn OnDamage>, 0);
//!
//! event.emit(|s| {
//!     s.on_damage(3);
//!     true
//! });
//! assert_eq!(health.0.get(), 7);
//!
//! hook.unbind();
//! event.emit(|s| {
//!     s.on_damage(3);
//!     true
//! });
//! assert_eq!(health.0.get(), 7);
//! ```

mod hook;
mod recursion;

pub use hook::{Hook, bind};
pub use recursion::EventRecursion;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crossbeam_channel::Sender;
use strand_core::list::{ElementId, GcCollector, List};

use crate::error::{RuntimeError, report_error};
use hook::HookSource;

/// Upper bound on nested emits of a single event.
pub const MAX_EMIT_DEPTH: u32 = 128;

/// Construction options for [`Event`].
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    pub recursion: EventRecursion,
    /// Catch subscriber panics instead of unwinding into the emitter.
    pub auto_recover: bool,
    /// Receives recovered panics when `auto_recover` is set.
    pub report_error: Option<Sender<RuntimeError>>,
}

impl EventOptions {
    pub fn recursion(mut self, recursion: EventRecursion) -> Self {
        self.recursion = recursion;
        self
    }

    pub fn auto_recover(mut self, auto_recover: bool) -> Self {
        self.auto_recover = auto_recover;
        self
    }

    pub fn report_error(mut self, channel: Sender<RuntimeError>) -> Self {
        self.report_error = Some(channel);
        self
    }
}

struct HookRecord<S: ?Sized> {
    subscriber: Rc<S>,
    priority: i32,
    /// Nesting depth of this subscriber in the running emits.
    received: Cell<u32>,
}

struct EventInner<S: ?Sized + 'static> {
    subscribers: Rc<List<Rc<HookRecord<S>>>>,
    recursion: Cell<EventRecursion>,
    opened: Cell<bool>,
    emitted: Cell<u32>,
    depth: Cell<u32>,
    auto_recover: Cell<bool>,
    report_error: RefCell<Option<Sender<RuntimeError>>>,
    managed: Cell<bool>,
}

/// A prioritized list of subscribers of type `Rc<S>`.
pub struct Event<S: ?Sized + 'static> {
    inner: Rc<EventInner<S>>,
}

/// Increments a counter for the lifetime of the guard, unwinding included.
struct Nesting<'a>(&'a Cell<u32>);

impl<'a> Nesting<'a> {
    fn enter(counter: &'a Cell<u32>) -> Self {
        counter.set(counter.get() + 1);
        Nesting(counter)
    }
}

impl Drop for Nesting<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl<S: ?Sized + 'static> Event<S> {
    /// Creates an open event with default options.
    pub fn new() -> Self {
        Self::with_options(EventOptions::default())
    }

    pub fn with_options(options: EventOptions) -> Self {
        Self {
            inner: Rc::new(EventInner {
                subscribers: Rc::new(List::new()),
                recursion: Cell::new(options.recursion),
                opened: Cell::new(true),
                emitted: Cell::new(0),
                depth: Cell::new(0),
                auto_recover: Cell::new(options.auto_recover),
                report_error: RefCell::new(options.report_error),
                managed: Cell::new(false),
            }),
        }
    }

    /// Replaces the panic-recovery settings.
    pub fn configure(&self, auto_recover: bool, report_error: Option<Sender<RuntimeError>>) {
        self.inner.auto_recover.set(auto_recover);
        *self.inner.report_error.borrow_mut() = report_error;
    }

    pub fn recursion(&self) -> EventRecursion {
        self.inner.recursion.get()
    }

    pub fn set_recursion(&self, recursion: EventRecursion) {
        self.inner.recursion.set(recursion);
    }

    /// Hands garbage collection of the subscriber list to `collector`.
    ///
    /// Without a collector the list is compacted at the end of each
    /// outermost emit and on unbind outside an emit.
    pub fn set_gc_collector(&self, collector: Rc<dyn GcCollector>) {
        self.inner.subscribers.set_gc_collector(collector);
        self.inner.managed.set(true);
    }

    pub fn open(&self) {
        self.inner.opened.set(true);
    }

    /// Stops emission (including a running one) and unbinds every subscriber.
    pub fn close(&self) {
        self.inner.opened.set(false);
        self.clean();
    }

    /// Unbinds every subscriber; the event stays open.
    pub fn clean(&self) {
        self.inner.subscribers.clear();
        self.inner.sweep_if_idle();
    }

    pub fn is_opened(&self) -> bool {
        self.inner.opened.get()
    }

    /// Returns `true` while an emit of this event is running.
    pub fn is_emitting(&self) -> bool {
        self.inner.emitted.get() > 0
    }

    /// Number of bound subscribers.
    pub fn len(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `visit` for each subscriber in priority order until it returns
    /// `false`.
    ///
    /// A no-op on a closed event. Nested emits follow the configured
    /// [`EventRecursion`].
    ///
    /// # Panics
    ///
    /// Panics when nesting exceeds [`MAX_EMIT_DEPTH`], and under
    /// [`EventRecursion::Disallow`] when a running subscriber is reached
    /// again. Subscriber panics propagate unless `auto_recover` is set.
    pub fn emit(&self, mut visit: impl FnMut(&S) -> bool) {
        let inner = &*self.inner;
        if !inner.opened.get() {
            return;
        }

        let recursion = inner.recursion.get();
        let emitted = inner.emitted.get();
        if emitted > 0 && recursion == EventRecursion::NotEmit {
            return;
        }
        if emitted >= MAX_EMIT_DEPTH {
            panic!("event recursion exceeded {} nested emits", MAX_EMIT_DEPTH);
        }

        let level = emitted + 1;
        let emitting = Nesting::enter(&inner.emitted);
        inner.depth.set(level);

        for (_, hook) in inner.subscribers.iter() {
            if !inner.opened.get() {
                break;
            }
            if hook.received.get() > 0 {
                match recursion {
                    EventRecursion::Allow | EventRecursion::NotEmit => {}
                    EventRecursion::Disallow => panic!("recursive event calls are not allowed"),
                    EventRecursion::Discard | EventRecursion::Deepest => continue,
                    EventRecursion::Truncate => break,
                }
            }

            let proceed = {
                let _received = Nesting::enter(&hook.received);
                self.invoke(&hook.subscriber, &mut visit)
            };

            // A deeper emit ran inside this subscriber.
            if recursion == EventRecursion::Deepest && inner.depth.get() != level {
                break;
            }
            if !proceed {
                break;
            }
        }

        drop(emitting);
        inner.sweep_if_idle();
    }

    fn invoke(&self, subscriber: &S, visit: &mut impl FnMut(&S) -> bool) -> bool {
        if !self.inner.auto_recover.get() {
            return visit(subscriber);
        }
        match panic::catch_unwind(AssertUnwindSafe(|| visit(subscriber))) {
            Ok(proceed) => proceed,
            Err(payload) => {
                let err = RuntimeError::from_panic(payload.as_ref(), true);
                log::error!("event subscriber panicked: {}", err);
                report_error(self.inner.report_error.borrow().as_ref(), err);
                true
            }
        }
    }

    fn insert_hook(&self, subscriber: Rc<S>, priority: i32) -> ElementId {
        assert!(self.inner.opened.get(), "cannot bind to a closed event");
        let subscribers = &self.inner.subscribers;
        let record = Rc::new(HookRecord {
            subscriber,
            priority,
            received: Cell::new(0),
        });
        let mark = subscribers
            .iter_rev()
            .find(|(_, hook)| hook.priority <= priority)
            .map(|(id, _)| id);
        match mark.and_then(|mark| subscribers.insert_after(record.clone(), mark)) {
            Some(id) => id,
            None => subscribers.push_front(record),
        }
    }

    fn downgrade_source(&self) -> Weak<dyn HookSource> {
        Rc::downgrade(&self.inner) as Weak<dyn HookSource>
    }
}

impl<S: ?Sized + 'static> EventInner<S> {
    fn sweep_if_idle(&self) {
        if !self.managed.get() && self.emitted.get() == 0 && self.subscribers.escaped_count() > 0 {
            self.subscribers.gc();
        }
    }
}

impl<S: ?Sized + 'static> HookSource for EventInner<S> {
    fn unbind_element(&self, element: ElementId) {
        if self.subscribers.escape(element) {
            self.sweep_if_idle();
        }
    }

    fn is_element_bound(&self, element: ElementId) -> bool {
        self.subscribers.contains(element)
    }
}

impl<S: ?Sized + 'static> Default for Event<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized + 'static> fmt::Debug for Event<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.len())
            .field("recursion", &self.recursion())
            .field("opened", &self.is_opened())
            .field("emitting", &self.is_emitting())
            .finish()
    }
}
