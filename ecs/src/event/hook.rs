use std::any::Any;
use std::fmt;
use std::rc::{Rc, Weak};

use strand_core::list::ElementId;

use super::Event;

/// Type-erased access from a [`Hook`] back to the event it is bound to.
pub(super) trait HookSource {
    fn unbind_element(&self, element: ElementId);
    fn is_element_bound(&self, element: ElementId) -> bool;
}

struct Binding {
    source: Weak<dyn HookSource>,
    element: ElementId,
}

/// A subscriber's binding to one [`Event`].
///
/// Dropping a hook does not unbind it; call [`unbind`](Hook::unbind). A hook
/// whose event has been closed or dropped reports itself unbound.
#[derive(Default)]
pub struct Hook {
    binding: Option<Binding>,
    subscriber: Option<Rc<dyn Any>>,
    priority: i32,
}

/// Binds `subscriber` to `event`.
///
/// Subscribers run in ascending `priority`; equal priorities run in binding
/// order. Binding from inside an emit of the same event is allowed: the new
/// subscriber is visited by that emit only if it lands after the cursor.
///
/// # Panics
///
/// Panics if the event is closed.
pub fn bind<S: ?Sized + 'static>(event: &Event<S>, subscriber: Rc<S>, priority: i32) -> Hook {
    let element = event.insert_hook(subscriber.clone(), priority);
    let source: Weak<dyn HookSource> = event.downgrade_source();
    Hook {
        binding: Some(Binding { source, element }),
        subscriber: Some(Rc::new(subscriber) as Rc<dyn Any>),
        priority,
    }
}

impl Hook {
    /// Returns `true` while the subscriber is still registered with its event.
    pub fn is_bound(&self) -> bool {
        self.binding.as_ref().is_some_and(|b| {
            b.source
                .upgrade()
                .is_some_and(|source| source.is_element_bound(b.element))
        })
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Removes the subscriber from its event. Safe to call from inside an
    /// emit of that event, and more than once.
    pub fn unbind(&mut self) {
        if let Some(binding) = self.binding.take()
            && let Some(source) = binding.source.upgrade()
        {
            source.unbind_element(binding.element);
        }
    }

    /// Moves the subscriber to `event`, keeping its priority.
    ///
    /// Returns `false` (and leaves the hook untouched) if the hook never had
    /// a subscriber or `event` expects a different subscriber type.
    pub fn rebind<S: ?Sized + 'static>(&mut self, event: &Event<S>) -> bool {
        let Some(subscriber) = self
            .subscriber
            .as_ref()
            .and_then(|s| s.downcast_ref::<Rc<S>>())
            .cloned()
        else {
            return false;
        };
        self.unbind();
        *self = bind(event, subscriber, self.priority);
        true
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("bound", &self.is_bound())
            .field("priority", &self.priority)
            .finish()
    }
}
