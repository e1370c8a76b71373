//! Components: user state attached to an [`Entity`].
//!
//! A component type embeds a [`ComponentCore`] and implements [`Component`],
//! overriding only the lifecycle hooks it needs and announcing them through
//! [`Component::lifecycle`]. The runtime reads those flags once when the
//! component is bound and never calls an undeclared hook.
//!
//! ```
//! use std::cell::Cell;
//! use strand_ecs::{Component, ComponentCore, Lifecycle};
//!
//! #[derive(Default)]
//! struct Ticker {
//!     core: ComponentCore,
//!     ticks: Cell<u32>,
//! }
//!
//! impl Component for Ticker {
//!     fn core(&self) -> &ComponentCore {
//!         &self.core
//!     }
//!
//!     fn lifecycle(&self) -> Lifecycle {
//!         Lifecycle::UPDATE
//!     }
//!
//!     fn update(&self) {
//!         self.ticks.set(self.ticks.get() + 1);
//!     }
//! }
//! ```
//!
//! The same impl can be generated with `#[derive(Component)]`, see
//! [`strand_macro`](crate::Component).

use std::any::Any;
use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::context::RuntimeContext;
use crate::entity::Entity;
use crate::event::Event;
use crate::id::Id;
use crate::lifecycle::{ComponentState, Lifecycle, StateCell};

/// Object-safe access to `Any`, implemented for every `'static` type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// A component attached to an [`Entity`].
pub trait Component: AsAny {
    /// The embedded bookkeeping shared by every component.
    fn core(&self) -> &ComponentCore;

    /// Hooks this component implements.
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::empty()
    }

    fn awake(&self) {}

    fn start(&self) {}

    fn update(&self) {}

    fn late_update(&self) {}

    fn shut(&self) {}

    fn dispose(&self) {}
}

/// Subscriber of [`ComponentCore::event_destroy_self`].
pub trait EventComponentDestroySelf {
    fn on_component_destroy_self(&self, component: &Rc<dyn Component>);
}

impl<F: Fn(&Rc<dyn Component>)> EventComponentDestroySelf for F {
    fn on_component_destroy_self(&self, component: &Rc<dyn Component>) {
        self(component)
    }
}

/// State every component carries: identity, lifecycle and owner link.
pub struct ComponentCore {
    id: Id,
    name: OnceCell<String>,
    entity: RefCell<Weak<Entity>>,
    this: RefCell<Option<Weak<dyn Component>>>,
    state: StateCell<ComponentState>,
    fixed: Cell<bool>,
    destroying: Cell<bool>,
    event_destroy_self: Event<dyn EventComponentDestroySelf>,
}

impl ComponentCore {
    pub fn new() -> Self {
        Self {
            id: Id::new(),
            name: OnceCell::new(),
            entity: RefCell::new(Weak::new()),
            this: RefCell::new(None),
            state: StateCell::new(ComponentState::Birth),
            fixed: Cell::new(false),
            destroying: Cell::new(false),
            event_destroy_self: Event::new(),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    /// Name the component was attached under; empty before attachment.
    pub fn name(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or("")
    }

    pub fn state(&self) -> ComponentState {
        self.state.get()
    }

    /// Fixed components were attached from a prototype and cannot be removed.
    pub fn is_fixed(&self) -> bool {
        self.fixed.get()
    }

    /// Owning entity, until the component is destroyed.
    pub fn entity(&self) -> Option<Rc<Entity>> {
        self.entity.borrow().upgrade()
    }

    /// Runtime context of the owning entity.
    pub fn context(&self) -> Option<RuntimeContext> {
        self.entity()?.context()
    }

    /// The component this core belongs to, once attached.
    pub fn this(&self) -> Option<Rc<dyn Component>> {
        self.this.borrow().as_ref()?.upgrade()
    }

    pub fn event_destroy_self(&self) -> &Event<dyn EventComponentDestroySelf> {
        &self.event_destroy_self
    }

    /// Asks the runtime to remove this component.
    ///
    /// Only an alive component can request its own destruction, and only
    /// once; the request is ignored in every other state.
    pub fn destroy_self(&self) {
        if self.state() != ComponentState::Alive || self.destroying.replace(true) {
            return;
        }
        let Some(this) = self.this() else {
            return;
        };
        self.event_destroy_self.emit(|s| {
            s.on_component_destroy_self(&this);
            true
        });
    }

    pub(crate) fn set_state(&self, state: ComponentState) -> bool {
        self.state.advance(state)
    }

    /// Links the core to its component and entity. Called once, on attach.
    pub(crate) fn attach(
        &self,
        name: &str,
        this: &Rc<dyn Component>,
        entity: Weak<Entity>,
        fixed: bool,
    ) {
        let _ = self.name.set(name.to_string());
        *self.this.borrow_mut() = Some(Rc::downgrade(this));
        *self.entity.borrow_mut() = entity;
        self.fixed.set(fixed);
        self.state.advance(ComponentState::Attach);
    }

    /// Final bookkeeping once the component is dead.
    pub(crate) fn release(&self) {
        self.state.advance(ComponentState::Death);
        self.event_destroy_self.close();
        *self.entity.borrow_mut() = Weak::new();
    }
}

impl Default for ComponentCore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComponentCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentCore")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .field("fixed", &self.is_fixed())
            .finish()
    }
}

/// Downcasts a shared component to its concrete type.
pub fn downcast_component<T: Component>(component: &Rc<dyn Component>) -> Option<Rc<T>> {
    Rc::clone(component).into_any().downcast::<T>().ok()
}

/// Borrows a component as its concrete type.
pub fn component_ref<T: Component>(component: &dyn Component) -> Option<&T> {
    component.as_any().downcast_ref::<T>()
}
