//! Entities and their component managers.
//!
//! An [`Entity`] owns an ordered list of components, indexed by the name each
//! was attached under and by component [`Id`]. Lookups by name return the
//! first match in insertion order.
//!
//! Entities are always handled as `Rc<Entity>`: [`Entity::new`] builds one
//! with a back-reference to itself so that events can hand the entity to
//! subscribers.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use strand_core::list::{ElementId, List};

use crate::component::{AsAny, Component};
use crate::context::{ContextInner, RuntimeContext};
use crate::error::EcError;
use crate::event::Event;
use crate::id::Id;
use crate::lifecycle::{ComponentState, EntityState, Lifecycle, StateCell};

/// Entity-level lifecycle hooks.
///
/// Every hook receives the entity it is attached to. `init_fin` runs once
/// all components have started and `shut_fin` once they have all shut.
pub trait EntityBehavior: AsAny {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::empty()
    }

    fn awake(&self, _entity: &Rc<Entity>) {}

    fn start(&self, _entity: &Rc<Entity>) {}

    fn update(&self, _entity: &Rc<Entity>) {}

    fn late_update(&self, _entity: &Rc<Entity>) {}

    fn shut(&self, _entity: &Rc<Entity>) {}

    fn dispose(&self, _entity: &Rc<Entity>) {}

    fn init_fin(&self, _entity: &Rc<Entity>) {}

    fn shut_fin(&self, _entity: &Rc<Entity>) {}
}

pub trait EventEntityDestroySelf {
    fn on_entity_destroy_self(&self, entity: &Rc<Entity>);
}

impl<F: Fn(&Rc<Entity>)> EventEntityDestroySelf for F {
    fn on_entity_destroy_self(&self, entity: &Rc<Entity>) {
        self(entity)
    }
}

/// Fired once per `add_component(s)` call with the whole batch.
pub trait EventCompMgrAddComponents {
    fn on_comp_mgr_add_components(&self, entity: &Rc<Entity>, components: &[Rc<dyn Component>]);
}

impl<F: Fn(&Rc<Entity>, &[Rc<dyn Component>])> EventCompMgrAddComponents for F {
    fn on_comp_mgr_add_components(&self, entity: &Rc<Entity>, components: &[Rc<dyn Component>]) {
        self(entity, components)
    }
}

pub trait EventCompMgrRemoveComponent {
    fn on_comp_mgr_remove_component(&self, entity: &Rc<Entity>, component: &Rc<dyn Component>);
}

impl<F: Fn(&Rc<Entity>, &Rc<dyn Component>)> EventCompMgrRemoveComponent for F {
    fn on_comp_mgr_remove_component(&self, entity: &Rc<Entity>, component: &Rc<dyn Component>) {
        self(entity, component)
    }
}

/// Fired when a lookup finds a component that was never awoken, for
/// entities created with `awake_on_first_access`.
pub trait EventCompMgrFirstAccessComponent {
    fn on_comp_mgr_first_access_component(&self, entity: &Rc<Entity>, component: &Rc<dyn Component>);
}

impl<F: Fn(&Rc<Entity>, &Rc<dyn Component>)> EventCompMgrFirstAccessComponent for F {
    fn on_comp_mgr_first_access_component(&self, entity: &Rc<Entity>, component: &Rc<dyn Component>) {
        self(entity, component)
    }
}

/// Construction options for [`Entity`].
#[derive(Default)]
pub struct EntityOptions {
    /// Explicit id; a fresh one is allocated when `None`.
    pub id: Option<Id>,
    /// Globally unique key, checked by the entity manager.
    pub persist_id: Option<String>,
    /// Prototype the entity was built from.
    pub prototype: Option<String>,
    /// Defer component `awake`/`start` until the first successful lookup.
    pub awake_on_first_access: bool,
    pub behavior: Option<Rc<dyn EntityBehavior>>,
}

impl EntityOptions {
    pub fn id(mut self, id: Id) -> Self {
        self.id = Some(id);
        self
    }

    pub fn persist_id(mut self, persist_id: impl Into<String>) -> Self {
        self.persist_id = Some(persist_id.into());
        self
    }

    pub fn prototype(mut self, prototype: impl Into<String>) -> Self {
        self.prototype = Some(prototype.into());
        self
    }

    pub fn awake_on_first_access(mut self, enabled: bool) -> Self {
        self.awake_on_first_access = enabled;
        self
    }

    pub fn behavior(mut self, behavior: Rc<dyn EntityBehavior>) -> Self {
        self.behavior = Some(behavior);
        self
    }
}

/// Per-entity bookkeeping of the EC tree.
#[derive(Default)]
pub(crate) struct TreeNode {
    pub(crate) parent: RefCell<Weak<Entity>>,
    /// Slot occupied in the parent's children list.
    pub(crate) element: Cell<Option<ElementId>>,
    pub(crate) children: OnceCell<Rc<List<Rc<Entity>>>>,
    pub(crate) removing: Cell<bool>,
}

impl TreeNode {
    pub(crate) fn parent(&self) -> Option<Rc<Entity>> {
        self.parent.borrow().upgrade()
    }
}

/// A component slot queued for attachment.
pub(crate) struct Attachment {
    pub(crate) name: String,
    pub(crate) component: Rc<dyn Component>,
    pub(crate) fixed: bool,
}

/// An entity: identity, lifecycle state and an ordered set of components.
pub struct Entity {
    id: Id,
    persist_id: Option<String>,
    prototype: Option<String>,
    awake_on_first_access: bool,
    behavior: Option<Rc<dyn EntityBehavior>>,
    this: Weak<Entity>,
    context: RefCell<Weak<ContextInner>>,
    state: StateCell<EntityState>,
    destroying: Cell<bool>,
    components: Rc<List<Rc<dyn Component>>>,
    name_index: RefCell<HashMap<String, Vec<ElementId>>>,
    id_index: RefCell<HashMap<Id, ElementId>>,
    tree: TreeNode,
    event_destroy_self: Event<dyn EventEntityDestroySelf>,
    event_add_components: Event<dyn EventCompMgrAddComponents>,
    event_remove_component: Event<dyn EventCompMgrRemoveComponent>,
    event_first_access: Event<dyn EventCompMgrFirstAccessComponent>,
}

impl Entity {
    pub fn new(options: EntityOptions) -> Rc<Self> {
        Rc::new_cyclic(|this| Entity {
            id: options.id.unwrap_or_else(Id::new),
            persist_id: options.persist_id,
            prototype: options.prototype,
            awake_on_first_access: options.awake_on_first_access,
            behavior: options.behavior,
            this: this.clone(),
            context: RefCell::new(Weak::new()),
            state: StateCell::new(EntityState::Birth),
            destroying: Cell::new(false),
            components: Rc::new(List::new()),
            name_index: RefCell::new(HashMap::new()),
            id_index: RefCell::new(HashMap::new()),
            tree: TreeNode::default(),
            event_destroy_self: Event::new(),
            event_add_components: Event::new(),
            event_remove_component: Event::new(),
            event_first_access: Event::new(),
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn persist_id(&self) -> Option<&str> {
        self.persist_id.as_deref()
    }

    pub fn prototype(&self) -> Option<&str> {
        self.prototype.as_deref()
    }

    pub fn state(&self) -> EntityState {
        self.state.get()
    }

    pub fn awake_on_first_access(&self) -> bool {
        self.awake_on_first_access
    }

    pub fn behavior(&self) -> Option<&Rc<dyn EntityBehavior>> {
        self.behavior.as_ref()
    }

    /// Borrows the behavior as its concrete type.
    pub fn behavior_as<T: EntityBehavior>(&self) -> Option<&T> {
        self.behavior.as_deref()?.as_any().downcast_ref::<T>()
    }

    /// The context this entity was added to, while both are alive.
    pub fn context(&self) -> Option<RuntimeContext> {
        RuntimeContext::upgrade(&self.context.borrow())
    }

    /// Returns `true` once [`destroy_self`](Self::destroy_self) has fired.
    pub fn is_destroying(&self) -> bool {
        self.destroying.get()
    }

    pub fn event_destroy_self(&self) -> &Event<dyn EventEntityDestroySelf> {
        &self.event_destroy_self
    }

    pub fn event_add_components(&self) -> &Event<dyn EventCompMgrAddComponents> {
        &self.event_add_components
    }

    pub fn event_remove_component(&self) -> &Event<dyn EventCompMgrRemoveComponent> {
        &self.event_remove_component
    }

    pub fn event_first_access_component(&self) -> &Event<dyn EventCompMgrFirstAccessComponent> {
        &self.event_first_access
    }

    /// Asks the owning runtime to remove this entity.
    ///
    /// Fires [`event_destroy_self`](Self::event_destroy_self) at most once,
    /// and only while the entity is in `Awake`, `Start` or `Alive`.
    pub fn destroy_self(&self) {
        let state = self.state();
        if !(EntityState::Awake..=EntityState::Alive).contains(&state) || self.destroying.get() {
            return;
        }
        self.destroying.set(true);
        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.event_destroy_self.emit(|s| {
            s.on_entity_destroy_self(&this);
            true
        });
    }

    // -----------------------------------------------------------------------
    // Component manager
    // -----------------------------------------------------------------------

    /// Attaches one component under `name`.
    pub fn add_component(&self, name: &str, component: Rc<dyn Component>) -> Result<(), EcError> {
        self.attach(vec![Attachment {
            name: name.to_string(),
            component,
            fixed: false,
        }])
    }

    /// Attaches a batch of components, emitting a single add event.
    ///
    /// The batch is validated as a whole; on error nothing is attached.
    pub fn add_components(&self, components: &[(&str, Rc<dyn Component>)]) -> Result<(), EcError> {
        self.attach(
            components
                .iter()
                .map(|(name, component)| Attachment {
                    name: name.to_string(),
                    component: component.clone(),
                    fixed: false,
                })
                .collect(),
        )
    }

    /// Attaches a component that [`remove_component`](Self::remove_component)
    /// will refuse to detach.
    pub fn add_fixed_component(&self, name: &str, component: Rc<dyn Component>) -> Result<(), EcError> {
        self.attach(vec![Attachment {
            name: name.to_string(),
            component,
            fixed: true,
        }])
    }

    pub(crate) fn attach(&self, batch: Vec<Attachment>) -> Result<(), EcError> {
        if batch.is_empty() {
            return Err(EcError::EmptyComponents);
        }
        let state = self.state();
        if state > EntityState::Alive {
            return Err(EcError::InvalidEntityState {
                id: self.id,
                state,
                expected: "Alive or earlier",
            });
        }
        {
            let id_index = self.id_index.borrow();
            for (i, attachment) in batch.iter().enumerate() {
                let core = attachment.component.core();
                if core.state() != ComponentState::Birth {
                    return Err(EcError::ComponentAttached {
                        id: core.id(),
                        state: core.state(),
                    });
                }
                let repeated = batch[..i]
                    .iter()
                    .any(|other| other.component.core().id() == core.id());
                if repeated || id_index.contains_key(&core.id()) {
                    return Err(EcError::ComponentExists(core.id()));
                }
            }
        }

        let mut added = Vec::with_capacity(batch.len());
        for Attachment { name, component, fixed } in batch {
            let core = component.core();
            core.attach(&name, &component, self.this.clone(), fixed);
            let element = self.components.push_back(component.clone());
            self.name_index.borrow_mut().entry(name).or_default().push(element);
            self.id_index.borrow_mut().insert(core.id(), element);
            added.push(component);
        }

        if let Some(this) = self.this.upgrade() {
            self.event_add_components.emit(|s| {
                s.on_comp_mgr_add_components(&this, &added);
                true
            });
        }
        Ok(())
    }

    /// Detaches the first component named `name`.
    ///
    /// Removing a fixed component is a no-op.
    pub fn remove_component(&self, name: &str) -> Result<(), EcError> {
        let element = self
            .name_index
            .borrow()
            .get(name)
            .and_then(|elements| elements.first().copied())
            .ok_or_else(|| EcError::ComponentNotFound(name.to_string()))?;
        self.detach(element);
        Ok(())
    }

    pub fn remove_component_by_id(&self, id: Id) -> Result<(), EcError> {
        let element = self
            .id_index
            .borrow()
            .get(&id)
            .copied()
            .ok_or(EcError::ComponentIdNotFound(id))?;
        self.detach(element);
        Ok(())
    }

    fn detach(&self, element: ElementId) {
        let Some(component) = self.components.get(element) else {
            return;
        };
        let core = component.core();
        if core.is_fixed() {
            log::debug!("entity {}: component {:?} is fixed, not removed", self.id, core.name());
            return;
        }

        self.components.escape(element);
        self.unindex(core.name(), core.id(), element);
        core.set_state(ComponentState::Detach);

        if let Some(this) = self.this.upgrade() {
            self.event_remove_component.emit(|s| {
                s.on_comp_mgr_remove_component(&this, &component);
                true
            });
        }

        core.set_state(ComponentState::Shut);
        core.release();
    }

    fn unindex(&self, name: &str, id: Id, element: ElementId) {
        let mut name_index = self.name_index.borrow_mut();
        if let Some(elements) = name_index.get_mut(name) {
            elements.retain(|e| *e != element);
            if elements.is_empty() {
                name_index.remove(name);
            }
        }
        self.id_index.borrow_mut().remove(&id);
    }

    /// First component attached under `name`.
    pub fn get_component(&self, name: &str) -> Option<Rc<dyn Component>> {
        let element = self.name_index.borrow().get(name)?.first().copied()?;
        let component = self.components.get(element)?;
        self.touch(&component);
        Some(component)
    }

    /// First component attached under `name`, downcast to `T`.
    pub fn get_component_as<T: Component>(&self, name: &str) -> Option<Rc<T>> {
        crate::component::downcast_component(&self.get_component(name)?)
    }

    /// Every component attached under `name`, in insertion order.
    pub fn get_components(&self, name: &str) -> Vec<Rc<dyn Component>> {
        let elements = self.name_index.borrow().get(name).cloned().unwrap_or_default();
        let found: Vec<_> = elements
            .into_iter()
            .filter_map(|element| self.components.get(element))
            .collect();
        for component in &found {
            self.touch(component);
        }
        found
    }

    pub fn get_component_by_id(&self, id: Id) -> Option<Rc<dyn Component>> {
        let element = self.id_index.borrow().get(&id).copied()?;
        let component = self.components.get(element)?;
        self.touch(&component);
        Some(component)
    }

    fn touch(&self, component: &Rc<dyn Component>) {
        if !self.awake_on_first_access || component.core().state() != ComponentState::Attach {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            self.event_first_access.emit(|s| {
                s.on_comp_mgr_first_access_component(&this, component);
                true
            });
        }
    }

    pub fn contains_component(&self, name: &str) -> bool {
        self.name_index.borrow().contains_key(name)
    }

    pub fn count_components(&self) -> usize {
        self.components.len()
    }

    /// Visits components in insertion order until `visitor` returns `false`.
    ///
    /// Components may be added or removed from inside the visitor.
    pub fn range_components(&self, mut visitor: impl FnMut(&Rc<dyn Component>) -> bool) {
        self.components.traversal(|_, component| visitor(&component));
    }

    pub fn reverse_range_components(&self, mut visitor: impl FnMut(&Rc<dyn Component>) -> bool) {
        self.components.reverse_traversal(|_, component| visitor(&component));
    }

    /// Snapshot of the attached components.
    pub fn components(&self) -> Vec<Rc<dyn Component>> {
        self.components.to_vec()
    }

    // -----------------------------------------------------------------------
    // Crate internals
    // -----------------------------------------------------------------------

    pub(crate) fn set_state(&self, state: EntityState) -> bool {
        self.state.advance(state)
    }

    pub(crate) fn tree(&self) -> &TreeNode {
        &self.tree
    }

    /// Wires the entity into `ctx`: owner link, panic recovery and GC.
    pub(crate) fn bind_context(&self, ctx: &RuntimeContext) {
        *self.context.borrow_mut() = ctx.downgrade();

        let auto_recover = ctx.auto_recover();
        let report = ctx.report_error().cloned();
        let gc = ctx.gc_collector();
        self.components.set_gc_collector(gc.clone());

        self.event_destroy_self.configure(auto_recover, report.clone());
        self.event_destroy_self.set_gc_collector(gc.clone());
        self.event_add_components.configure(auto_recover, report.clone());
        self.event_add_components.set_gc_collector(gc.clone());
        self.event_remove_component.configure(auto_recover, report.clone());
        self.event_remove_component.set_gc_collector(gc.clone());
        self.event_first_access.configure(auto_recover, report);
        self.event_first_access.set_gc_collector(gc);
    }

    /// Final teardown once the entity has left its context.
    pub(crate) fn finalize(&self) {
        self.components.reverse_traversal(|_, component| {
            let core = component.core();
            core.set_state(ComponentState::Shut);
            core.release();
            true
        });
        self.set_state(EntityState::Death);
        self.event_destroy_self.close();
        self.event_add_components.close();
        self.event_remove_component.close();
        self.event_first_access.close();
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("persist_id", &self.persist_id)
            .field("prototype", &self.prototype)
            .field("state", &self.state())
            .field("components", &self.count_components())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentCore;
    use crate::event::bind;

    #[derive(Default)]
    struct Tag {
        core: ComponentCore,
    }

    impl Component for Tag {
        fn core(&self) -> &ComponentCore {
            &self.core
        }
    }

    fn tag() -> Rc<dyn Component> {
        Rc::new(Tag::default())
    }

    // -----------------------------------------------------------------------
    // Add / lookup
    // -----------------------------------------------------------------------

    #[test]
    fn lookup_by_name_returns_first_in_insertion_order() {
        let entity = Entity::new(EntityOptions::default());
        let first = tag();
        let second = tag();
        entity
            .add_components(&[("tag", first.clone()), ("tag", second.clone()), ("other", tag())])
            .unwrap();

        assert_eq!(entity.count_components(), 3);
        let found = entity.get_component("tag").unwrap();
        assert_eq!(found.core().id(), first.core().id());

        let all: Vec<Id> = entity.get_components("tag").iter().map(|c| c.core().id()).collect();
        assert_eq!(all, [first.core().id(), second.core().id()]);

        assert!(entity.get_component_by_id(second.core().id()).is_some());
        assert!(entity.get_component_as::<Tag>("other").is_some());
        assert_eq!(first.core().state(), ComponentState::Attach);
        assert_eq!(first.core().name(), "tag");
        assert_eq!(first.core().entity().map(|e| e.id()), Some(entity.id()));
    }

    #[test]
    fn add_emits_one_event_per_batch() {
        let entity = Entity::new(EntityOptions::default());
        let batches = Rc::new(RefCell::new(Vec::new()));
        let sink = batches.clone();
        let _hook = bind(
            entity.event_add_components(),
            Rc::new(move |_: &Rc<Entity>, comps: &[Rc<dyn Component>]| sink.borrow_mut().push(comps.len()))
                as Rc<dyn EventCompMgrAddComponents>,
            0,
        );

        entity.add_components(&[("a", tag()), ("b", tag())]).unwrap();
        entity.add_component("c", tag()).unwrap();
        assert_eq!(*batches.borrow(), [2, 1]);
    }

    #[test]
    fn invalid_batches_are_rejected_whole() {
        let entity = Entity::new(EntityOptions::default());
        assert_eq!(entity.add_components(&[]), Err(EcError::EmptyComponents));

        let dup = tag();
        let err = entity.add_components(&[("a", dup.clone()), ("b", dup.clone())]).unwrap_err();
        assert_eq!(err, EcError::ComponentExists(dup.core().id()));
        assert_eq!(entity.count_components(), 0);

        entity.add_component("a", dup.clone()).unwrap();
        let other = Entity::new(EntityOptions::default());
        assert!(matches!(
            other.add_component("a", dup),
            Err(EcError::ComponentAttached { .. })
        ));
    }

    #[test]
    fn add_past_alive_is_rejected() {
        let entity = Entity::new(EntityOptions::default());
        entity.set_state(EntityState::Leave);
        assert!(matches!(
            entity.add_component("a", tag()),
            Err(EcError::InvalidEntityState { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    #[test]
    fn remove_walks_component_to_death() {
        let entity = Entity::new(EntityOptions::default());
        let comp = tag();
        entity.add_component("tag", comp.clone()).unwrap();

        let seen = Rc::new(Cell::new(None));
        let sink = seen.clone();
        let _hook = bind(
            entity.event_remove_component(),
            Rc::new(move |_: &Rc<Entity>, c: &Rc<dyn Component>| sink.set(Some(c.core().state())))
                as Rc<dyn EventCompMgrRemoveComponent>,
            0,
        );

        entity.remove_component("tag").unwrap();
        assert_eq!(seen.get(), Some(ComponentState::Detach));
        assert_eq!(comp.core().state(), ComponentState::Death);
        assert!(comp.core().entity().is_none());
        assert!(entity.get_component("tag").is_none());
        assert!(!entity.contains_component("tag"));
        assert_eq!(entity.count_components(), 0);

        assert_eq!(
            entity.remove_component("tag"),
            Err(EcError::ComponentNotFound("tag".into()))
        );
        assert!(entity.remove_component_by_id(comp.core().id()).is_err());
    }

    #[test]
    fn fixed_components_stay() {
        let entity = Entity::new(EntityOptions::default());
        let comp = tag();
        entity.add_fixed_component("core", comp.clone()).unwrap();
        entity.remove_component("core").unwrap();
        assert!(entity.get_component("core").is_some());
        assert_eq!(comp.core().state(), ComponentState::Attach);
    }

    #[test]
    fn remove_from_inside_range() {
        let entity = Entity::new(EntityOptions::default());
        entity.add_components(&[("a", tag()), ("b", tag()), ("c", tag())]).unwrap();

        let mut visited = Vec::new();
        entity.range_components(|c| {
            visited.push(c.core().name().to_string());
            if c.core().name() == "a" {
                entity.remove_component("b").unwrap();
            }
            true
        });
        assert_eq!(visited, ["a", "c"]);
    }

    // -----------------------------------------------------------------------
    // Destroy / first access
    // -----------------------------------------------------------------------

    #[test]
    fn destroy_self_fires_once_in_live_states() {
        let entity = Entity::new(EntityOptions::default());
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        let _hook = bind(
            entity.event_destroy_self(),
            Rc::new(move |_: &Rc<Entity>| counter.set(counter.get() + 1)) as Rc<dyn EventEntityDestroySelf>,
            0,
        );

        entity.destroy_self();
        assert_eq!(fired.get(), 0, "Birth ignores destroy");

        entity.set_state(EntityState::Alive);
        entity.destroy_self();
        entity.destroy_self();
        assert_eq!(fired.get(), 1);
        assert!(entity.is_destroying());
    }

    #[test]
    fn first_access_fires_for_unawoken_components() {
        let entity = Entity::new(EntityOptions::default().awake_on_first_access(true));
        entity.add_component("tag", tag()).unwrap();

        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        let _hook = bind(
            entity.event_first_access_component(),
            Rc::new(move |_: &Rc<Entity>, c: &Rc<dyn Component>| {
                counter.set(counter.get() + 1);
                c.core().set_state(ComponentState::Awake);
            }) as Rc<dyn EventCompMgrFirstAccessComponent>,
            0,
        );

        entity.get_component("tag");
        entity.get_component("tag");
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn finalize_kills_everything() {
        let entity = Entity::new(EntityOptions::default().persist_id("hero"));
        let comp = tag();
        entity.add_component("tag", comp.clone()).unwrap();
        entity.finalize();
        assert_eq!(entity.state(), EntityState::Death);
        assert_eq!(comp.core().state(), ComponentState::Death);
        assert!(!entity.event_destroy_self().is_opened());
        assert_eq!(entity.persist_id(), Some("hero"));
    }
}
