//! Binds entity and component lifecycle hooks to a context.
//!
//! The driver listens to the entity manager: a newly added entity is walked
//! through `Awake`, `Start` and `Alive` before `add_entity` returns, and a
//! removed one through `Shut` and its dispose hooks. Components follow their
//! entity; those added later catch up with it. The hooks an object declares
//! in its [`Lifecycle`] flags are read once, at binding time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::component::{Component, EventComponentDestroySelf};
use crate::context::{ContextInner, RuntimeContext};
use crate::entity::{
    Entity, EventCompMgrAddComponents, EventCompMgrFirstAccessComponent, EventCompMgrRemoveComponent,
    EventEntityDestroySelf,
};
use crate::entity_mgr::{EventEntityMgrAddEntity, EventEntityMgrRemoveEntity};
use crate::event::{Event, Hook, bind};
use crate::id::Id;
use crate::lifecycle::{ComponentState, EntityState, Lifecycle};

pub trait EventUpdate {
    fn on_update(&self);
}

impl<F: Fn()> EventUpdate for F {
    fn on_update(&self) {
        self()
    }
}

pub trait EventLateUpdate {
    fn on_late_update(&self);
}

impl<F: Fn()> EventLateUpdate for F {
    fn on_late_update(&self) {
        self()
    }
}

struct EntityHooks {
    lifecycle: Lifecycle,
    destroy_self: Hook,
    update: Hook,
    late_update: Hook,
    comp_mgr: [Hook; 3],
}

struct ComponentHooks {
    lifecycle: Lifecycle,
    destroy_self: Hook,
    update: Hook,
    late_update: Hook,
    awoken: bool,
}

impl ComponentHooks {
    fn unbind(&mut self) {
        self.destroy_self.unbind();
        self.update.unbind();
        self.late_update.unbind();
    }
}

pub(crate) struct Driver {
    ctx: Weak<ContextInner>,
    event_update: Event<dyn EventUpdate>,
    event_late_update: Event<dyn EventLateUpdate>,
    entities: RefCell<HashMap<Id, EntityHooks>>,
    components: RefCell<HashMap<Id, ComponentHooks>>,
    mgr_hooks: RefCell<Vec<Hook>>,
}

fn on_entity_destroy_self(entity: &Rc<Entity>) {
    let Some(ctx) = entity.context() else {
        return;
    };
    if let Err(err) = ctx.entity_mgr().remove_entity(entity.id()) {
        log::warn!("[{}] destroy of entity {} failed: {}", ctx.name(), entity.id(), err);
    }
}

fn on_component_destroy_self(component: &Rc<dyn Component>) {
    let core = component.core();
    let Some(entity) = core.entity() else {
        return;
    };
    if let Err(err) = entity.remove_component_by_id(core.id()) {
        log::warn!("destroy of component {} failed: {}", core.id(), err);
    }
}

fn on_add_components(entity: &Rc<Entity>, components: &[Rc<dyn Component>]) {
    if let Some(ctx) = entity.context() {
        ctx.driver().catch_up(&ctx, entity, components);
    }
}

fn on_remove_component(entity: &Rc<Entity>, component: &Rc<dyn Component>) {
    if let Some(ctx) = entity.context() {
        ctx.driver().shut_component(&ctx, component);
    }
}

fn on_first_access(entity: &Rc<Entity>, component: &Rc<dyn Component>) {
    if let Some(ctx) = entity.context() {
        ctx.driver().catch_up(&ctx, entity, std::slice::from_ref(component));
    }
}

impl Driver {
    pub(crate) fn new(ctx: Weak<ContextInner>) -> Self {
        Self {
            ctx,
            event_update: Event::new(),
            event_late_update: Event::new(),
            entities: RefCell::new(HashMap::new()),
            components: RefCell::new(HashMap::new()),
            mgr_hooks: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn install(&self, ctx: &RuntimeContext) {
        let report = ctx.report_error().cloned();
        self.event_update.configure(ctx.auto_recover(), report.clone());
        self.event_update.set_gc_collector(ctx.gc_collector());
        self.event_late_update.configure(ctx.auto_recover(), report);
        self.event_late_update.set_gc_collector(ctx.gc_collector());

        let weak = self.ctx.clone();
        let add: Rc<dyn EventEntityMgrAddEntity> = Rc::new(move |entity: &Rc<Entity>| {
            if let Some(ctx) = RuntimeContext::upgrade(&weak) {
                ctx.driver().init_entity(&ctx, entity);
            }
        });
        let weak = self.ctx.clone();
        let remove: Rc<dyn EventEntityMgrRemoveEntity> = Rc::new(move |entity: &Rc<Entity>| {
            if let Some(ctx) = RuntimeContext::upgrade(&weak) {
                ctx.driver().shut_entity(&ctx, entity);
            }
        });

        let mgr = ctx.entity_mgr();
        // Initialize before user subscribers run, tear down after them.
        self.mgr_hooks.borrow_mut().extend([
            bind(mgr.event_add_entity(), add, i32::MIN),
            bind(mgr.event_remove_entity(), remove, i32::MAX),
        ]);
    }

    pub(crate) fn event_update(&self) -> &Event<dyn EventUpdate> {
        &self.event_update
    }

    pub(crate) fn event_late_update(&self) -> &Event<dyn EventLateUpdate> {
        &self.event_late_update
    }

    pub(crate) fn emit_update(&self) {
        self.event_update.emit(|s| {
            s.on_update();
            true
        });
    }

    pub(crate) fn emit_late_update(&self) {
        self.event_late_update.emit(|s| {
            s.on_late_update();
            true
        });
    }

    #[cfg(test)]
    pub(crate) fn bound_counts(&self) -> (usize, usize) {
        (self.entities.borrow().len(), self.components.borrow().len())
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    fn init_entity(&self, ctx: &RuntimeContext, entity: &Rc<Entity>) {
        let lifecycle = entity.behavior().map_or(Lifecycle::empty(), |b| b.lifecycle());
        let comp_mgr = [
            bind(
                entity.event_add_components(),
                Rc::new(on_add_components) as Rc<dyn EventCompMgrAddComponents>,
                0,
            ),
            bind(
                entity.event_remove_component(),
                Rc::new(on_remove_component) as Rc<dyn EventCompMgrRemoveComponent>,
                i32::MAX,
            ),
            bind(
                entity.event_first_access_component(),
                Rc::new(on_first_access) as Rc<dyn EventCompMgrFirstAccessComponent>,
                i32::MIN,
            ),
        ];
        let destroy_self = bind(
            entity.event_destroy_self(),
            Rc::new(on_entity_destroy_self) as Rc<dyn EventEntityDestroySelf>,
            0,
        );
        self.entities.borrow_mut().insert(
            entity.id(),
            EntityHooks {
                lifecycle,
                destroy_self,
                update: Hook::default(),
                late_update: Hook::default(),
                comp_mgr,
            },
        );
        if let Some(directory) = ctx.directory() {
            directory.insert(entity.id(), ctx.name());
        }

        let lazy = entity.awake_on_first_access();
        let phases = [
            (EntityState::Awake, ComponentState::Awake, Lifecycle::AWAKE),
            (EntityState::Start, ComponentState::Start, Lifecycle::START),
        ];
        for (entity_state, component_state, hook) in phases {
            entity.set_state(entity_state);
            if lifecycle.contains(hook)
                && let Some(behavior) = entity.behavior()
            {
                ctx.recover("entity hook", || match entity_state {
                    EntityState::Awake => behavior.awake(entity),
                    _ => behavior.start(entity),
                });
            }
            if !lazy {
                entity.range_components(|component| {
                    self.advance_component(ctx, component, component_state);
                    entity.state() < EntityState::Leave
                });
            }
            if entity.state() >= EntityState::Leave {
                return;
            }
        }

        entity.set_state(EntityState::Alive);
        if !lazy {
            entity.range_components(|component| {
                self.advance_component(ctx, component, ComponentState::Alive);
                entity.state() < EntityState::Leave
            });
        }
        if entity.state() >= EntityState::Leave {
            return;
        }
        self.bind_entity_updates(entity, lifecycle);
        if lifecycle.contains(Lifecycle::INIT_FIN)
            && let Some(behavior) = entity.behavior()
        {
            ctx.recover("entity init_fin", || behavior.init_fin(entity));
        }
    }

    fn bind_entity_updates(&self, entity: &Rc<Entity>, lifecycle: Lifecycle) {
        let mut entities = self.entities.borrow_mut();
        let Some(hooks) = entities.get_mut(&entity.id()) else {
            return;
        };
        if lifecycle.contains(Lifecycle::UPDATE) {
            let weak = Rc::downgrade(entity);
            let update: Rc<dyn EventUpdate> = Rc::new(move || {
                if let Some(entity) = weak.upgrade()
                    && let Some(behavior) = entity.behavior()
                {
                    behavior.update(&entity);
                }
            });
            hooks.update = bind(&self.event_update, update, 0);
        }
        if lifecycle.contains(Lifecycle::LATE_UPDATE) {
            let weak = Rc::downgrade(entity);
            let late_update: Rc<dyn EventLateUpdate> = Rc::new(move || {
                if let Some(entity) = weak.upgrade()
                    && let Some(behavior) = entity.behavior()
                {
                    behavior.late_update(&entity);
                }
            });
            hooks.late_update = bind(&self.event_late_update, late_update, 0);
        }
    }

    fn shut_entity(&self, ctx: &RuntimeContext, entity: &Rc<Entity>) {
        if let Some(directory) = ctx.directory() {
            directory.remove(entity.id());
        }
        let Some(mut hooks) = self.entities.borrow_mut().remove(&entity.id()) else {
            return;
        };
        hooks.update.unbind();
        hooks.late_update.unbind();
        let lifecycle = hooks.lifecycle;
        let behavior = entity.behavior().cloned();

        entity.set_state(EntityState::Shut);
        if lifecycle.contains(Lifecycle::SHUT)
            && let Some(behavior) = &behavior
        {
            ctx.recover("entity shut", || behavior.shut(entity));
        }

        let mut disposable = Vec::new();
        entity.reverse_range_components(|component| {
            if let Some((lifecycle, component)) = self.release_component(ctx, component) {
                disposable.push((lifecycle, component));
            }
            true
        });
        if lifecycle.contains(Lifecycle::SHUT_FIN)
            && let Some(behavior) = &behavior
        {
            ctx.recover("entity shut_fin", || behavior.shut_fin(entity));
        }

        for (lifecycle, component) in disposable {
            if lifecycle.contains(Lifecycle::DISPOSE) {
                ctx.recover("component dispose", || component.dispose());
            }
        }
        if lifecycle.contains(Lifecycle::DISPOSE)
            && let Some(behavior) = &behavior
        {
            ctx.recover("entity dispose", || behavior.dispose(entity));
        }

        hooks.destroy_self.unbind();
        for hook in &mut hooks.comp_mgr {
            hook.unbind();
        }
    }

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    /// Brings freshly added or first-accessed components up to the phase of
    /// their entity, awaking the whole batch before starting any of it.
    fn catch_up(&self, ctx: &RuntimeContext, entity: &Rc<Entity>, components: &[Rc<dyn Component>]) {
        let target = match entity.state() {
            EntityState::Awake => ComponentState::Awake,
            EntityState::Start => ComponentState::Start,
            EntityState::Alive => ComponentState::Alive,
            _ => return,
        };
        if !self.entities.borrow().contains_key(&entity.id()) {
            return;
        }
        for phase in [ComponentState::Awake, ComponentState::Start, ComponentState::Alive] {
            if phase > target {
                break;
            }
            for component in components {
                self.advance_component(ctx, component, phase);
            }
        }
    }

    /// Steps a component forward until it reaches `target`, calling the
    /// hooks it declared on the way.
    fn advance_component(&self, ctx: &RuntimeContext, component: &Rc<dyn Component>, target: ComponentState) {
        let core = component.core();
        if core.state() >= ComponentState::Detach {
            return;
        }
        let lifecycle = self.bind_component(ctx, component);

        if target >= ComponentState::Awake && core.state() == ComponentState::Attach {
            core.set_state(ComponentState::Awake);
            if let Some(hooks) = self.components.borrow_mut().get_mut(&core.id()) {
                hooks.awoken = true;
            }
            if lifecycle.contains(Lifecycle::AWAKE) {
                ctx.recover("component awake", || component.awake());
            }
        }
        if target >= ComponentState::Start && core.state() == ComponentState::Awake {
            core.set_state(ComponentState::Start);
            if lifecycle.contains(Lifecycle::START) {
                ctx.recover("component start", || component.start());
            }
        }
        if target >= ComponentState::Alive && core.state() == ComponentState::Start {
            core.set_state(ComponentState::Alive);
            self.bind_component_updates(component);
        }
    }

    fn bind_component(&self, ctx: &RuntimeContext, component: &Rc<dyn Component>) -> Lifecycle {
        let core = component.core();
        if let Some(hooks) = self.components.borrow().get(&core.id()) {
            return hooks.lifecycle;
        }
        let lifecycle = component.lifecycle();
        let event = core.event_destroy_self();
        event.configure(ctx.auto_recover(), ctx.report_error().cloned());
        event.set_gc_collector(ctx.gc_collector());
        let destroy_self = bind(
            event,
            Rc::new(on_component_destroy_self) as Rc<dyn EventComponentDestroySelf>,
            0,
        );
        self.components.borrow_mut().insert(
            core.id(),
            ComponentHooks {
                lifecycle,
                destroy_self,
                update: Hook::default(),
                late_update: Hook::default(),
                awoken: false,
            },
        );
        lifecycle
    }

    fn bind_component_updates(&self, component: &Rc<dyn Component>) {
        let mut components = self.components.borrow_mut();
        let Some(hooks) = components.get_mut(&component.core().id()) else {
            return;
        };
        if hooks.lifecycle.contains(Lifecycle::UPDATE) {
            let weak = Rc::downgrade(component);
            let update: Rc<dyn EventUpdate> = Rc::new(move || {
                if let Some(component) = weak.upgrade() {
                    component.update();
                }
            });
            hooks.update = bind(&self.event_update, update, 0);
        }
        if hooks.lifecycle.contains(Lifecycle::LATE_UPDATE) {
            let weak = Rc::downgrade(component);
            let late_update: Rc<dyn EventLateUpdate> = Rc::new(move || {
                if let Some(component) = weak.upgrade() {
                    component.late_update();
                }
            });
            hooks.late_update = bind(&self.event_late_update, late_update, 0);
        }
    }

    /// Unbinds a component and runs its `shut` hook. Returns the component
    /// if it still owes a `dispose` call.
    fn release_component(
        &self,
        ctx: &RuntimeContext,
        component: &Rc<dyn Component>,
    ) -> Option<(Lifecycle, Rc<dyn Component>)> {
        let core = component.core();
        let mut hooks = self.components.borrow_mut().remove(&core.id())?;
        hooks.unbind();
        if !hooks.awoken {
            return None;
        }
        core.set_state(ComponentState::Shut);
        if hooks.lifecycle.contains(Lifecycle::SHUT) {
            ctx.recover("component shut", || component.shut());
        }
        Some((hooks.lifecycle, component.clone()))
    }

    /// Removal of a single component from a live entity.
    fn shut_component(&self, ctx: &RuntimeContext, component: &Rc<dyn Component>) {
        if let Some((lifecycle, component)) = self.release_component(ctx, component)
            && lifecycle.contains(Lifecycle::DISPOSE)
        {
            ctx.recover("component dispose", || component.dispose());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::component::ComponentCore;
    use crate::entity::{EntityBehavior, EntityOptions};

    type Log = Rc<RefCell<Vec<String>>>;

    struct Probe {
        core: ComponentCore,
        tag: &'static str,
        log: Log,
    }

    impl Probe {
        fn new(tag: &'static str, log: &Log) -> Rc<dyn Component> {
            Rc::new(Probe {
                core: ComponentCore::new(),
                tag,
                log: log.clone(),
            })
        }

        fn push(&self, what: &str) {
            self.log.borrow_mut().push(format!("{}.{}", self.tag, what));
        }
    }

    impl Component for Probe {
        fn core(&self) -> &ComponentCore {
            &self.core
        }

        fn lifecycle(&self) -> Lifecycle {
            Lifecycle::AWAKE | Lifecycle::START | Lifecycle::UPDATE | Lifecycle::SHUT | Lifecycle::DISPOSE
        }

        fn awake(&self) {
            self.push("awake");
        }

        fn start(&self) {
            self.push("start");
        }

        fn update(&self) {
            self.push("update");
        }

        fn shut(&self) {
            self.push("shut");
        }

        fn dispose(&self) {
            self.push("dispose");
        }
    }

    struct Body {
        log: Log,
    }

    impl EntityBehavior for Body {
        fn lifecycle(&self) -> Lifecycle {
            Lifecycle::AWAKE | Lifecycle::INIT_FIN | Lifecycle::SHUT_FIN | Lifecycle::DISPOSE
        }

        fn awake(&self, _: &Rc<Entity>) {
            self.log.borrow_mut().push("entity.awake".into());
        }

        fn init_fin(&self, _: &Rc<Entity>) {
            self.log.borrow_mut().push("entity.init_fin".into());
        }

        fn shut_fin(&self, _: &Rc<Entity>) {
            self.log.borrow_mut().push("entity.shut_fin".into());
        }

        fn dispose(&self, _: &Rc<Entity>) {
            self.log.borrow_mut().push("entity.dispose".into());
        }
    }

    fn entity_with(log: &Log, options: EntityOptions) -> Rc<Entity> {
        let entity = Entity::new(options.behavior(Rc::new(Body { log: log.clone() })));
        entity
            .add_components(&[("a", Probe::new("a", log)), ("b", Probe::new("b", log))])
            .unwrap();
        entity
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    #[test]
    fn init_awakes_all_before_starting_any() {
        let log: Log = Rc::default();
        let ctx = RuntimeContext::new("driver");
        let entity = entity_with(&log, EntityOptions::default());
        ctx.entity_mgr().add_entity(entity.clone()).unwrap();

        assert_eq!(entity.state(), EntityState::Alive);
        assert_eq!(
            *log.borrow(),
            ["entity.awake", "a.awake", "b.awake", "a.start", "b.start", "entity.init_fin"]
        );

        log.borrow_mut().clear();
        ctx.driver().emit_update();
        assert_eq!(*log.borrow(), ["a.update", "b.update"]);
    }

    #[test]
    fn components_added_later_catch_up() {
        let log: Log = Rc::default();
        let ctx = RuntimeContext::new("driver");
        let entity = Entity::new(EntityOptions::default());
        ctx.entity_mgr().add_entity(entity.clone()).unwrap();

        entity
            .add_components(&[("x", Probe::new("x", &log)), ("y", Probe::new("y", &log))])
            .unwrap();
        assert_eq!(*log.borrow(), ["x.awake", "y.awake", "x.start", "y.start"]);
        assert_eq!(
            entity.get_component("y").unwrap().core().state(),
            ComponentState::Alive
        );
    }

    #[test]
    fn lazy_components_wake_on_first_access() {
        let log: Log = Rc::default();
        let ctx = RuntimeContext::new("driver");
        let entity = entity_with(&log, EntityOptions::default().awake_on_first_access(true));
        ctx.entity_mgr().add_entity(entity.clone()).unwrap();
        assert_eq!(*log.borrow(), ["entity.awake", "entity.init_fin"]);

        log.borrow_mut().clear();
        let b = entity.get_component("b").unwrap();
        assert_eq!(b.core().state(), ComponentState::Alive);
        assert_eq!(*log.borrow(), ["b.awake", "b.start"]);

        log.borrow_mut().clear();
        ctx.driver().emit_update();
        assert_eq!(*log.borrow(), ["b.update"]);
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    #[test]
    fn removal_shuts_in_reverse_then_disposes() {
        let log: Log = Rc::default();
        let ctx = RuntimeContext::new("driver");
        let entity = entity_with(&log, EntityOptions::default());
        ctx.entity_mgr().add_entity(entity.clone()).unwrap();
        log.borrow_mut().clear();

        entity.destroy_self();
        assert_eq!(
            *log.borrow(),
            ["b.shut", "a.shut", "entity.shut_fin", "b.dispose", "a.dispose", "entity.dispose"]
        );
        assert_eq!(entity.state(), EntityState::Death);
        assert_eq!(ctx.driver().bound_counts(), (0, 0));

        log.borrow_mut().clear();
        ctx.driver().emit_update();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn component_destroy_self_detaches_it() {
        let log: Log = Rc::default();
        let ctx = RuntimeContext::new("driver");
        let entity = entity_with(&log, EntityOptions::default());
        ctx.entity_mgr().add_entity(entity.clone()).unwrap();
        log.borrow_mut().clear();

        let a = entity.get_component("a").unwrap();
        a.core().destroy_self();
        assert_eq!(*log.borrow(), ["a.shut", "a.dispose"]);
        assert_eq!(a.core().state(), ComponentState::Death);
        assert!(entity.get_component("a").is_none());
        assert_eq!(ctx.driver().bound_counts(), (1, 1));
    }

    #[test]
    fn destroy_during_awake_stops_init() {
        struct Quitter {
            core: ComponentCore,
            started: Cell<bool>,
        }

        impl Component for Quitter {
            fn core(&self) -> &ComponentCore {
                &self.core
            }

            fn lifecycle(&self) -> Lifecycle {
                Lifecycle::AWAKE | Lifecycle::START
            }

            fn awake(&self) {
                if let Some(entity) = self.core.entity() {
                    entity.destroy_self();
                }
            }

            fn start(&self) {
                self.started.set(true);
            }
        }

        let ctx = RuntimeContext::new("driver");
        let quitter = Rc::new(Quitter {
            core: ComponentCore::new(),
            started: Cell::new(false),
        });
        let entity = Entity::new(EntityOptions::default());
        entity.add_component("quitter", quitter.clone()).unwrap();
        ctx.entity_mgr().add_entity(entity.clone()).unwrap();

        assert_eq!(entity.state(), EntityState::Death);
        assert!(!quitter.started.get());
        assert_eq!(ctx.entity_mgr().count(), 0);
    }

    #[test]
    fn update_runs_before_late_update() {
        let ctx = RuntimeContext::new("driver");
        let log: Log = Rc::default();
        let (early, late) = (log.clone(), log.clone());
        let _late = bind(
            ctx.event_late_update(),
            Rc::new(move || late.borrow_mut().push("late".into())) as Rc<dyn EventLateUpdate>,
            -100,
        );
        let _early = bind(
            ctx.event_update(),
            Rc::new(move || early.borrow_mut().push("update".into())) as Rc<dyn EventUpdate>,
            100,
        );
        ctx.driver().emit_update();
        ctx.driver().emit_late_update();
        assert_eq!(*log.borrow(), ["update", "late"]);
    }
}
