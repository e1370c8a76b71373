//! Demo world: walkers that move and expire, plus an entity chain whose root
//! expiry tears down the whole subtree.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use strand_ecs::{
    Component, ComponentCore, EcError, Entity, EntityOptions, EventEcTreeRemoveChild, EventEntityMgrAddEntity,
    EventEntityMgrRemoveEntity, Registry, RuntimeContext,
    event::{Hook, bind},
};

pub const WALKER: &str = "walker";
pub const NODE: &str = "node";

/// Moves by its velocity every frame.
#[derive(Default, Component)]
#[component(update)]
pub struct Position {
    core: ComponentCore,
    pub x: Cell<f64>,
    pub y: Cell<f64>,
    pub vx: Cell<f64>,
    pub vy: Cell<f64>,
}

impl Position {
    fn on_update(&self) {
        let Some(ctx) = self.core.context() else {
            return;
        };
        let dt = ctx.frame().map_or(0.0, |frame| frame.frame_delta().as_secs_f64());
        self.x.set(self.x.get() + self.vx.get() * dt);
        self.y.set(self.y.get() + self.vy.get() * dt);
    }
}

/// Destroys its entity after a number of frames.
#[derive(Component)]
#[component(start, update)]
pub struct Lifetime {
    core: ComponentCore,
    ttl: Cell<u32>,
    left: Cell<u32>,
}

impl Lifetime {
    pub fn new(ttl: u32) -> Self {
        Self {
            core: ComponentCore::new(),
            ttl: Cell::new(ttl),
            left: Cell::new(ttl),
        }
    }

    pub fn frames_left(&self) -> u32 {
        self.left.get()
    }

    fn on_start(&self) {
        self.left.set(self.ttl.get());
    }

    fn on_update(&self) {
        let left = self.left.get().saturating_sub(1);
        self.left.set(left);
        if left == 0
            && let Some(entity) = self.core.entity()
        {
            entity.destroy_self();
        }
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        // Spread expiries over 30..90 frames.
        let core = ComponentCore::new();
        let ttl = 30 + (core.id().raw() % 60) as u32;
        Self {
            core,
            ttl: Cell::new(ttl),
            left: Cell::new(ttl),
        }
    }
}

/// Declares the demo components and prototypes.
pub fn registry() -> Result<Registry, EcError> {
    let registry = Registry::new();
    registry.declare_component("position", || Rc::new(Position::default()) as Rc<dyn Component>)?;
    registry.declare_component("lifetime", || Rc::new(Lifetime::default()) as Rc<dyn Component>)?;
    registry.declare_prototype(WALKER, &[("position", true), ("lifetime", false)])?;
    registry.declare_prototype(NODE, &[("position", true)])?;
    Ok(registry)
}

/// Entity churn observed on the runtime thread, readable from any thread.
#[derive(Debug, Default)]
pub struct DemoStats {
    pub spawned: AtomicUsize,
    pub removed: AtomicUsize,
    pub detached: AtomicUsize,
}

impl DemoStats {
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::Relaxed)
    }

    pub fn detached(&self) -> usize {
        self.detached.load(Ordering::Relaxed)
    }
}

/// Spawns `walkers` walkers and, for `depth > 0`, a chain of `depth` nodes
/// whose root expires after `chain_ttl` frames.
pub fn populate(
    ctx: &RuntimeContext,
    walkers: usize,
    depth: usize,
    chain_ttl: u32,
    stats: &Arc<DemoStats>,
) -> Result<(), EcError> {
    watch(ctx, stats);

    for i in 0..walkers {
        let walker = ctx.build_entity(WALKER, EntityOptions::default().persist_id(format!("walker-{}", i)))?;
        if let Some(position) = walker.get_component_as::<Position>("position") {
            let angle = i as f64 * 0.37;
            position.vx.set(angle.cos());
            position.vy.set(angle.sin());
        }
    }

    let mut parent: Option<Rc<Entity>> = None;
    for level in 0..depth {
        let node = ctx.build_entity(NODE, EntityOptions::default().persist_id(format!("node-{}", level)))?;
        match &parent {
            Some(parent) => ctx.tree().add_child(parent.id(), node.id())?,
            None => node.add_component("lifetime", Rc::new(Lifetime::new(chain_ttl)))?,
        }
        parent = Some(node);
    }
    log::info!(
        "[{}] spawned {} walkers and a chain of depth {}",
        ctx.name(),
        walkers,
        depth
    );
    Ok(())
}

fn watch(ctx: &RuntimeContext, stats: &Arc<DemoStats>) {
    let mgr = ctx.entity_mgr();
    let spawned = stats.clone();
    let removed = stats.clone();
    let detached = stats.clone();
    let hooks: [Hook; 3] = [
        bind(
            mgr.event_add_entity(),
            Rc::new(move |_: &Rc<Entity>| {
                spawned.spawned.fetch_add(1, Ordering::Relaxed);
            }) as Rc<dyn EventEntityMgrAddEntity>,
            0,
        ),
        bind(
            mgr.event_remove_entity(),
            Rc::new(move |_: &Rc<Entity>| {
                removed.removed.fetch_add(1, Ordering::Relaxed);
            }) as Rc<dyn EventEntityMgrRemoveEntity>,
            0,
        ),
        bind(
            ctx.tree().event_remove_child(),
            Rc::new(move |parent: &Rc<Entity>, child: &Rc<Entity>| {
                log::debug!("entity {} detached from {}", child.id(), parent.id());
                detached.detached.fetch_add(1, Ordering::Relaxed);
            }) as Rc<dyn EventEcTreeRemoveChild>,
            0,
        ),
    ];
    // A dropped Hook does not unbind: the counters stay subscribed until the
    // context closes these events. Hooks are !Send, so they cannot travel
    // with DemoStats.
    debug_assert!(hooks.iter().all(Hook::is_bound));
    drop(hooks);
}

#[cfg(test)]
mod tests {
    use strand_ecs::EventUpdate;

    use super::*;

    fn step(ctx: &RuntimeContext) {
        // Standalone contexts have no frame loop: drive the update hooks
        // through the public event.
        ctx.event_update().emit(|s| {
            s.on_update();
            true
        });
    }

    #[test]
    fn chain_root_expiry_cascades() {
        let ctx = RuntimeContext::with_registry("demo", Arc::new(registry().unwrap()));
        let stats = Arc::new(DemoStats::default());
        populate(&ctx, 0, 3, 2, &stats).unwrap();
        assert_eq!(stats.spawned(), 3);
        assert_eq!(ctx.tree().len(), 2);

        step(&ctx);
        assert_eq!(ctx.entity_mgr().count(), 3);
        step(&ctx);
        assert_eq!(ctx.entity_mgr().count(), 0);
        assert_eq!(stats.removed(), 3);
        assert_eq!(stats.detached(), 2);
    }

    #[test]
    fn walkers_get_distinct_persistent_ids() {
        let ctx = RuntimeContext::with_registry("demo", Arc::new(registry().unwrap()));
        let stats = Arc::new(DemoStats::default());
        populate(&ctx, 4, 0, 1, &stats).unwrap();
        assert_eq!(ctx.entity_mgr().count(), 4);
        let walker = ctx.entity_mgr().get_entity_by_persist_id("walker-2").unwrap();
        assert_eq!(walker.prototype(), Some(WALKER));
        assert!(walker.get_component("position").unwrap().core().is_fixed());
        assert!(!walker.get_component("lifetime").unwrap().core().is_fixed());
    }

    #[test]
    fn counters_outlive_dropped_hooks() {
        let ctx = RuntimeContext::with_registry("demo", Arc::new(registry().unwrap()));
        let stats = Arc::new(DemoStats::default());
        populate(&ctx, 2, 0, 1, &stats).unwrap();

        let walker = ctx.entity_mgr().get_entity_by_persist_id("walker-0").unwrap();
        ctx.entity_mgr().remove_entity(walker.id()).unwrap();
        assert_eq!(stats.spawned(), 2);
        assert_eq!(stats.removed(), 1);
    }

    #[test]
    fn lifetime_counts_down() {
        let lifetime = Lifetime::new(3);
        lifetime.on_update();
        assert_eq!(lifetime.frames_left(), 2);
        let spread = Lifetime::default();
        assert!((30..90).contains(&spread.frames_left()));
    }
}
