use std::cell::Cell;
use std::rc::Rc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use strand_ecs::event::{Event, Hook, bind};
use strand_ecs::{Component, ComponentCore, Entity, EntityOptions, Lifecycle, RuntimeContext};

// ---------------------------------------------------------------------------
// Helper types
// ---------------------------------------------------------------------------

trait OnTick {
    fn on_tick(&self, value: u64);
}

struct Accumulator(Cell<u64>);

impl OnTick for Accumulator {
    fn on_tick(&self, value: u64) {
        self.0.set(self.0.get().wrapping_add(value));
    }
}

#[derive(Default)]
struct Position {
    core: ComponentCore,
    x: Cell<f32>,
}

impl Component for Position {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::UPDATE
    }

    fn update(&self) {
        self.x.set(self.x.get() + 1.0);
    }
}

fn subscribed(n: usize) -> (Event<dyn OnTick>, Vec<Hook>) {
    let event: Event<dyn OnTick> = Event::new();
    let hooks = (0..n)
        .map(|i| bind(&event, Rc::new(Accumulator(Cell::new(0))) as Rc<dyn OnTick>, (i % 7) as i32))
        .collect();
    (event, hooks)
}

fn entity_with_position() -> Rc<Entity> {
    let entity = Entity::new(EntityOptions::default());
    let _ = entity.add_component("position", Rc::new(Position::default()));
    entity
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

fn bench_emit_1k_subscribers(c: &mut Criterion) {
    let (event, _hooks) = subscribed(1_000);
    c.bench_function("event_emit_1k_subscribers", |b| {
        b.iter(|| {
            event.emit(|s| {
                s.on_tick(black_box(1));
                true
            })
        });
    });
}

fn bench_bind_unbind_1k(c: &mut Criterion) {
    c.bench_function("event_bind_unbind_1k", |b| {
        b.iter_batched(
            || subscribed(1_000),
            |(event, mut hooks)| {
                for hook in &mut hooks {
                    hook.unbind();
                }
                black_box(event.len())
            },
            BatchSize::SmallInput,
        );
    });
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

fn bench_add_entities_1k(c: &mut Criterion) {
    c.bench_function("add_1k_entities", |b| {
        b.iter_batched(
            || RuntimeContext::new("bench"),
            |ctx| {
                for _ in 0..1_000 {
                    let _ = ctx.entity_mgr().add_entity(entity_with_position());
                }
                black_box(ctx.entity_mgr().count())
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_add_remove_entities_1k(c: &mut Criterion) {
    c.bench_function("add_remove_1k_entities", |b| {
        b.iter_batched(
            || RuntimeContext::new("bench"),
            |ctx| {
                let ids: Vec<_> = (0..1_000)
                    .map(|_| {
                        let entity = entity_with_position();
                        let _ = ctx.entity_mgr().add_entity(entity.clone());
                        entity.id()
                    })
                    .collect();
                for id in ids {
                    let _ = ctx.entity_mgr().remove_entity(id);
                }
                black_box(ctx.run_gc())
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_component_lookup(c: &mut Criterion) {
    let ctx = RuntimeContext::new("bench");
    let entity = entity_with_position();
    ctx.entity_mgr().add_entity(entity.clone()).unwrap();
    c.bench_function("component_lookup_by_name", |b| {
        b.iter(|| black_box(entity.get_component_as::<Position>("position")));
    });
}

criterion_group!(
    event_benches,
    bench_emit_1k_subscribers,
    bench_bind_unbind_1k,
);

criterion_group!(
    entity_benches,
    bench_add_entities_1k,
    bench_add_remove_entities_1k,
    bench_component_lookup,
);

criterion_main!(event_benches, entity_benches);
