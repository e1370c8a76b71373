//! # Strand ECS
//!
//! Single-threaded entity-component runtime driven by a frame loop and a
//! bounded cross-thread task queue.
//!
//! ## Core Types
//!
//! - [`Entity`] - Named component container, always handled as `Rc<Entity>`
//! - [`Component`] / [`ComponentCore`] - User state with lifecycle hooks
//! - [`EntityBehavior`] - Entity-level hooks (`init_fin`, `shut_fin`, ...)
//! - [`EntityMgr`] - Registration and lookup of a context's entities
//! - [`EcTree`] - Parent/child relations with cascading destruction
//! - [`event::Event`] / [`event::Hook`] - Prioritized, re-entrancy aware
//!   publish/subscribe
//!
//! ## Runtime
//!
//! - [`RuntimeContext`] - Everything owned by one runtime thread
//! - [`Runtime`] - Spawns the thread and runs the loop
//! - [`RuntimeHandle`] - `Send` handle for queueing calls from other threads
//! - [`Registry`] - Component factories and prototypes shared by runtimes
//! - [`ServiceContext`] - Creates runtimes and routes calls to entities
//!
//! All `Rc`-based types stay on the thread that created them; other threads
//! reach them only through [`RuntimeHandle::push_call`] and friends.

extern crate self as strand_ecs;

mod component;
mod context;
mod ec_tree;
mod entity;
mod entity_mgr;
mod error;
pub mod event;
mod id;
mod lifecycle;
mod registry;
pub mod runtime;
mod service;

pub use component::{
    AsAny, Component, ComponentCore, EventComponentDestroySelf, component_ref, downcast_component,
};
pub use context::RuntimeContext;
pub use ec_tree::{EcTree, EventEcTreeAddChild, EventEcTreeRemoveChild};
pub use entity::{
    Entity, EntityBehavior, EntityOptions, EventCompMgrAddComponents, EventCompMgrFirstAccessComponent,
    EventCompMgrRemoveComponent, EventEntityDestroySelf,
};
pub use entity_mgr::{EntityMgr, EventEntityMgrAddEntity, EventEntityMgrRemoveEntity};
pub use error::{ConfigError, EcError, RuntimeError};
pub use id::Id;
pub use lifecycle::{ComponentState, EntityState, Lifecycle};
pub use registry::{ComponentFactory, Prototype, PrototypeComponent, Registry};
pub use runtime::{
    EventLateUpdate, EventUpdate, Frame, FrameOptions, FrameSection, FrameStats, RunState, Runtime,
    RuntimeConfig, RuntimeHandle, RuntimeOptions, RuntimeSection, RunningHandler, RunningState, SafeRet,
};
pub use service::{EntityDirectory, ServiceContext};
pub use strand_macro::Component;

/// ECS library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
