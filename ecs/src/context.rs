//! The per-runtime context handed to every call and hook.
//!
//! A [`RuntimeContext`] is a cheap `Rc` handle. It lives on the thread that
//! created it: a [`Runtime`](crate::Runtime) builds its context on its own
//! thread, while [`RuntimeContext::new`] builds a standalone one on the
//! current thread (lifecycle hooks still run, frames and the task queue do
//! not exist).

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crossbeam_channel::Sender;
use strand_core::list::{GcCollector, GcPending};
use strand_core::sync::{CancellationToken, WaitGroup};

use crate::ec_tree::EcTree;
use crate::entity::{Entity, EntityOptions};
use crate::entity_mgr::EntityMgr;
use crate::error::{EcError, RuntimeError, report_error};
use crate::event::Event;
use crate::id::Id;
use crate::registry::Registry;
use crate::runtime::driver::{Driver, EventLateUpdate, EventUpdate};
use crate::runtime::{Frame, RunningHandler, RunningState, RuntimeHandle, RuntimeOptions};
use crate::service::EntityDirectory;

pub(crate) struct ContextInner {
    name: String,
    id: Id,
    entity_mgr: EntityMgr,
    tree: EcTree,
    driver: Driver,
    gc: Rc<GcPending>,
    frame: Option<Frame>,
    cancel: CancellationToken,
    wait_group: WaitGroup,
    auto_recover: bool,
    report_error: Option<Sender<RuntimeError>>,
    handle: Option<RuntimeHandle>,
    registry: Option<Arc<Registry>>,
    directory: Option<Arc<EntityDirectory>>,
    running_handler: Option<RunningHandler>,
}

/// Everything a context is assembled from.
pub(crate) struct ContextParts {
    pub(crate) name: String,
    pub(crate) auto_recover: bool,
    pub(crate) report_error: Option<Sender<RuntimeError>>,
    pub(crate) frame: Option<Frame>,
    pub(crate) cancel: CancellationToken,
    pub(crate) wait_group: WaitGroup,
    pub(crate) handle: Option<RuntimeHandle>,
    pub(crate) registry: Option<Arc<Registry>>,
    pub(crate) directory: Option<Arc<EntityDirectory>>,
    pub(crate) running_handler: Option<RunningHandler>,
}

impl ContextParts {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_recover: false,
            report_error: None,
            frame: None,
            cancel: CancellationToken::new(),
            wait_group: WaitGroup::new(),
            handle: None,
            registry: None,
            directory: None,
            running_handler: None,
        }
    }
}

/// Handle to the entities, tree and services of one runtime.
#[derive(Clone)]
pub struct RuntimeContext {
    inner: Rc<ContextInner>,
}

impl RuntimeContext {
    /// Creates a standalone context on the current thread.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_parts(ContextParts::new(name))
    }

    /// Creates a standalone context taking name and panic recovery from
    /// `options`. Frame options are ignored.
    pub fn from_options(options: &RuntimeOptions) -> Self {
        let mut parts = ContextParts::new(options.name.clone());
        parts.auto_recover = options.auto_recover;
        parts.report_error = options.report_error.clone();
        Self::from_parts(parts)
    }

    /// Standalone context with a component/prototype registry.
    pub fn with_registry(name: impl Into<String>, registry: Arc<Registry>) -> Self {
        let mut parts = ContextParts::new(name);
        parts.registry = Some(registry);
        Self::from_parts(parts)
    }

    pub(crate) fn from_parts(parts: ContextParts) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ContextInner>| ContextInner {
            name: parts.name,
            id: Id::new(),
            entity_mgr: EntityMgr::new(weak.clone()),
            tree: EcTree::new(weak.clone()),
            driver: Driver::new(weak.clone()),
            gc: Rc::new(GcPending::new()),
            frame: parts.frame,
            cancel: parts.cancel,
            wait_group: parts.wait_group,
            auto_recover: parts.auto_recover,
            report_error: parts.report_error,
            handle: parts.handle,
            registry: parts.registry,
            directory: parts.directory,
            running_handler: parts.running_handler,
        });
        let ctx = RuntimeContext { inner };
        ctx.inner.entity_mgr.configure(&ctx);
        ctx.inner.tree.install(&ctx);
        ctx.inner.driver.install(&ctx);
        ctx
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ContextInner>) -> Option<RuntimeContext> {
        weak.upgrade().map(|inner| RuntimeContext { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id(&self) -> Id {
        self.inner.id
    }

    pub fn entity_mgr(&self) -> &EntityMgr {
        &self.inner.entity_mgr
    }

    pub fn tree(&self) -> &EcTree {
        &self.inner.tree
    }

    pub(crate) fn driver(&self) -> &Driver {
        &self.inner.driver
    }

    /// Emitted once per frame, before [`event_late_update`](Self::event_late_update).
    pub fn event_update(&self) -> &Event<dyn EventUpdate> {
        self.inner.driver.event_update()
    }

    pub fn event_late_update(&self) -> &Event<dyn EventLateUpdate> {
        self.inner.driver.event_late_update()
    }

    /// Frame clock; `None` unless the runtime runs a frame loop.
    pub fn frame(&self) -> Option<&Frame> {
        self.inner.frame.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Background work registered here is awaited before the runtime stops.
    pub fn wait_group(&self) -> &WaitGroup {
        &self.inner.wait_group
    }

    pub fn auto_recover(&self) -> bool {
        self.inner.auto_recover
    }

    pub fn report_error(&self) -> Option<&Sender<RuntimeError>> {
        self.inner.report_error.as_ref()
    }

    /// Handle of the owning runtime; `None` for standalone contexts.
    pub fn handle(&self) -> Option<&RuntimeHandle> {
        self.inner.handle.as_ref()
    }

    pub fn registry(&self) -> Option<&Arc<Registry>> {
        self.inner.registry.as_ref()
    }

    pub(crate) fn directory(&self) -> Option<&Arc<EntityDirectory>> {
        self.inner.directory.as_ref()
    }

    pub(crate) fn gc_collector(&self) -> Rc<dyn GcCollector> {
        self.inner.gc.clone()
    }

    /// Containers waiting for the next GC sweep.
    pub fn pending_gc(&self) -> usize {
        self.inner.gc.len()
    }

    /// Sweeps every container with pending garbage. Returns how many were
    /// swept.
    pub fn run_gc(&self) -> usize {
        self.inner.gc.run()
    }

    /// Builds an entity from a registered prototype and adds it.
    pub fn build_entity(&self, prototype: &str, options: EntityOptions) -> Result<Rc<Entity>, EcError> {
        let registry = self
            .registry()
            .ok_or_else(|| EcError::UnknownPrototype(prototype.to_string()))?;
        let entity = registry.build_entity(prototype, options)?;
        self.entity_mgr().add_entity(entity.clone())?;
        Ok(entity)
    }

    /// Runs `f`, converting a panic into a reported [`RuntimeError`] when
    /// `auto_recover` is set. Returns `false` if `f` panicked.
    pub(crate) fn recover(&self, site: &str, f: impl FnOnce()) -> bool {
        if !self.inner.auto_recover {
            f();
            return true;
        }
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => true,
            Err(payload) => {
                let err = RuntimeError::from_panic(payload.as_ref(), true);
                log::error!("[{}] {} panicked: {}", self.inner.name, site, err);
                report_error(self.report_error(), err);
                false
            }
        }
    }

    /// Runs a queued call.
    pub(crate) fn invoke_call(&self, call: Box<dyn FnOnce(&RuntimeContext) + Send>) {
        self.recover("call", || call(self));
    }

    pub(crate) fn notify_running(&self, state: RunningState) {
        if let Some(handler) = &self.inner.running_handler {
            self.recover("running handler", || handler(self, state));
        }
    }

    pub fn ptr_eq(&self, other: &RuntimeContext) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("entities", &self.inner.entity_mgr.count())
            .field("framed", &self.inner.frame.is_some())
            .finish()
    }
}
