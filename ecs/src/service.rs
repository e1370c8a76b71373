//! Multi-runtime service layer.
//!
//! A [`ServiceContext`] is the one thread-safe entry point above the
//! runtimes: it owns the shared [`Registry`], creates named runtimes under a
//! common cancellation token and routes entity calls to the runtime that
//! owns the entity.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::RwLock;
use strand_core::sync::{CancellationToken, WaitGroup};

use crate::context::RuntimeContext;
use crate::entity::Entity;
use crate::error::{ConfigError, EcError, RuntimeError};
use crate::id::Id;
use crate::registry::Registry;
use crate::runtime::{Runtime, RuntimeHandle, RuntimeOptions, SafeRet};

/// Which runtime each live entity belongs to.
#[derive(Debug, Default)]
pub struct EntityDirectory {
    entries: RwLock<HashMap<Id, String>>,
}

impl EntityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, entity: Id, runtime: &str) {
        self.entries.write().insert(entity, runtime.to_string());
    }

    pub(crate) fn remove(&self, entity: Id) {
        self.entries.write().remove(&entity);
    }

    /// Name of the runtime owning `entity`.
    pub fn locate(&self, entity: Id) -> Option<String> {
        self.entries.read().get(&entity).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

struct ServiceInner {
    registry: Arc<Registry>,
    cancel: CancellationToken,
    wait_group: WaitGroup,
    runtimes: RwLock<HashMap<String, RuntimeHandle>>,
    directory: Arc<EntityDirectory>,
}

#[derive(Clone)]
pub struct ServiceContext {
    inner: Arc<ServiceInner>,
}

impl ServiceContext {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                registry,
                cancel: CancellationToken::new(),
                wait_group: WaitGroup::new(),
                runtimes: RwLock::new(HashMap::new()),
                directory: Arc::new(EntityDirectory::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn directory(&self) -> &Arc<EntityDirectory> {
        &self.inner.directory
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Creates a runtime wired to this service. The caller starts it with
    /// [`Runtime::run`].
    pub fn create_runtime(&self, options: RuntimeOptions) -> Result<Runtime, ConfigError> {
        let mut runtimes = self.inner.runtimes.write();
        if runtimes.contains_key(&options.name) {
            return Err(ConfigError::DuplicateRuntime(options.name));
        }
        let runtime = Runtime::new(options)?
            .with_cancel_token(&self.inner.cancel)
            .with_wait_group(self.inner.wait_group.clone())
            .with_registry(self.inner.registry.clone())
            .with_directory(self.inner.directory.clone());
        runtimes.insert(runtime.name().to_string(), runtime.handle());
        log::debug!("runtime {} registered", runtime.name());
        Ok(runtime)
    }

    pub fn runtime(&self, name: &str) -> Option<RuntimeHandle> {
        self.inner.runtimes.read().get(name).cloned()
    }

    pub fn runtime_names(&self) -> Vec<String> {
        self.inner.runtimes.read().keys().cloned().collect()
    }

    /// Handle of the runtime owning `entity`.
    pub fn locate_entity(&self, entity: Id) -> Option<RuntimeHandle> {
        let name = self.inner.directory.locate(entity)?;
        self.runtime(&name)
    }

    /// Runs `f` against `entity` on its runtime and waits for the result.
    ///
    /// # Panics
    ///
    /// Panics when called from the owning runtime's thread.
    pub fn call_entity<T, F>(&self, entity: Id, f: F) -> SafeRet<T>
    where
        T: Send + 'static,
        F: FnOnce(&RuntimeContext, &Rc<Entity>) -> T + Send + 'static,
    {
        let handle = self.locate_entity(entity).ok_or(EcError::EntityNotFound(entity))?;
        handle
            .await_call(move |ctx| {
                let found = ctx.entity_mgr().get_entity(entity).ok_or(EcError::EntityNotFound(entity))?;
                Ok(f(ctx, &found))
            })
            .and_then(|ret: Result<T, EcError>| ret.map_err(RuntimeError::from))
    }

    /// Stops every runtime created by this service.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    /// Blocks until every started runtime has stopped.
    pub fn wait(&self) {
        self.inner.wait_group.wait();
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("runtimes", &self.runtime_names())
            .field("entities", &self.inner.directory.len())
            .finish()
    }
}
