//! Registry of the entities living in one [`RuntimeContext`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use strand_core::list::{ElementId, List};

use crate::context::{ContextInner, RuntimeContext};
use crate::entity::Entity;
use crate::error::EcError;
use crate::event::Event;
use crate::id::Id;
use crate::lifecycle::EntityState;

pub trait EventEntityMgrAddEntity {
    fn on_entity_mgr_add_entity(&self, entity: &Rc<Entity>);
}

impl<F: Fn(&Rc<Entity>)> EventEntityMgrAddEntity for F {
    fn on_entity_mgr_add_entity(&self, entity: &Rc<Entity>) {
        self(entity)
    }
}

/// Fired after the entity has entered `Leave` and its subtree has been
/// destroyed, before its components are torn down.
pub trait EventEntityMgrRemoveEntity {
    fn on_entity_mgr_remove_entity(&self, entity: &Rc<Entity>);
}

impl<F: Fn(&Rc<Entity>)> EventEntityMgrRemoveEntity for F {
    fn on_entity_mgr_remove_entity(&self, entity: &Rc<Entity>) {
        self(entity)
    }
}

/// Internal pre-removal notice; the EC tree prunes on it.
pub(crate) trait EventEntityMgrRemovingEntity {
    fn on_entity_mgr_removing_entity(&self, entity: &Rc<Entity>);
}

impl<F: Fn(&Rc<Entity>)> EventEntityMgrRemovingEntity for F {
    fn on_entity_mgr_removing_entity(&self, entity: &Rc<Entity>) {
        self(entity)
    }
}

/// Owns the entities of a context, in registration order.
pub struct EntityMgr {
    ctx: Weak<ContextInner>,
    entities: Rc<List<Rc<Entity>>>,
    index: RefCell<HashMap<Id, ElementId>>,
    persist_index: RefCell<HashMap<String, Id>>,
    event_add_entity: Event<dyn EventEntityMgrAddEntity>,
    event_remove_entity: Event<dyn EventEntityMgrRemoveEntity>,
    event_removing_entity: Event<dyn EventEntityMgrRemovingEntity>,
}

impl EntityMgr {
    pub(crate) fn new(ctx: Weak<ContextInner>) -> Self {
        Self {
            ctx,
            entities: Rc::new(List::new()),
            index: RefCell::new(HashMap::new()),
            persist_index: RefCell::new(HashMap::new()),
            event_add_entity: Event::new(),
            event_remove_entity: Event::new(),
            event_removing_entity: Event::new(),
        }
    }

    /// Applies the context's recovery and GC settings. Called once the
    /// context is fully built.
    pub(crate) fn configure(&self, ctx: &RuntimeContext) {
        let auto_recover = ctx.auto_recover();
        let report = ctx.report_error().cloned();
        let gc = ctx.gc_collector();
        self.entities.set_gc_collector(gc.clone());
        self.event_add_entity.configure(auto_recover, report.clone());
        self.event_add_entity.set_gc_collector(gc.clone());
        self.event_remove_entity.configure(auto_recover, report.clone());
        self.event_remove_entity.set_gc_collector(gc.clone());
        self.event_removing_entity.configure(auto_recover, report);
        self.event_removing_entity.set_gc_collector(gc);
    }

    pub fn event_add_entity(&self) -> &Event<dyn EventEntityMgrAddEntity> {
        &self.event_add_entity
    }

    pub fn event_remove_entity(&self) -> &Event<dyn EventEntityMgrRemoveEntity> {
        &self.event_remove_entity
    }

    pub(crate) fn event_removing_entity(&self) -> &Event<dyn EventEntityMgrRemovingEntity> {
        &self.event_removing_entity
    }

    /// Registers a freshly built entity and moves it to `Enter`.
    ///
    /// With a runtime driver attached the entity is then initialized
    /// synchronously, before this call returns.
    pub fn add_entity(&self, entity: Rc<Entity>) -> Result<(), EcError> {
        let id = entity.id();
        if entity.state() != EntityState::Birth {
            return Err(EcError::InvalidEntityState {
                id,
                state: entity.state(),
                expected: "Birth",
            });
        }
        if self.index.borrow().contains_key(&id) {
            return Err(EcError::EntityExists(id));
        }
        if let Some(persist_id) = entity.persist_id()
            && self.persist_index.borrow().contains_key(persist_id)
        {
            return Err(EcError::PersistIdExists(persist_id.to_string()));
        }
        let ctx = RuntimeContext::upgrade(&self.ctx).ok_or(EcError::ContextDropped)?;

        entity.bind_context(&ctx);
        let element = self.entities.push_back(entity.clone());
        self.index.borrow_mut().insert(id, element);
        if let Some(persist_id) = entity.persist_id() {
            self.persist_index.borrow_mut().insert(persist_id.to_string(), id);
        }
        entity.set_state(EntityState::Enter);
        log::debug!("[{}] entity {} added", ctx.name(), id);

        self.event_add_entity.emit(|s| {
            s.on_entity_mgr_add_entity(&entity);
            true
        });
        Ok(())
    }

    /// Removes an entity: its subtree is destroyed, subscribers are notified,
    /// then the entity and its components are torn down to `Death`.
    ///
    /// Removing an entity that is already leaving is a no-op.
    pub fn remove_entity(&self, id: Id) -> Result<(), EcError> {
        let entity = self.get_entity(id).ok_or(EcError::EntityNotFound(id))?;
        if !entity.set_state(EntityState::Leave) {
            return Ok(());
        }

        self.event_removing_entity.emit(|s| {
            s.on_entity_mgr_removing_entity(&entity);
            true
        });
        self.event_remove_entity.emit(|s| {
            s.on_entity_mgr_remove_entity(&entity);
            true
        });

        if let Some(element) = self.index.borrow_mut().remove(&id) {
            self.entities.escape(element);
        }
        if let Some(persist_id) = entity.persist_id() {
            self.persist_index.borrow_mut().remove(persist_id);
        }
        entity.finalize();
        log::debug!("entity {} removed", id);
        Ok(())
    }

    pub fn get_entity(&self, id: Id) -> Option<Rc<Entity>> {
        let element = self.index.borrow().get(&id).copied()?;
        self.entities.get(element)
    }

    pub fn get_entity_by_persist_id(&self, persist_id: &str) -> Option<Rc<Entity>> {
        let id = self.persist_index.borrow().get(persist_id).copied()?;
        self.get_entity(id)
    }

    pub fn contains(&self, id: Id) -> bool {
        self.index.borrow().contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.entities.len()
    }

    /// Visits entities in registration order until `visitor` returns `false`.
    pub fn range(&self, mut visitor: impl FnMut(&Rc<Entity>) -> bool) {
        self.entities.traversal(|_, entity| visitor(&entity));
    }

    pub fn reverse_range(&self, mut visitor: impl FnMut(&Rc<Entity>) -> bool) {
        self.entities.reverse_traversal(|_, entity| visitor(&entity));
    }

    /// Snapshot of the registered entities.
    pub fn entities(&self) -> Vec<Rc<Entity>> {
        self.entities.to_vec()
    }
}
