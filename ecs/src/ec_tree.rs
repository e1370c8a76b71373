//! Parent/child relations between the entities of one context.
//!
//! The tree is separate from component ownership: it only links entities
//! already registered with the context's [`EntityMgr`](crate::EntityMgr).
//! Removing an entity from the manager destroys its whole subtree and
//! detaches it from its parent, so no link outlives an entity.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use strand_core::list::List;

use crate::context::{ContextInner, RuntimeContext};
use crate::entity::Entity;
use crate::entity_mgr::EventEntityMgrRemovingEntity;
use crate::error::EcError;
use crate::event::{Event, Hook, bind};
use crate::id::Id;
use crate::lifecycle::EntityState;

pub trait EventEcTreeAddChild {
    fn on_ec_tree_add_child(&self, parent: &Rc<Entity>, child: &Rc<Entity>);
}

impl<F: Fn(&Rc<Entity>, &Rc<Entity>)> EventEcTreeAddChild for F {
    fn on_ec_tree_add_child(&self, parent: &Rc<Entity>, child: &Rc<Entity>) {
        self(parent, child)
    }
}

pub trait EventEcTreeRemoveChild {
    fn on_ec_tree_remove_child(&self, parent: &Rc<Entity>, child: &Rc<Entity>);
}

impl<F: Fn(&Rc<Entity>, &Rc<Entity>)> EventEcTreeRemoveChild for F {
    fn on_ec_tree_remove_child(&self, parent: &Rc<Entity>, child: &Rc<Entity>) {
        self(parent, child)
    }
}

pub struct EcTree {
    ctx: Weak<ContextInner>,
    edges: Cell<usize>,
    event_add_child: Event<dyn EventEcTreeAddChild>,
    event_remove_child: Event<dyn EventEcTreeRemoveChild>,
    removing_hook: RefCell<Hook>,
}

impl EcTree {
    pub(crate) fn new(ctx: Weak<ContextInner>) -> Self {
        Self {
            ctx,
            edges: Cell::new(0),
            event_add_child: Event::new(),
            event_remove_child: Event::new(),
            removing_hook: RefCell::new(Hook::default()),
        }
    }

    /// Subscribes to entity removal and applies the context's settings.
    pub(crate) fn install(&self, ctx: &RuntimeContext) {
        let auto_recover = ctx.auto_recover();
        let report = ctx.report_error().cloned();
        self.event_add_child.configure(auto_recover, report.clone());
        self.event_add_child.set_gc_collector(ctx.gc_collector());
        self.event_remove_child.configure(auto_recover, report);
        self.event_remove_child.set_gc_collector(ctx.gc_collector());

        let weak = ctx.downgrade();
        let prune: Rc<dyn EventEntityMgrRemovingEntity> = Rc::new(move |entity: &Rc<Entity>| {
            if let Some(ctx) = RuntimeContext::upgrade(&weak) {
                ctx.tree().prune(&ctx, entity);
            }
        });
        *self.removing_hook.borrow_mut() = bind(ctx.entity_mgr().event_removing_entity(), prune, 0);
    }

    pub fn event_add_child(&self) -> &Event<dyn EventEcTreeAddChild> {
        &self.event_add_child
    }

    pub fn event_remove_child(&self) -> &Event<dyn EventEcTreeRemoveChild> {
        &self.event_remove_child
    }

    fn context(&self) -> Result<RuntimeContext, EcError> {
        RuntimeContext::upgrade(&self.ctx).ok_or(EcError::ContextDropped)
    }

    fn lookup(ctx: &RuntimeContext, id: Id) -> Result<Rc<Entity>, EcError> {
        ctx.entity_mgr().get_entity(id).ok_or(EcError::EntityNotFound(id))
    }

    /// Makes `child_id` a child of `parent_id`.
    pub fn add_child(&self, parent_id: Id, child_id: Id) -> Result<(), EcError> {
        if parent_id == child_id {
            return Err(EcError::SelfParent(child_id));
        }
        let ctx = self.context()?;
        let parent = Self::lookup(&ctx, parent_id)?;
        let child = Self::lookup(&ctx, child_id)?;
        for entity in [&parent, &child] {
            if entity.state() >= EntityState::Leave {
                return Err(EcError::InvalidEntityState {
                    id: entity.id(),
                    state: entity.state(),
                    expected: "before Leave",
                });
            }
        }
        if let Some(current) = child.tree().parent() {
            return Err(EcError::AlreadyHasParent {
                child: child_id,
                parent: current.id(),
            });
        }

        let mut ancestor = parent.tree().parent();
        while let Some(node) = ancestor {
            if node.id() == child_id {
                return Err(EcError::TreeCycle {
                    parent: parent_id,
                    child: child_id,
                });
            }
            ancestor = node.tree().parent();
        }

        let children = parent.tree().children.get_or_init(|| {
            let list = Rc::new(List::new());
            list.set_gc_collector(ctx.gc_collector());
            list
        });
        let element = children.push_back(child.clone());
        *child.tree().parent.borrow_mut() = Rc::downgrade(&parent);
        child.tree().element.set(Some(element));
        self.edges.set(self.edges.get() + 1);

        self.event_add_child.emit(|s| {
            s.on_ec_tree_add_child(&parent, &child);
            true
        });
        Ok(())
    }

    /// Detaches `child_id` from its parent, destroying every descendant of
    /// the child first. The child itself stays registered.
    pub fn remove_child(&self, child_id: Id) -> Result<(), EcError> {
        let ctx = self.context()?;
        let child = Self::lookup(&ctx, child_id)?;
        let parent = child.tree().parent().ok_or(EcError::NoParent(child_id))?;
        if child.tree().removing.replace(true) {
            return Ok(());
        }

        self.destroy_descendants(&ctx, &child);
        self.detach(&parent, &child);
        child.tree().removing.set(false);
        Ok(())
    }

    /// Runs while the manager removes `entity`: destroys its subtree and
    /// unlinks it from its parent.
    fn prune(&self, ctx: &RuntimeContext, entity: &Rc<Entity>) {
        if entity.tree().removing.replace(true) {
            return;
        }
        self.destroy_descendants(ctx, entity);

        // Children that were already leaving elsewhere.
        if let Some(children) = entity.tree().children.get() {
            for (_, child) in children.iter() {
                self.detach(entity, &child);
            }
        }
        if let Some(parent) = entity.tree().parent() {
            self.detach(&parent, entity);
        }
    }

    fn destroy_descendants(&self, ctx: &RuntimeContext, entity: &Rc<Entity>) {
        let Some(children) = entity.tree().children.get().cloned() else {
            return;
        };
        children.reverse_traversal(|_, child| {
            child.destroy_self();
            if child.state() < EntityState::Leave
                && let Err(err) = ctx.entity_mgr().remove_entity(child.id())
            {
                log::warn!("failed to destroy child {}: {}", child.id(), err);
            }
            true
        });
    }

    fn detach(&self, parent: &Rc<Entity>, child: &Rc<Entity>) {
        let Some(element) = child.tree().element.take() else {
            return;
        };
        if let Some(children) = parent.tree().children.get() {
            children.escape(element);
        }
        *child.tree().parent.borrow_mut() = Weak::new();
        self.edges.set(self.edges.get().saturating_sub(1));

        self.event_remove_child.emit(|s| {
            s.on_ec_tree_remove_child(parent, child);
            true
        });
    }

    pub fn parent(&self, id: Id) -> Option<Rc<Entity>> {
        let ctx = self.context().ok()?;
        ctx.entity_mgr().get_entity(id)?.tree().parent()
    }

    pub fn children(&self, id: Id) -> Vec<Rc<Entity>> {
        let mut out = Vec::new();
        self.range_children(id, |child| {
            out.push(child.clone());
            true
        });
        out
    }

    /// Visits the children of `id` in insertion order until `visitor`
    /// returns `false`.
    pub fn range_children(&self, id: Id, mut visitor: impl FnMut(&Rc<Entity>) -> bool) {
        if let Some(children) = self.children_list(id) {
            children.traversal(|_, child| visitor(&child));
        }
    }

    pub fn reverse_range_children(&self, id: Id, mut visitor: impl FnMut(&Rc<Entity>) -> bool) {
        if let Some(children) = self.children_list(id) {
            children.reverse_traversal(|_, child| visitor(&child));
        }
    }

    pub fn count_children(&self, id: Id) -> usize {
        self.children_list(id).map_or(0, |children| children.len())
    }

    /// Number of parent/child links.
    pub fn len(&self) -> usize {
        self.edges.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn children_list(&self, id: Id) -> Option<Rc<List<Rc<Entity>>>> {
        let ctx = self.context().ok()?;
        let entity = ctx.entity_mgr().get_entity(id)?;
        entity.tree().children.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityOptions;

    fn spawn(ctx: &RuntimeContext) -> Rc<Entity> {
        let entity = Entity::new(EntityOptions::default());
        ctx.entity_mgr().add_entity(entity.clone()).unwrap();
        entity
    }

    // -----------------------------------------------------------------------
    // Linking
    // -----------------------------------------------------------------------

    #[test]
    fn add_child_links_both_ways() {
        let ctx = RuntimeContext::new("tree");
        let parent = spawn(&ctx);
        let a = spawn(&ctx);
        let b = spawn(&ctx);
        let tree = ctx.tree();

        tree.add_child(parent.id(), a.id()).unwrap();
        tree.add_child(parent.id(), b.id()).unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.count_children(parent.id()), 2);
        assert_eq!(tree.parent(a.id()).map(|p| p.id()), Some(parent.id()));
        let ids: Vec<Id> = tree.children(parent.id()).iter().map(|c| c.id()).collect();
        assert_eq!(ids, [a.id(), b.id()]);

        let mut reversed = Vec::new();
        tree.reverse_range_children(parent.id(), |c| {
            reversed.push(c.id());
            true
        });
        assert_eq!(reversed, [b.id(), a.id()]);
    }

    #[test]
    fn invalid_links_are_rejected() {
        let ctx = RuntimeContext::new("tree");
        let root = spawn(&ctx);
        let mid = spawn(&ctx);
        let leaf = spawn(&ctx);
        let tree = ctx.tree();
        tree.add_child(root.id(), mid.id()).unwrap();
        tree.add_child(mid.id(), leaf.id()).unwrap();

        assert_eq!(tree.add_child(root.id(), root.id()), Err(EcError::SelfParent(root.id())));
        assert_eq!(
            tree.add_child(root.id(), leaf.id()),
            Err(EcError::AlreadyHasParent {
                child: leaf.id(),
                parent: mid.id()
            })
        );
        assert_eq!(
            tree.add_child(leaf.id(), root.id()),
            Err(EcError::TreeCycle {
                parent: leaf.id(),
                child: root.id()
            })
        );
        let missing = Id::new();
        assert_eq!(tree.add_child(root.id(), missing), Err(EcError::EntityNotFound(missing)));
        assert_eq!(tree.remove_child(root.id()), Err(EcError::NoParent(root.id())));
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    #[test]
    fn remove_child_destroys_descendants_and_keeps_child() {
        let ctx = RuntimeContext::new("tree");
        let root = spawn(&ctx);
        let mid = spawn(&ctx);
        let leaf = spawn(&ctx);
        let tree = ctx.tree();
        tree.add_child(root.id(), mid.id()).unwrap();
        tree.add_child(mid.id(), leaf.id()).unwrap();

        tree.remove_child(mid.id()).unwrap();

        assert_eq!(leaf.state(), EntityState::Death);
        assert!(mid.state() < EntityState::Leave);
        assert!(tree.parent(mid.id()).is_none());
        assert_eq!(tree.count_children(root.id()), 0);
        assert!(tree.is_empty());
    }

    #[test]
    fn removing_entity_prunes_subtree() {
        let ctx = RuntimeContext::new("tree");
        let root = spawn(&ctx);
        let mid = spawn(&ctx);
        let leaf = spawn(&ctx);
        let tree = ctx.tree();
        tree.add_child(root.id(), mid.id()).unwrap();
        tree.add_child(mid.id(), leaf.id()).unwrap();

        let removed = Rc::new(RefCell::new(Vec::new()));
        let sink = removed.clone();
        let _hook = bind(
            tree.event_remove_child(),
            Rc::new(move |p: &Rc<Entity>, c: &Rc<Entity>| sink.borrow_mut().push((p.id(), c.id())))
                as Rc<dyn EventEcTreeRemoveChild>,
            0,
        );

        ctx.entity_mgr().remove_entity(mid.id()).unwrap();

        assert_eq!(*removed.borrow(), [(mid.id(), leaf.id()), (root.id(), mid.id())]);
        assert_eq!(ctx.entity_mgr().count(), 1);
        assert!(tree.is_empty());
        assert!(leaf.tree().parent().is_none());
    }
}
