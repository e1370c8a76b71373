//! Component library and entity prototypes.
//!
//! A [`Registry`] is built once, shared by `Arc` between runtimes, and maps
//! component names to factories and prototype names to component lists.
//! Factories run on the runtime thread that builds the entity.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::component::Component;
use crate::entity::{Attachment, Entity, EntityOptions};
use crate::error::EcError;

/// Creates a fresh, unattached component.
pub type ComponentFactory = Arc<dyn Fn() -> Rc<dyn Component> + Send + Sync>;

/// One component slot of a [`Prototype`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrototypeComponent {
    pub name: String,
    /// Fixed components cannot be removed from the built entity.
    pub fixed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prototype {
    pub name: String,
    pub components: Vec<PrototypeComponent>,
}

#[derive(Default)]
pub struct Registry {
    components: RwLock<HashMap<String, ComponentFactory>>,
    prototypes: RwLock<HashMap<String, Prototype>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_component(
        &self,
        name: &str,
        factory: impl Fn() -> Rc<dyn Component> + Send + Sync + 'static,
    ) -> Result<(), EcError> {
        let mut components = self.components.write();
        if components.contains_key(name) {
            return Err(EcError::ComponentDeclared(name.to_string()));
        }
        components.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    pub fn is_component_declared(&self, name: &str) -> bool {
        self.components.read().contains_key(name)
    }

    pub fn create_component(&self, name: &str) -> Result<Rc<dyn Component>, EcError> {
        let factory = self
            .components
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EcError::UnknownComponent(name.to_string()))?;
        Ok(factory())
    }

    /// Declares a prototype from `(component, fixed)` pairs. Every component
    /// must already be declared.
    pub fn declare_prototype(&self, name: &str, components: &[(&str, bool)]) -> Result<(), EcError> {
        for (component, _) in components {
            if !self.is_component_declared(component) {
                return Err(EcError::UnknownComponent(component.to_string()));
            }
        }
        let mut prototypes = self.prototypes.write();
        if prototypes.contains_key(name) {
            return Err(EcError::PrototypeDeclared(name.to_string()));
        }
        prototypes.insert(
            name.to_string(),
            Prototype {
                name: name.to_string(),
                components: components
                    .iter()
                    .map(|(component, fixed)| PrototypeComponent {
                        name: component.to_string(),
                        fixed: *fixed,
                    })
                    .collect(),
            },
        );
        Ok(())
    }

    pub fn prototype(&self, name: &str) -> Option<Prototype> {
        self.prototypes.read().get(name).cloned()
    }

    /// Builds an entity from `prototype`. The entity is not added to any
    /// context.
    pub fn build_entity(&self, prototype: &str, options: EntityOptions) -> Result<Rc<Entity>, EcError> {
        let proto = self
            .prototype(prototype)
            .ok_or_else(|| EcError::UnknownPrototype(prototype.to_string()))?;
        let batch = proto
            .components
            .iter()
            .map(|slot| {
                Ok(Attachment {
                    name: slot.name.clone(),
                    component: self.create_component(&slot.name)?,
                    fixed: slot.fixed,
                })
            })
            .collect::<Result<Vec<_>, EcError>>()?;

        let entity = Entity::new(options.prototype(proto.name));
        if !batch.is_empty() {
            entity.attach(batch)?;
        }
        Ok(entity)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.components.read().len())
            .field("prototypes", &self.prototypes.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentCore;

    #[derive(Default)]
    struct Health {
        core: ComponentCore,
    }

    impl Component for Health {
        fn core(&self) -> &ComponentCore {
            &self.core
        }
    }

    fn registry() -> Registry {
        let registry = Registry::new();
        registry
            .declare_component("health", || Rc::new(Health::default()) as Rc<dyn Component>)
            .unwrap();
        registry
            .declare_component("armor", || Rc::new(Health::default()) as Rc<dyn Component>)
            .unwrap();
        registry
    }

    #[test]
    fn declare_twice_fails() {
        let registry = registry();
        assert_eq!(
            registry.declare_component("health", || Rc::new(Health::default()) as Rc<dyn Component>),
            Err(EcError::ComponentDeclared("health".into()))
        );
        registry.declare_prototype("orc", &[("health", true)]).unwrap();
        assert_eq!(
            registry.declare_prototype("orc", &[]),
            Err(EcError::PrototypeDeclared("orc".into()))
        );
    }

    #[test]
    fn prototype_requires_declared_components() {
        let registry = registry();
        assert_eq!(
            registry.declare_prototype("ghost", &[("ectoplasm", false)]),
            Err(EcError::UnknownComponent("ectoplasm".into()))
        );
        assert!(registry.create_component("ectoplasm").is_err());
    }

    #[test]
    fn build_entity_attaches_prototype_components() {
        let registry = registry();
        registry
            .declare_prototype("orc", &[("health", true), ("armor", false)])
            .unwrap();

        let orc = registry.build_entity("orc", EntityOptions::default()).unwrap();
        assert_eq!(orc.prototype(), Some("orc"));
        assert_eq!(orc.count_components(), 2);
        assert!(orc.get_component("health").unwrap().core().is_fixed());
        assert!(!orc.get_component("armor").unwrap().core().is_fixed());

        orc.remove_component("health").unwrap();
        orc.remove_component("armor").unwrap();
        assert_eq!(orc.count_components(), 1);

        assert_eq!(
            registry.build_entity("elf", EntityOptions::default()).unwrap_err(),
            EcError::UnknownPrototype("elf".into())
        );
    }
}
