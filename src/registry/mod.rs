//! Entity transformer registry
//!
//! The single place entity types are registered with the engines. Export
//! and import both walk [`EntityType::ALL`] and look each type up here.

pub mod entity;
pub mod transformer;

use std::collections::BTreeMap;

pub use entity::{EntitySpec, EntityType, ForeignKey, Owner};
pub use transformer::{ImportRow, TableTransformer, Transformer};

/// Transformers keyed by entity type
pub struct Registry {
    transformers: BTreeMap<EntityType, Box<dyn Transformer>>,
}

impl Registry {
    /// Registry with a table transformer for every managed type
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for entity_type in EntityType::ALL {
            registry.register(Box::new(TableTransformer::new(entity_type)));
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            transformers: BTreeMap::new(),
        }
    }

    /// Register (or replace) the transformer for its entity type
    pub fn register(&mut self, transformer: Box<dyn Transformer>) {
        self.transformers
            .insert(transformer.entity_type(), transformer);
    }

    pub fn transformer_for(&self, entity_type: EntityType) -> Option<&dyn Transformer> {
        self.transformers.get(&entity_type).map(|t| t.as_ref())
    }

    /// Registered types in dependency order
    pub fn entity_types(&self) -> Vec<EntityType> {
        EntityType::ALL
            .into_iter()
            .filter(|t| self.transformers.contains_key(t))
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registers_every_type() {
        let registry = Registry::standard();
        for entity_type in EntityType::ALL {
            let transformer = registry.transformer_for(entity_type).unwrap();
            assert_eq!(transformer.entity_type(), entity_type);
        }
        assert_eq!(registry.entity_types(), EntityType::ALL.to_vec());
    }

    #[test]
    fn test_missing_transformer() {
        let mut registry = Registry::empty();
        registry.register(Box::new(TableTransformer::new(EntityType::Accounts)));
        assert!(registry.transformer_for(EntityType::Invoices).is_none());
        assert_eq!(registry.entity_types(), vec![EntityType::Accounts]);
    }
}
