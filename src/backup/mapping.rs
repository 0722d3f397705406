//! Import-scoped identifier mapping
//!
//! Records which internal row id each archived public id ended up with, so
//! later entity types can translate their `<relation>_public_id` fields.

use std::collections::HashMap;

use crate::registry::EntityType;

/// `(entity type, public id) -> internal id`, fresh for every import run
#[derive(Debug, Default)]
pub struct IdMapping {
    ids: HashMap<(EntityType, String), i64>,
}

impl IdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping. The first write for a key wins; returns whether
    /// this call stored it.
    pub fn set(&mut self, entity_type: EntityType, public_id: &str, internal_id: i64) -> bool {
        use std::collections::hash_map::Entry;

        match self.ids.entry((entity_type, public_id.to_string())) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(internal_id);
                true
            }
        }
    }

    pub fn get(&self, entity_type: EntityType, public_id: &str) -> Option<i64> {
        self.ids.get(&(entity_type, public_id.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
