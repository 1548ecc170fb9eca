//! Unit of work
//!
//! Tracks the managed instances of one `EntityManager` and the writes
//! scheduled for the next flush.

use refetch_core::model::same_instance;
use refetch_core::{AnyEntity, IdentityMap};

/// Identity map plus scheduled insertions and deletions
#[derive(Debug, Default)]
pub struct UnitOfWork {
    identity_map: IdentityMap,
    insertions: Vec<(String, AnyEntity)>,
    deletions: Vec<(String, AnyEntity)>,
    queries: usize,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    pub fn get(&self, type_name: &str, id_hash: &str) -> Option<AnyEntity> {
        self.identity_map.get(type_name, id_hash).cloned()
    }

    /// Track `entity` unless another instance already holds the key
    ///
    /// Returns the instance tracked for the key afterwards.
    pub fn register(&mut self, type_name: &str, id_hash: &str, entity: AnyEntity) -> AnyEntity {
        if let Some(existing) = self.identity_map.get(type_name, id_hash) {
            return existing.clone();
        }
        self.identity_map.insert(type_name, id_hash, entity.clone());
        entity
    }

    pub fn contains_instance(&self, entity: &AnyEntity) -> bool {
        self.identity_map.contains_instance(entity)
    }

    pub fn schedule_insertion(&mut self, type_name: &str, entity: AnyEntity) {
        self.insertions.push((type_name.to_string(), entity));
    }

    /// Schedule a delete; a pending insertion of the same instance is
    /// cancelled instead
    pub fn schedule_deletion(&mut self, type_name: &str, entity: AnyEntity) {
        let pending = self.insertions.len();
        self.insertions.retain(|(_, e)| !same_instance(e, &entity));
        if self.insertions.len() < pending {
            self.identity_map.remove_instance(&entity);
            return;
        }
        if !self.deletions.iter().any(|(_, e)| same_instance(e, &entity)) {
            self.deletions.push((type_name.to_string(), entity));
        }
    }

    pub fn is_scheduled_for_deletion(&self, entity: &AnyEntity) -> bool {
        self.deletions.iter().any(|(_, e)| same_instance(e, entity))
    }

    pub fn is_scheduled_for_insertion(&self, entity: &AnyEntity) -> bool {
        self.insertions.iter().any(|(_, e)| same_instance(e, entity))
    }

    pub fn insertions(&self) -> &[(String, AnyEntity)] {
        &self.insertions
    }

    pub fn deletions(&self) -> &[(String, AnyEntity)] {
        &self.deletions
    }

    /// Forget scheduled writes after a successful flush and untrack deleted
    /// instances
    pub fn commit(&mut self) {
        self.insertions.clear();
        for (_, entity) in std::mem::take(&mut self.deletions) {
            self.identity_map.remove_instance(&entity);
        }
    }

    /// Stop tracking one instance and drop its scheduled writes
    pub fn detach(&mut self, entity: &AnyEntity) -> bool {
        self.insertions.retain(|(_, e)| !same_instance(e, entity));
        self.deletions.retain(|(_, e)| !same_instance(e, entity));
        self.identity_map.remove_instance(entity)
    }

    pub fn clear(&mut self) {
        self.identity_map.clear();
        self.insertions.clear();
        self.deletions.clear();
    }

    pub fn record_query(&mut self) {
        self.queries += 1;
    }

    pub fn query_count(&self) -> usize {
        self.queries
    }
}
