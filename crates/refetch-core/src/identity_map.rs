//! Identity map and key-set snapshots
//!
//! `IdentityMap` is the shape in which an engine exposes its tracking
//! session: type name -> serialized key -> live instance. Iteration order is
//! deterministic (sorted by type name, then by key).
//!
//! `KeySet` is the key membership of an identity map frozen at one instant.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{same_instance, AnyEntity};

/// Tracked instances by type name and serialized key
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    entries: BTreeMap<String, BTreeMap<String, AnyEntity>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register an instance under (type, key)
    ///
    /// Returns the instance previously registered under that pair, if any.
    pub fn insert(
        &mut self,
        type_name: impl Into<String>,
        id_hash: impl Into<String>,
        entity: AnyEntity,
    ) -> Option<AnyEntity> {
        self.entries
            .entry(type_name.into())
            .or_default()
            .insert(id_hash.into(), entity)
    }

    pub fn get(&self, type_name: &str, id_hash: &str) -> Option<&AnyEntity> {
        self.entries.get(type_name)?.get(id_hash)
    }

    pub fn contains(&self, type_name: &str, id_hash: &str) -> bool {
        self.get(type_name, id_hash).is_some()
    }

    /// Remove the entry for (type, key)
    pub fn remove(&mut self, type_name: &str, id_hash: &str) -> Option<AnyEntity> {
        let bucket = self.entries.get_mut(type_name)?;
        let removed = bucket.remove(id_hash);
        if bucket.is_empty() {
            self.entries.remove(type_name);
        }
        removed
    }

    /// Locate an instance by identity
    ///
    /// Returns its (type, key) pair if the instance is the one registered.
    pub fn position_of(&self, entity: &AnyEntity) -> Option<(&str, &str)> {
        self.iter()
            .find(|(_, _, tracked)| same_instance(tracked, entity))
            .map(|(type_name, id_hash, _)| (type_name, id_hash))
    }

    pub fn contains_instance(&self, entity: &AnyEntity) -> bool {
        self.position_of(entity).is_some()
    }

    /// Remove an instance by identity
    ///
    /// A different instance registered under the same key is left alone.
    pub fn remove_instance(&mut self, entity: &AnyEntity) -> bool {
        let position = self
            .position_of(entity)
            .map(|(type_name, id_hash)| (type_name.to_string(), id_hash.to_string()));
        match position {
            Some((type_name, id_hash)) => self.remove(&type_name, &id_hash).is_some(),
            None => false,
        }
    }

    /// Number of tracked instances across all types
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tracked instances of one type
    pub fn len_of(&self, type_name: &str) -> usize {
        self.entries.get(type_name).map_or(0, BTreeMap::len)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate (type, key, instance) triples
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &AnyEntity)> {
        self.entries.iter().flat_map(|(type_name, bucket)| {
            bucket
                .iter()
                .map(move |(id_hash, entity)| (type_name.as_str(), id_hash.as_str(), entity))
        })
    }

    /// Freeze the current key membership
    pub fn key_set(&self) -> KeySet {
        let mut keys = KeySet::new();
        for (type_name, id_hash, _) in self.iter() {
            keys.insert(type_name, id_hash);
        }
        keys
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Key membership of a tracking session at one instant
///
/// A type that was not tracked at all and a type whose key set is empty are
/// the same thing: nothing of that type was tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    keys: BTreeMap<String, BTreeSet<String>>,
}

impl KeySet {
    pub fn new() -> Self {
        Self {
            keys: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, type_name: impl Into<String>, id_hash: impl Into<String>) -> bool {
        self.keys
            .entry(type_name.into())
            .or_default()
            .insert(id_hash.into())
    }

    pub fn contains(&self, type_name: &str, id_hash: &str) -> bool {
        self.keys
            .get(type_name)
            .is_some_and(|ids| ids.contains(id_hash))
    }

    pub fn len(&self) -> usize {
        self.keys.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys.iter().flat_map(|(type_name, ids)| {
            ids.iter()
                .map(move |id_hash| (type_name.as_str(), id_hash.as_str()))
        })
    }
}
