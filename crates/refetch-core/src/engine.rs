//! Contract required from the persistence engine
//!
//! The managers in this crate only talk to the engine through these traits.
//! An engine owns its identity map; the managers read a copy of it and ask the
//! engine to find or detach instances.

use std::any::{Any, TypeId};
use std::rc::Rc;

use crate::collection::LazyCollection;
use crate::criteria::Criteria;
use crate::errors::EngineError;
use crate::identity_map::IdentityMap;
use crate::model::{AnyEntity, ClassMetadata, EntityKey};

/// Runtime introspection of mapped entity types
pub trait EntityMetadata {
    /// Resolve the metadata of a mapped type
    ///
    /// # Errors
    ///
    /// Returns a `Mapping` error when the type is not a registered entity.
    fn class_metadata(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<ClassMetadata, EngineError>;

    /// Extract the primary-key values of an instance of the described type
    ///
    /// # Errors
    ///
    /// Returns a `TypeMismatch` error when `instance` is not of the type the
    /// metadata describes.
    fn identifier_values(
        &self,
        metadata: &ClassMetadata,
        instance: &dyn Any,
    ) -> Result<EntityKey, EngineError>;
}

/// Tracking session of a persistence engine
pub trait PersistenceEngine: EntityMetadata {
    /// Find the managed instance for a key
    ///
    /// Checks the identity map first and only reads the backing store when
    /// the key is not tracked. A freshly loaded instance is registered.
    ///
    /// # Errors
    ///
    /// Propagates backing-store failures. A missing record is `Ok(None)`.
    fn find(
        &self,
        metadata: &ClassMetadata,
        key: &EntityKey,
    ) -> Result<Option<AnyEntity>, EngineError>;

    /// Lazily query the instances of a type matching `criteria`
    ///
    /// # Errors
    ///
    /// Returns an error if the criteria cannot be translated; storage errors
    /// surface when the collection is enumerated.
    fn matching(
        &self,
        metadata: &ClassMetadata,
        criteria: &Criteria,
    ) -> Result<LazyCollection<AnyEntity>, EngineError>;

    /// Copy of the current identity map
    fn identity_map(&self) -> IdentityMap;

    /// Stop tracking an instance; its backing record is untouched
    ///
    /// # Errors
    ///
    /// Engine specific; detaching an untracked instance is not an error.
    fn detach(&self, entity: &AnyEntity) -> Result<(), EngineError>;

    /// Stop tracking every instance
    fn clear(&self);
}

impl<E: EntityMetadata + ?Sized> EntityMetadata for &E {
    fn class_metadata(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<ClassMetadata, EngineError> {
        (**self).class_metadata(type_id, type_name)
    }

    fn identifier_values(
        &self,
        metadata: &ClassMetadata,
        instance: &dyn Any,
    ) -> Result<EntityKey, EngineError> {
        (**self).identifier_values(metadata, instance)
    }
}

impl<E: PersistenceEngine + ?Sized> PersistenceEngine for &E {
    fn find(
        &self,
        metadata: &ClassMetadata,
        key: &EntityKey,
    ) -> Result<Option<AnyEntity>, EngineError> {
        (**self).find(metadata, key)
    }

    fn matching(
        &self,
        metadata: &ClassMetadata,
        criteria: &Criteria,
    ) -> Result<LazyCollection<AnyEntity>, EngineError> {
        (**self).matching(metadata, criteria)
    }

    fn identity_map(&self) -> IdentityMap {
        (**self).identity_map()
    }

    fn detach(&self, entity: &AnyEntity) -> Result<(), EngineError> {
        (**self).detach(entity)
    }

    fn clear(&self) {
        (**self).clear()
    }
}

impl<E: EntityMetadata + ?Sized> EntityMetadata for Rc<E> {
    fn class_metadata(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<ClassMetadata, EngineError> {
        (**self).class_metadata(type_id, type_name)
    }

    fn identifier_values(
        &self,
        metadata: &ClassMetadata,
        instance: &dyn Any,
    ) -> Result<EntityKey, EngineError> {
        (**self).identifier_values(metadata, instance)
    }
}

impl<E: PersistenceEngine + ?Sized> PersistenceEngine for Rc<E> {
    fn find(
        &self,
        metadata: &ClassMetadata,
        key: &EntityKey,
    ) -> Result<Option<AnyEntity>, EngineError> {
        (**self).find(metadata, key)
    }

    fn matching(
        &self,
        metadata: &ClassMetadata,
        criteria: &Criteria,
    ) -> Result<LazyCollection<AnyEntity>, EngineError> {
        (**self).matching(metadata, criteria)
    }

    fn identity_map(&self) -> IdentityMap {
        (**self).identity_map()
    }

    fn detach(&self, entity: &AnyEntity) -> Result<(), EngineError> {
        (**self).detach(entity)
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// Resolve the metadata of `T` through an engine
pub(crate) fn metadata_of<T: Any, E: EntityMetadata + ?Sized>(
    engine: &E,
) -> Result<ClassMetadata, EngineError> {
    engine.class_metadata(TypeId::of::<T>(), std::any::type_name::<T>())
}
