//! Refetch manager
//!
//! Resolves an object the caller already holds (possibly stale, possibly
//! detached) to the instance the engine tracks for the same primary key.
//!
//! ## Logging Ownership
//!
//! Every public operation emits `start`, then `end` or `end_error`. The
//! engine underneath logs its own internals at debug level only.

use std::any::Any;
use std::rc::Rc;
use std::time::Instant;

use crate::collection::LazyCollection;
use crate::criteria::Criteria;
use crate::engine::{metadata_of, PersistenceEngine};
use crate::errors::{EngineError, EntityNotFoundError, RefetchError, Result};
use crate::model::{downcast, AnyEntity, ClassMetadata, EntityKey, Managed};
use crate::{log_op_end, log_op_error, log_op_start};

/// Re-fetches objects through a persistence engine
///
/// Holds nothing but the engine handle, so it can be created per call site or
/// shared freely. It never writes or flushes.
pub struct RefetchManager<E: PersistenceEngine> {
    engine: E,
}

impl<E: PersistenceEngine> RefetchManager<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Same as [`RefetchManager::new`]
    pub fn create(engine: E) -> Self {
        Self::new(engine)
    }

    /// The engine this manager was built with
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Return the managed instance for the key of `object`
    ///
    /// If `object` is itself the tracked instance, the same handle comes
    /// back. Otherwise the engine's `find` resolves the key, loading the
    /// record when it is not tracked. `object` is never modified.
    ///
    /// # Errors
    ///
    /// - `EntityNotFound` when no record exists for the key
    /// - `ObjectBorrowed` when `object` is mutably borrowed by the caller
    /// - `Engine` for mapping, type or storage failures, unchanged
    pub fn get_object<T: Any>(&self, object: &Managed<T>) -> Result<Managed<T>> {
        let type_name = std::any::type_name::<T>();
        log_op_start!("get_object", entity_type = type_name);
        let start = Instant::now();

        let managed = self.get_object_impl(object).map_err(|e| {
            log_op_error!(
                "get_object",
                e,
                duration_ms = start.elapsed().as_millis() as u64,
                entity_type = type_name
            );
            e
        })?;

        log_op_end!(
            "get_object",
            duration_ms = start.elapsed().as_millis() as u64,
            entity_type = type_name,
            refetched = !Rc::ptr_eq(&managed, object)
        );

        Ok(managed)
    }

    /// Replace the caller's handle with the managed instance
    ///
    /// On error `object` is left as it was.
    ///
    /// # Errors
    ///
    /// Same as [`RefetchManager::get_object`].
    pub fn refetch_object<T: Any>(&self, object: &mut Managed<T>) -> Result<()> {
        let managed = self.get_object(object)?;
        *object = managed;
        Ok(())
    }

    /// Lazily select the instances of `T` matching `criteria`
    ///
    /// Nothing is read from the backing store until the collection is
    /// enumerated; `count()` on the result may avoid hydration altogether if
    /// the engine supports it.
    ///
    /// # Errors
    ///
    /// `Engine` when `T` is not mapped or the criteria are rejected. Storage
    /// and type errors surface on enumeration.
    pub fn get_collection_from_criteria<T: Any>(
        &self,
        criteria: Criteria,
    ) -> Result<LazyCollection<Managed<T>>> {
        let type_name = std::any::type_name::<T>();
        log_op_start!("get_collection_from_criteria", entity_type = type_name);
        let start = Instant::now();

        let collection = self
            .get_collection_from_criteria_impl::<T>(&criteria)
            .map_err(|e| {
                log_op_error!(
                    "get_collection_from_criteria",
                    e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    entity_type = type_name
                );
                e
            })?;

        log_op_end!(
            "get_collection_from_criteria",
            duration_ms = start.elapsed().as_millis() as u64,
            entity_type = type_name,
            filters = criteria.filters().len()
        );

        Ok(collection)
    }

    fn get_object_impl<T: Any>(&self, object: &Managed<T>) -> Result<Managed<T>> {
        let metadata = metadata_of::<T, _>(&self.engine)?;
        let key = self.key_of(&metadata, object)?;

        tracing::debug!(
            entity_type = metadata.name(),
            entity_key = %key,
            "resolving managed instance"
        );

        let found = self
            .engine
            .find(&metadata, &key)?
            .ok_or_else(|| EntityNotFoundError::from_type_and_key(metadata.name(), key))?;

        typed(&metadata, found).map_err(RefetchError::from)
    }

    fn key_of<T: Any>(&self, metadata: &ClassMetadata, object: &Managed<T>) -> Result<EntityKey> {
        let borrowed = object
            .try_borrow()
            .map_err(|_| RefetchError::ObjectBorrowed {
                type_name: metadata.name().to_string(),
            })?;
        let instance: &dyn Any = &*borrowed;
        Ok(self.engine.identifier_values(metadata, instance)?)
    }

    fn get_collection_from_criteria_impl<T: Any>(
        &self,
        criteria: &Criteria,
    ) -> Result<LazyCollection<Managed<T>>> {
        let metadata = metadata_of::<T, _>(&self.engine)?;
        let untyped = self.engine.matching(&metadata, criteria)?;
        Ok(untyped.map(move |entity| typed::<T>(&metadata, entity))?)
    }
}

fn typed<T: Any>(
    metadata: &ClassMetadata,
    entity: AnyEntity,
) -> std::result::Result<Managed<T>, EngineError> {
    downcast::<T>(entity).ok_or_else(|| EngineError::type_mismatch(metadata.name()))
}
