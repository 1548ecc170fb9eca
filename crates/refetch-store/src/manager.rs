//! Entity manager
//!
//! A cheap-clone handle to one SQLite connection, a registry of entity
//! mappings and the unit of work holding the identity map. Implements the
//! `PersistenceEngine` contract so the refetch and snapshot managers can run
//! on top of it.
//!
//! Lazy collections handed out by the manager keep only a weak reference to
//! it: enumerating one after every handle is dropped fails with `Closed`.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use refetch_core::model::{downcast, erase};
use refetch_core::{
    AnyEntity, ClassMetadata, Criteria, EngineError, EntityKey, EntityMetadata, ErrorKind,
    IdentityMap, LazyCollection, Managed, PersistenceEngine, Value,
};
use refetch_core::{log_op_end, log_op_error, log_op_start};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};

use crate::config::StoreConfig;
use crate::db;
use crate::errors::{from_rusqlite, Result};
use crate::mapping::{to_sql, EntityEntry, EntityMapping, JoinRows, Record};
use crate::migrations::{self, Migration};
use crate::query::{self, SelectQuery};
use crate::unit_of_work::UnitOfWork;

#[derive(Default)]
struct Registry {
    by_type: HashMap<TypeId, EntityEntry>,
    by_name: HashMap<String, TypeId>,
}

struct Inner {
    conn: Connection,
    registry: RefCell<Registry>,
    uow: RefCell<UnitOfWork>,
    // (entity name, id hash) of rows whose hydration is in progress
    loading: RefCell<BTreeSet<(String, String)>>,
}

/// Handle to a tracking session over one SQLite database
#[derive(Clone)]
pub struct EntityManager {
    inner: Rc<Inner>,
}

/// Rows written by one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Join rows written for initialised to-many associations
    pub linked: usize,
}

impl EntityManager {
    /// Open the database described by `config`
    ///
    /// # Errors
    ///
    /// `Persistence` when the database cannot be opened or configured.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = db::open_configured(&config.database)?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// `Persistence` when SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    /// Wrap an already configured connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            inner: Rc::new(Inner {
                conn,
                registry: RefCell::new(Registry::default()),
                uow: RefCell::new(UnitOfWork::new()),
                loading: RefCell::new(BTreeSet::new()),
            }),
        }
    }

    /// Make `T` known to this manager
    ///
    /// Registering the same type twice is a no-op.
    ///
    /// # Errors
    ///
    /// `Mapping` when another type already uses `T::NAME`.
    pub fn register<T: EntityMapping>(&self) -> Result<()> {
        let mut registry = self.inner.registry.borrow_mut();
        if let Some(existing) = registry.by_name.get(T::NAME) {
            if *existing == TypeId::of::<T>() {
                return Ok(());
            }
            return Err(EngineError::new(ErrorKind::Mapping)
                .with_op("register")
                .with_entity_type(T::NAME)
                .with_message(format!("Entity name '{}' is already registered", T::NAME)));
        }
        registry.by_name.insert(T::NAME.to_string(), TypeId::of::<T>());
        registry.by_type.insert(TypeId::of::<T>(), EntityEntry::of::<T>());
        tracing::debug!(entity_type = T::NAME, table = T::TABLE, "registered entity");
        Ok(())
    }

    /// Apply pending schema migrations
    ///
    /// # Errors
    ///
    /// See [`migrations::apply_migrations`].
    pub fn apply_migrations(&self, migrations: &[Migration]) -> Result<usize> {
        migrations::apply_migrations(&self.inner.conn, migrations)
    }

    /// The underlying connection, for fixtures and raw SQL
    pub fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    /// Find the managed instance of `T` for `key`
    ///
    /// The identity map is consulted first; the database is only queried on
    /// a miss.
    ///
    /// # Errors
    ///
    /// `Mapping` when `T` is not registered, `Persistence` on SQLite errors.
    pub fn find<T: Any>(&self, key: &EntityKey) -> Result<Option<Managed<T>>> {
        let entry = self.entry_for::<T>()?;
        match self.find_erased(&entry, key)? {
            Some(entity) => typed::<T>(&entry, entity).map(Some),
            None => Ok(None),
        }
    }

    /// Load every instance of `T` matching `criteria` now
    ///
    /// # Errors
    ///
    /// As [`EntityManager::matching`], plus load failures.
    pub fn find_by<T: Any>(&self, criteria: &Criteria) -> Result<Vec<Managed<T>>> {
        self.matching::<T>(criteria)?.to_vec()
    }

    /// Lazy collection of the instances of `T` matching `criteria`
    ///
    /// No query runs until the collection is enumerated; `count()` runs a
    /// `COUNT(*)` without hydrating anything.
    ///
    /// # Errors
    ///
    /// `Mapping` for unregistered types, `InvalidCriteria` for unknown fields.
    pub fn matching<T: Any>(&self, criteria: &Criteria) -> Result<LazyCollection<Managed<T>>> {
        let entry = self.entry_for::<T>()?;
        let query = query::compile(&entry, criteria)?;
        self.lazy(entry.clone(), query)
            .map(move |entity| typed::<T>(&entry, entity))
    }

    /// Lazy to-many association through a join table
    ///
    /// Selects the `T` rows whose identifier equals `join_table.target_column`
    /// for join rows where `owner_column = owner_value`.
    ///
    /// # Errors
    ///
    /// `Mapping` when `T` is not registered or has a composite identifier.
    pub fn many_to_many<T: Any>(
        &self,
        join_table: &'static str,
        owner_column: &'static str,
        owner_value: impl Into<Value>,
        target_column: &'static str,
    ) -> Result<LazyCollection<Managed<T>>> {
        let entry = self.entry_for::<T>()?;
        let query = query::many_to_many(
            &entry,
            join_table,
            owner_column,
            &owner_value.into(),
            target_column,
        )?;
        self.lazy(entry.clone(), query)
            .map(move |entity| typed::<T>(&entry, entity))
    }

    /// Start tracking a new instance; it is inserted on the next flush
    ///
    /// Persisting an instance that is already managed is a no-op.
    ///
    /// # Errors
    ///
    /// `Mapping` for unregistered types, `ObjectBorrowed` when the instance
    /// is mutably borrowed, `Persistence` when another instance holds the key.
    pub fn persist<T: EntityMapping>(&self, entity: &Managed<T>) -> Result<()> {
        let entry = self.entry_for::<T>()?;
        let key = entity
            .try_borrow()
            .map_err(|_| borrowed(T::NAME, "persist"))?
            .identifier();
        let id_hash = key.id_hash();
        let erased = erase(entity);

        let mut uow = self.inner.uow.borrow_mut();
        if uow.contains_instance(&erased) {
            return Ok(());
        }
        if uow.get(entry.name(), &id_hash).is_some() {
            return Err(EngineError::persistence(format!(
                "Another instance of '{}' with {} is already managed",
                T::NAME,
                key.describe()
            ))
            .with_op("persist")
            .with_entity_type(T::NAME));
        }
        uow.register(entry.name(), &id_hash, erased.clone());
        uow.schedule_insertion(entry.name(), erased);
        Ok(())
    }

    /// Schedule a managed instance for deletion on the next flush
    ///
    /// # Errors
    ///
    /// `Persistence` when the instance is not managed by this manager.
    pub fn remove<T: EntityMapping>(&self, entity: &Managed<T>) -> Result<()> {
        let erased = erase(entity);
        let mut uow = self.inner.uow.borrow_mut();
        if !uow.contains_instance(&erased) {
            return Err(EngineError::persistence("Detached entity cannot be removed")
                .with_op("remove")
                .with_entity_type(T::NAME));
        }
        uow.schedule_deletion(T::NAME, erased);
        Ok(())
    }

    /// Write scheduled insertions, the state of every managed instance and
    /// scheduled deletions in one transaction
    ///
    /// Join rows are rewritten only for associations the instance reports
    /// through [`EntityMapping::join_rows`].
    ///
    /// # Errors
    ///
    /// `Persistence` on SQLite errors (nothing is written), `ObjectBorrowed`
    /// when a managed instance is mutably borrowed.
    pub fn flush(&self) -> Result<FlushSummary> {
        log_op_start!("flush");
        let start = std::time::Instant::now();

        let summary = self.flush_impl().map_err(|e| {
            log_op_error!("flush", e, duration_ms = start.elapsed().as_millis() as u64);
            e
        })?;

        log_op_end!(
            "flush",
            duration_ms = start.elapsed().as_millis() as u64,
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            linked = summary.linked
        );
        Ok(summary)
    }

    /// Stop tracking an instance without touching its row
    pub fn detach<T: Any>(&self, entity: &Managed<T>) {
        self.inner.uow.borrow_mut().detach(&erase(entity));
    }

    /// True when `entity` is the managed instance for its key
    pub fn contains<T: Any>(&self, entity: &Managed<T>) -> bool {
        self.inner.uow.borrow().contains_instance(&erase(entity))
    }

    /// Stop tracking every instance and drop scheduled writes
    pub fn clear(&self) {
        self.inner.uow.borrow_mut().clear();
        tracing::debug!("cleared tracking session");
    }

    /// Number of managed instances
    pub fn tracked_count(&self) -> usize {
        self.inner.uow.borrow().identity_map().len()
    }

    /// Number of SELECT statements issued so far
    pub fn query_count(&self) -> usize {
        self.inner.uow.borrow().query_count()
    }

    fn entry_for<T: Any>(&self) -> Result<EntityEntry> {
        self.inner
            .registry
            .borrow()
            .by_type
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| EngineError::mapping(std::any::type_name::<T>()))
    }

    fn entry_named(&self, name: &str) -> Result<EntityEntry> {
        let registry = self.inner.registry.borrow();
        registry
            .by_name
            .get(name)
            .and_then(|type_id| registry.by_type.get(type_id))
            .cloned()
            .ok_or_else(|| EngineError::mapping(name))
    }

    fn find_erased(&self, entry: &EntityEntry, key: &EntityKey) -> Result<Option<AnyEntity>> {
        let id_hash = key.id_hash();
        if let Some(tracked) = self.inner.uow.borrow().get(entry.name(), &id_hash) {
            return Ok(Some(tracked));
        }

        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for field in entry.fields.iter().filter(|f| f.id) {
            let Some(value) = key.get(field.field) else {
                return Ok(None);
            };
            conditions.push(format!("t.{} = ?", field.column));
            params.push(to_sql(value));
        }
        let sql = format!(
            "SELECT {} FROM {} t WHERE {}",
            entry.select_list("t"),
            entry.table,
            conditions.join(" AND ")
        );

        let record = self.fetch_records(entry, &sql, &params)?.into_iter().next();
        tracing::debug!(
            entity_type = entry.name(),
            entity_key = %key,
            found = record.is_some(),
            "loaded by primary key"
        );
        record.map(|r| self.load_record(entry, r)).transpose()
    }

    fn fetch_records(
        &self,
        entry: &EntityEntry,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Record>> {
        self.inner.uow.borrow_mut().record_query();
        let mut stmt = self.inner.conn.prepare(sql).map_err(from_rusqlite)?;
        let records = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Record::from_row(entry.table, entry.fields, row)
            })
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        Ok(records)
    }

    fn count_rows(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.inner.uow.borrow_mut().record_query();
        let count: i64 = self
            .inner
            .conn
            .query_row(sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(from_rusqlite)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Turn a row into the managed instance for its key
    ///
    /// A row whose key is already tracked yields the tracked instance; its
    /// in-memory state is not overwritten. Reaching a row again through eager
    /// associations while it is still hydrating is a `Mapping` error.
    fn load_record(&self, entry: &EntityEntry, record: Record) -> Result<AnyEntity> {
        let key = record.key(entry.fields)?;
        let id_hash = key.id_hash();
        if let Some(tracked) = self.inner.uow.borrow().get(entry.name(), &id_hash) {
            return Ok(tracked);
        }

        let loading_key = (entry.name().to_string(), id_hash.clone());
        if !self.inner.loading.borrow_mut().insert(loading_key.clone()) {
            return Err(EngineError::new(ErrorKind::Mapping)
                .with_op("hydrate")
                .with_entity_type(entry.name())
                .with_message(format!(
                    "Eager association cycle: '{}' for IDs {} was reached again while hydrating",
                    entry.name(),
                    key.describe()
                )));
        }
        let hydrated = (entry.hydrate)(&record, self);
        self.inner.loading.borrow_mut().remove(&loading_key);

        let entity = hydrated?;
        Ok(self
            .inner
            .uow
            .borrow_mut()
            .register(entry.name(), &id_hash, entity))
    }

    fn lazy(&self, entry: EntityEntry, query: SelectQuery) -> LazyCollection<AnyEntity> {
        let SelectQuery {
            sql,
            count_sql,
            params,
        } = query;
        let loader_handle = Rc::downgrade(&self.inner);
        let loader_params = params.clone();
        let counter_handle = Rc::downgrade(&self.inner);

        LazyCollection::new(move || {
            let em = upgrade(&loader_handle)?;
            em.fetch_records(&entry, &sql, &loader_params)?
                .into_iter()
                .map(|record| em.load_record(&entry, record))
                .collect()
        })
        .with_counter(move || upgrade(&counter_handle)?.count_rows(&count_sql, &params))
    }

    fn flush_impl(&self) -> Result<FlushSummary> {
        let (insertions, deletions, managed) = {
            let uow = self.inner.uow.borrow();
            let managed: Vec<(String, AnyEntity)> = uow
                .identity_map()
                .iter()
                .filter(|(_, _, e)| {
                    !uow.is_scheduled_for_insertion(e) && !uow.is_scheduled_for_deletion(e)
                })
                .map(|(type_name, _, e)| (type_name.to_string(), e.clone()))
                .collect();
            (uow.insertions().to_vec(), uow.deletions().to_vec(), managed)
        };

        let mut summary = FlushSummary::default();
        let tx = self.inner.conn.unchecked_transaction().map_err(from_rusqlite)?;

        for (type_name, entity) in &insertions {
            let entry = self.entry_named(type_name)?;
            let columns = (entry.columns_of)(entity)?;
            let names: Vec<&str> = columns.iter().map(|(c, _)| *c).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                entry.table,
                names.join(", "),
                vec!["?"; names.len()].join(", ")
            );
            tx.execute(&sql, params_from_iter(columns.iter().map(|(_, v)| to_sql(v))))
                .map_err(from_rusqlite)?;
            summary.inserted += 1;
        }

        for (type_name, entity) in &managed {
            let entry = self.entry_named(type_name)?;
            let (ids, others) = split_columns(&entry, (entry.columns_of)(entity)?);
            if others.is_empty() {
                continue;
            }
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                entry.table,
                assignments(&others, ", "),
                assignments(&ids, " AND ")
            );
            let values = others.iter().chain(ids.iter()).map(|(_, v)| to_sql(v));
            summary.updated += tx
                .execute(&sql, params_from_iter(values))
                .map_err(from_rusqlite)?;
        }

        for (type_name, entity) in insertions.iter().chain(managed.iter()) {
            let entry = self.entry_named(type_name)?;
            for join in (entry.joins_of)(entity)? {
                let targets = join
                    .targets
                    .iter()
                    .map(|target| self.join_target_value(&entry, &join, target))
                    .collect::<Result<Vec<_>>>()?;
                tx.execute(
                    &format!("DELETE FROM {} WHERE {} = ?", join.table, join.owner_column),
                    [to_sql(&join.owner)],
                )
                .map_err(from_rusqlite)?;
                let sql = format!(
                    "INSERT INTO {} ({}, {}) VALUES (?, ?)",
                    join.table, join.owner_column, join.target_column
                );
                for target in &targets {
                    tx.execute(&sql, [to_sql(&join.owner), to_sql(target)])
                        .map_err(from_rusqlite)?;
                    summary.linked += 1;
                }
            }
        }

        for (type_name, entity) in &deletions {
            let entry = self.entry_named(type_name)?;
            let (ids, _) = split_columns(&entry, (entry.columns_of)(entity)?);
            let sql = format!(
                "DELETE FROM {} WHERE {}",
                entry.table,
                assignments(&ids, " AND ")
            );
            summary.deleted += tx
                .execute(&sql, params_from_iter(ids.iter().map(|(_, v)| to_sql(v))))
                .map_err(from_rusqlite)?;
        }

        tx.commit().map_err(from_rusqlite)?;
        self.inner.uow.borrow_mut().commit();
        Ok(summary)
    }

    /// Identifier value of a join target, which must be managed
    fn join_target_value(
        &self,
        owner: &EntityEntry,
        join: &JoinRows,
        target: &AnyEntity,
    ) -> Result<Value> {
        let type_name = self
            .inner
            .uow
            .borrow()
            .identity_map()
            .position_of(target)
            .map(|(type_name, _)| type_name.to_string())
            .ok_or_else(|| {
                EngineError::persistence(format!(
                    "A new entity was found through the relationship '{}' of '{}' that was not \
                     configured to cascade persist",
                    join.table,
                    owner.name()
                ))
                .with_op("flush")
                .with_entity_type(owner.name())
            })?;
        let entry = self.entry_named(&type_name)?;
        let key = (entry.identifier_of)(target)?;
        match key.fields().collect::<Vec<_>>().as_slice() {
            [(_, value)] => Ok((*value).clone()),
            _ => Err(EngineError::new(ErrorKind::Mapping)
                .with_op("flush")
                .with_entity_type(entry.name())
                .with_message("Join targets need a single-field identifier")),
        }
    }
}

type Columns = Vec<(&'static str, Value)>;

fn split_columns(entry: &EntityEntry, columns: Columns) -> (Columns, Columns) {
    let id_columns: Vec<&str> = entry.id_columns().collect();
    columns
        .into_iter()
        .partition(|(column, _)| id_columns.contains(column))
}

fn assignments(columns: &Columns, separator: &str) -> String {
    columns
        .iter()
        .map(|(column, _)| format!("{} = ?", column))
        .collect::<Vec<_>>()
        .join(separator)
}

fn upgrade(handle: &Weak<Inner>) -> Result<EntityManager> {
    handle
        .upgrade()
        .map(|inner| EntityManager { inner })
        .ok_or_else(EngineError::closed)
}

fn typed<T: Any>(entry: &EntityEntry, entity: AnyEntity) -> Result<Managed<T>> {
    downcast::<T>(entity).ok_or_else(|| EngineError::type_mismatch(entry.name()))
}

fn borrowed(entity_type: &str, op: &str) -> EngineError {
    EngineError::new(ErrorKind::ObjectBorrowed)
        .with_op(op)
        .with_entity_type(entity_type)
        .with_message("Entity is mutably borrowed")
}

impl EntityMetadata for EntityManager {
    fn class_metadata(&self, type_id: TypeId, type_name: &'static str) -> Result<ClassMetadata> {
        self.inner
            .registry
            .borrow()
            .by_type
            .get(&type_id)
            .map(|entry| entry.metadata.clone())
            .ok_or_else(|| EngineError::mapping(type_name))
    }

    fn identifier_values(
        &self,
        metadata: &ClassMetadata,
        instance: &dyn Any,
    ) -> Result<EntityKey> {
        let entry = self.entry_named(metadata.name())?;
        (entry.key_of)(instance).ok_or_else(|| EngineError::type_mismatch(metadata.name()))
    }
}

impl PersistenceEngine for EntityManager {
    fn find(&self, metadata: &ClassMetadata, key: &EntityKey) -> Result<Option<AnyEntity>> {
        let entry = self.entry_named(metadata.name())?;
        self.find_erased(&entry, key)
    }

    fn matching(
        &self,
        metadata: &ClassMetadata,
        criteria: &Criteria,
    ) -> Result<LazyCollection<AnyEntity>> {
        let entry = self.entry_named(metadata.name())?;
        let query = query::compile(&entry, criteria)?;
        Ok(self.lazy(entry, query))
    }

    fn identity_map(&self) -> IdentityMap {
        self.inner.uow.borrow().identity_map().clone()
    }

    fn detach(&self, entity: &AnyEntity) -> Result<()> {
        self.inner.uow.borrow_mut().detach(entity);
        Ok(())
    }

    fn clear(&self) {
        EntityManager::clear(self);
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("tracked", &self.tracked_count())
            .field("queries", &self.query_count())
            .finish()
    }
}
