//! In-memory engine used by the integration tests
//!
//! Rows live in plain maps; "loading" a row builds a fresh instance from the
//! stored prototype and registers it in the identity map, the way a real
//! engine hydrates a record. Read and count calls are counted so tests can
//! assert on backing-store access.

#![allow(dead_code)]

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use refetch_core::criteria::{Comparison, Expr};
use refetch_core::model::erase;
use refetch_core::{
    AnyEntity, ClassMetadata, Criteria, EngineError, EntityKey, EntityMetadata, ErrorKind,
    IdentityMap, LazyCollection, Managed, PersistenceEngine, Value,
};

/// Entity type the fake engine knows how to store
pub trait TestEntity: Any + Clone {
    const NAME: &'static str;
    const IDENTIFIER: &'static [&'static str];

    fn values(&self) -> BTreeMap<String, Value>;

    fn key(&self) -> EntityKey {
        let values = self.values();
        Self::IDENTIFIER.iter().fold(EntityKey::new(), |key, field| {
            key.with(*field, values.get(*field).cloned().unwrap_or(Value::Null))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub id: i64,
    pub name: String,
    pub colour: String,
}

impl Widget {
    pub fn new(id: i64, name: &str, colour: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            colour: colour.to_string(),
        }
    }
}

impl TestEntity for Widget {
    const NAME: &'static str = "Widget";
    const IDENTIFIER: &'static [&'static str] = &["id"];

    fn values(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("id".to_string(), Value::Int(self.id)),
            ("name".to_string(), Value::from(self.name.as_str())),
            ("colour".to_string(), Value::from(self.colour.as_str())),
        ])
    }
}

/// Composite-key entity: (isbn, printing)
#[derive(Debug, Clone, PartialEq)]
pub struct Edition {
    pub isbn: String,
    pub printing: i64,
    pub copies: i64,
}

impl TestEntity for Edition {
    const NAME: &'static str = "Edition";
    const IDENTIFIER: &'static [&'static str] = &["isbn", "printing"];

    fn values(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("isbn".to_string(), Value::from(self.isbn.as_str())),
            ("printing".to_string(), Value::Int(self.printing)),
            ("copies".to_string(), Value::Int(self.copies)),
        ])
    }
}

/// Never registered with the engine
#[derive(Debug, Clone)]
pub struct Gadget {
    pub id: i64,
}

struct Mapping {
    metadata: ClassMetadata,
    key_of: fn(&dyn Any) -> Option<EntityKey>,
}

type Builder = Rc<dyn Fn() -> AnyEntity>;

struct Row {
    values: BTreeMap<String, Value>,
    build: Builder,
}

#[derive(Default)]
struct Inner {
    mappings: HashMap<TypeId, Mapping>,
    rows: RefCell<BTreeMap<String, BTreeMap<String, Row>>>,
    tracked: RefCell<IdentityMap>,
    reads: Cell<usize>,
    counts: Cell<usize>,
    detached: Cell<usize>,
    fail_detach: Cell<bool>,
}

/// Cheap-clone handle to an in-memory tracking session
#[derive(Clone)]
pub struct FakeEngine {
    inner: Rc<Inner>,
}

fn key_of<T: TestEntity>(instance: &dyn Any) -> Option<EntityKey> {
    instance.downcast_ref::<T>().map(|entity| entity.key())
}

fn mapping<T: TestEntity>() -> (TypeId, Mapping) {
    let identifier = T::IDENTIFIER.iter().map(|f| f.to_string()).collect();
    (
        TypeId::of::<T>(),
        Mapping {
            metadata: ClassMetadata::new(T::NAME, identifier),
            key_of: key_of::<T>,
        },
    )
}

impl FakeEngine {
    /// Engine with `Widget` and `Edition` registered and no rows
    pub fn new() -> Self {
        let inner = Inner {
            mappings: HashMap::from([mapping::<Widget>(), mapping::<Edition>()]),
            ..Default::default()
        };
        Self {
            inner: Rc::new(inner),
        }
    }

    /// Engine holding widgets 1..=5 (odd ids red, even ids blue) and two
    /// printings of one edition
    pub fn seeded() -> Self {
        let engine = Self::new();
        for id in 1..=5 {
            let colour = if id % 2 == 0 { "blue" } else { "red" };
            engine.insert_row(Widget::new(id, &format!("widget-{}", id), colour));
        }
        for printing in 1..=2 {
            engine.insert_row(Edition {
                isbn: "978-0".to_string(),
                printing,
                copies: printing * 100,
            });
        }
        engine
    }

    /// Store a backing record
    pub fn insert_row<T: TestEntity>(&self, entity: T) {
        let id_hash = entity.key().id_hash();
        let values = entity.values();
        let build: Builder = Rc::new(move || erase(&Rc::new(RefCell::new(entity.clone()))));
        self.inner
            .rows
            .borrow_mut()
            .entry(T::NAME.to_string())
            .or_default()
            .insert(id_hash, Row { values, build });
    }

    /// Delete a backing record; a tracked instance stays tracked
    pub fn delete_row<T: TestEntity>(&self, key: &EntityKey) {
        if let Some(rows) = self.inner.rows.borrow_mut().get_mut(T::NAME) {
            rows.remove(&key.id_hash());
        }
    }

    /// Load (or return the tracked) instance for a key
    pub fn load<T: TestEntity>(&self, key: &EntityKey) -> Option<Managed<T>> {
        let metadata = self.metadata::<T>();
        self.find(&metadata, key)
            .ok()
            .flatten()
            .and_then(refetch_core::model::downcast::<T>)
    }

    pub fn metadata<T: TestEntity>(&self) -> ClassMetadata {
        ClassMetadata::new(
            T::NAME,
            T::IDENTIFIER.iter().map(|f| f.to_string()).collect(),
        )
    }

    pub fn reads(&self) -> usize {
        self.inner.reads.get()
    }

    pub fn counts(&self) -> usize {
        self.inner.counts.get()
    }

    pub fn detach_calls(&self) -> usize {
        self.inner.detached.get()
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.tracked.borrow().len()
    }

    pub fn fail_detach(&self, fail: bool) {
        self.inner.fail_detach.set(fail);
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn hydrate(&self, type_name: &str, id_hash: &str, build: &Builder) -> AnyEntity {
        if let Some(tracked) = self.tracked.borrow().get(type_name, id_hash) {
            return tracked.clone();
        }
        let entity = build();
        self.tracked
            .borrow_mut()
            .insert(type_name, id_hash, entity.clone());
        entity
    }

    fn select(
        &self,
        type_name: &str,
        criteria: &Criteria,
    ) -> Result<Vec<(String, Builder)>, EngineError> {
        let rows = self.rows.borrow();
        let Some(rows) = rows.get(type_name) else {
            return Ok(Vec::new());
        };
        let mut selected = Vec::new();
        for (id_hash, row) in rows {
            let mut keep = true;
            for expr in criteria.filters() {
                keep &= evaluate(expr, &row.values)?;
            }
            if keep {
                selected.push((id_hash.clone(), row.build.clone()));
            }
        }
        let offset = criteria.first_result().unwrap_or(0);
        let limit = criteria.max_results().unwrap_or(usize::MAX);
        Ok(selected.into_iter().skip(offset).take(limit).collect())
    }
}

fn evaluate(expr: &Expr, values: &BTreeMap<String, Value>) -> Result<bool, EngineError> {
    let lookup = |field: &str| {
        values.get(field).ok_or_else(|| {
            EngineError::new(ErrorKind::InvalidCriteria)
                .with_message(format!("Unknown field '{}'", field))
        })
    };
    Ok(match expr {
        Expr::Compare { field, op, value } => {
            let actual = lookup(field)?;
            match op {
                Comparison::Eq => actual == value,
                Comparison::Neq => actual != value,
                Comparison::Lt => actual < value,
                Comparison::Lte => actual <= value,
                Comparison::Gt => actual > value,
                Comparison::Gte => actual >= value,
            }
        }
        Expr::IsNull { field } => lookup(field)?.is_null(),
        Expr::In { field, values: list } => list.contains(lookup(field)?),
        Expr::And(exprs) => {
            let mut all = true;
            for e in exprs {
                all &= evaluate(e, values)?;
            }
            all
        }
        Expr::Or(exprs) => {
            let mut any = false;
            for e in exprs {
                any |= evaluate(e, values)?;
            }
            any
        }
    })
}

impl EntityMetadata for FakeEngine {
    fn class_metadata(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<ClassMetadata, EngineError> {
        self.inner
            .mappings
            .get(&type_id)
            .map(|m| m.metadata.clone())
            .ok_or_else(|| EngineError::mapping(type_name))
    }

    fn identifier_values(
        &self,
        metadata: &ClassMetadata,
        instance: &dyn Any,
    ) -> Result<EntityKey, EngineError> {
        self.inner
            .mappings
            .values()
            .find(|m| m.metadata == *metadata)
            .and_then(|m| (m.key_of)(instance))
            .ok_or_else(|| EngineError::type_mismatch(metadata.name()))
    }
}

impl PersistenceEngine for FakeEngine {
    fn find(
        &self,
        metadata: &ClassMetadata,
        key: &EntityKey,
    ) -> Result<Option<AnyEntity>, EngineError> {
        let id_hash = key.id_hash();
        if let Some(tracked) = self.inner.tracked.borrow().get(metadata.name(), &id_hash) {
            return Ok(Some(tracked.clone()));
        }

        self.inner.reads.set(self.inner.reads.get() + 1);
        let build = self
            .inner
            .rows
            .borrow()
            .get(metadata.name())
            .and_then(|rows| rows.get(&id_hash))
            .map(|row| row.build.clone());
        Ok(build.map(|build| self.inner.hydrate(metadata.name(), &id_hash, &build)))
    }

    fn matching(
        &self,
        metadata: &ClassMetadata,
        criteria: &Criteria,
    ) -> Result<LazyCollection<AnyEntity>, EngineError> {
        let loader_inner = self.inner.clone();
        let loader_type = metadata.name().to_string();
        let loader_criteria = criteria.clone();
        let counter_inner = self.inner.clone();
        let counter_type = loader_type.clone();
        let counter_criteria = criteria.clone();

        Ok(LazyCollection::new(move || {
            loader_inner.reads.set(loader_inner.reads.get() + 1);
            let selected = loader_inner.select(&loader_type, &loader_criteria)?;
            Ok(selected
                .iter()
                .map(|(id_hash, build)| loader_inner.hydrate(&loader_type, id_hash, build))
                .collect())
        })
        .with_counter(move || {
            counter_inner.counts.set(counter_inner.counts.get() + 1);
            Ok(counter_inner.select(&counter_type, &counter_criteria)?.len())
        }))
    }

    fn identity_map(&self) -> IdentityMap {
        self.inner.tracked.borrow().clone()
    }

    fn detach(&self, entity: &AnyEntity) -> Result<(), EngineError> {
        if self.inner.fail_detach.get() {
            return Err(EngineError::persistence("detach refused").with_op("detach"));
        }
        self.inner.detached.set(self.inner.detached.get() + 1);
        self.inner.tracked.borrow_mut().remove_instance(entity);
        Ok(())
    }

    fn clear(&self) {
        self.inner.tracked.borrow_mut().clear();
    }
}
