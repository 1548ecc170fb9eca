//! Entity mappings
//!
//! An entity type describes its table and fields through [`EntityMapping`].
//! The manager keeps a type-erased [`EntityEntry`] per registered type so it
//! can hydrate, key and flush instances it only knows as `Rc<dyn Any>`.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use refetch_core::model::erase;
use refetch_core::{AnyEntity, ClassMetadata, EngineError, EntityKey, ErrorKind, Managed, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};

use crate::errors::{RecordError, Result};
use crate::manager::EntityManager;

/// Mapping of one entity field to its column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub field: &'static str,
    pub column: &'static str,
    pub id: bool,
}

impl FieldMapping {
    /// Primary-key field
    pub const fn id(field: &'static str, column: &'static str) -> Self {
        Self {
            field,
            column,
            id: true,
        }
    }

    /// Plain or to-one association field
    pub const fn column(field: &'static str, column: &'static str) -> Self {
        Self {
            field,
            column,
            id: false,
        }
    }
}

/// How an entity type is stored
pub trait EntityMapping: Any + Sized {
    /// Type name used in the identity map and in errors
    const NAME: &'static str;
    const TABLE: &'static str;
    /// Selected columns; identifier fields in key order
    const FIELDS: &'static [FieldMapping];

    /// Primary-key values of this instance
    fn identifier(&self) -> EntityKey;

    /// Build an instance from a selected row
    ///
    /// To-one associations may be resolved through `em`; to-many
    /// associations should be lazy collections so hydration stays cheap.
    ///
    /// # Errors
    ///
    /// Mapping errors for unexpected column values, or whatever resolving an
    /// association returns.
    fn hydrate(record: &Record, em: &EntityManager) -> Result<Self>;

    /// Column values to write on flush, identifier columns included
    fn column_values(&self) -> Vec<(&'static str, Value)>;

    /// Join-table rows owned by this instance
    ///
    /// Only associations whose collection is initialised should be reported;
    /// each one reported replaces the owner's rows in its join table on flush.
    fn join_rows(&self) -> Vec<JoinRows> {
        Vec::new()
    }
}

/// Rows of one join table belonging to one owner
///
/// Targets must be managed instances with a single-field identifier.
#[derive(Debug, Clone)]
pub struct JoinRows {
    pub table: &'static str,
    pub owner_column: &'static str,
    pub owner: Value,
    pub target_column: &'static str,
    pub targets: Vec<AnyEntity>,
}

impl JoinRows {
    pub fn new<T: Any>(
        table: &'static str,
        owner_column: &'static str,
        owner: impl Into<Value>,
        target_column: &'static str,
        targets: &[Managed<T>],
    ) -> Self {
        Self {
            table,
            owner_column,
            owner: owner.into(),
            target_column,
            targets: targets.iter().map(|target| erase(target)).collect(),
        }
    }
}

/// One selected row, by column name
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    table: &'static str,
    values: BTreeMap<&'static str, Value>,
}

impl Record {
    pub fn new(table: &'static str, values: BTreeMap<&'static str, Value>) -> Self {
        Self { table, values }
    }

    pub(crate) fn from_row(
        table: &'static str,
        fields: &[FieldMapping],
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<Self> {
        let mut values = BTreeMap::new();
        for (index, field) in fields.iter().enumerate() {
            values.insert(field.column, from_sql(row.get_ref(index)?));
        }
        Ok(Self { table, values })
    }

    pub fn table(&self) -> &str {
        self.table
    }

    /// Value of a column
    ///
    /// # Errors
    ///
    /// `MissingColumn` when the column was not selected.
    pub fn get(&self, column: &str) -> std::result::Result<&Value, RecordError> {
        self.values
            .get(column)
            .ok_or_else(|| RecordError::MissingColumn {
                table: self.table.to_string(),
                column: column.to_string(),
            })
    }

    /// Integer value of a non-null column
    ///
    /// # Errors
    ///
    /// `MissingColumn` or `UnexpectedType`.
    pub fn int(&self, column: &str) -> std::result::Result<i64, RecordError> {
        let value = self.get(column)?;
        value.as_int().ok_or_else(|| self.unexpected(column, "integer", value))
    }

    /// Text value of a non-null column
    ///
    /// # Errors
    ///
    /// `MissingColumn` or `UnexpectedType`.
    pub fn text(&self, column: &str) -> std::result::Result<String, RecordError> {
        let value = self.get(column)?;
        value
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| self.unexpected(column, "text", value))
    }

    /// Integer value of a nullable column
    ///
    /// # Errors
    ///
    /// `MissingColumn` or `UnexpectedType`.
    pub fn opt_int(&self, column: &str) -> std::result::Result<Option<i64>, RecordError> {
        match self.get(column)? {
            Value::Null => Ok(None),
            _ => self.int(column).map(Some),
        }
    }

    fn unexpected(&self, column: &str, expected: &'static str, found: &Value) -> RecordError {
        RecordError::UnexpectedType {
            table: self.table.to_string(),
            column: column.to_string(),
            expected,
            found: format!("{:?}", found),
        }
    }

    /// Key of the row, in identifier order
    pub(crate) fn key(
        &self,
        fields: &[FieldMapping],
    ) -> std::result::Result<EntityKey, RecordError> {
        let mut key = EntityKey::new();
        for field in fields.iter().filter(|f| f.id) {
            key = key.with(field.field, self.get(field.column)?.clone());
        }
        Ok(key)
    }
}

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
    }
}

pub(crate) fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Text(v.to_string()),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(hex::encode(bytes)),
    }
}

/// Type-erased view of a registered mapping
#[derive(Clone)]
pub(crate) struct EntityEntry {
    pub metadata: ClassMetadata,
    pub table: &'static str,
    pub fields: &'static [FieldMapping],
    pub key_of: fn(&dyn Any) -> Option<EntityKey>,
    pub identifier_of: fn(&AnyEntity) -> Result<EntityKey>,
    pub hydrate: fn(&Record, &EntityManager) -> Result<AnyEntity>,
    pub columns_of: fn(&AnyEntity) -> Result<Vec<(&'static str, Value)>>,
    pub joins_of: fn(&AnyEntity) -> Result<Vec<JoinRows>>,
}

impl EntityEntry {
    pub fn of<T: EntityMapping>() -> Self {
        let identifier = T::FIELDS
            .iter()
            .filter(|f| f.id)
            .map(|f| f.field.to_string())
            .collect();
        Self {
            metadata: ClassMetadata::new(T::NAME, identifier),
            table: T::TABLE,
            fields: T::FIELDS,
            key_of: key_of::<T>,
            identifier_of: identifier_of::<T>,
            hydrate: hydrate::<T>,
            columns_of: columns_of::<T>,
            joins_of: joins_of::<T>,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// Column of a mapped field
    pub fn column_of(&self, field: &str) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|f| f.field == field)
            .map(|f| f.column)
    }

    pub fn id_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.id).map(|f| f.column)
    }

    /// Comma-separated list of every selected column
    pub fn select_list(&self, alias: &str) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}.{}", alias, f.column))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn key_of<T: EntityMapping>(instance: &dyn Any) -> Option<EntityKey> {
    instance.downcast_ref::<T>().map(|entity| entity.identifier())
}

fn identifier_of<T: EntityMapping>(entity: &AnyEntity) -> Result<EntityKey> {
    with_instance::<T, _>(entity, T::identifier)
}

fn hydrate<T: EntityMapping>(record: &Record, em: &EntityManager) -> Result<AnyEntity> {
    let entity = T::hydrate(record, em)?;
    Ok(erase(&Rc::new(RefCell::new(entity))))
}

fn columns_of<T: EntityMapping>(entity: &AnyEntity) -> Result<Vec<(&'static str, Value)>> {
    with_instance::<T, _>(entity, T::column_values)
}

fn joins_of<T: EntityMapping>(entity: &AnyEntity) -> Result<Vec<JoinRows>> {
    with_instance::<T, _>(entity, T::join_rows)
}

fn with_instance<T: EntityMapping, R>(entity: &AnyEntity, f: impl FnOnce(&T) -> R) -> Result<R> {
    let cell = entity
        .downcast_ref::<RefCell<T>>()
        .ok_or_else(|| EngineError::type_mismatch(T::NAME))?;
    let borrowed = cell.try_borrow().map_err(|_| {
        EngineError::new(ErrorKind::ObjectBorrowed)
            .with_op("flush")
            .with_entity_type(T::NAME)
            .with_message("Entity is mutably borrowed")
    })?;
    Ok(f(&borrowed))
}
