//! Lazily-evaluated collections
//!
//! A `LazyCollection` performs no backing-store access until it is first
//! enumerated. Engines return one from query-by-criteria and use the same type
//! for to-many associations.

use std::cell::OnceCell;
use std::rc::Rc;

use crate::errors::{EngineError, ErrorKind};
use crate::model::Managed;

type Loader<T> = Box<dyn Fn() -> Result<Vec<T>, EngineError>>;
type Counter = Box<dyn Fn() -> Result<usize, EngineError>>;

/// Collection whose items are produced by a loader on first access
///
/// A failed load leaves the collection uninitialised, so enumeration can be
/// retried.
pub struct LazyCollection<T> {
    items: OnceCell<Vec<T>>,
    loader: Option<Loader<T>>,
    counter: Option<Counter>,
}

impl<T> LazyCollection<T> {
    /// Create an uninitialised collection backed by `loader`
    pub fn new(loader: impl Fn() -> Result<Vec<T>, EngineError> + 'static) -> Self {
        Self {
            items: OnceCell::new(),
            loader: Some(Box::new(loader)),
            counter: None,
        }
    }

    /// Create an already initialised collection
    pub fn from_items(items: Vec<T>) -> Self {
        Self {
            items: OnceCell::from(items),
            loader: None,
            counter: None,
        }
    }

    /// Answer `count()` with `counter` while the collection is uninitialised
    pub fn with_counter(
        mut self,
        counter: impl Fn() -> Result<usize, EngineError> + 'static,
    ) -> Self {
        self.counter = Some(Box::new(counter));
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.items.get().is_some()
    }

    /// Initialise the collection if needed and return its items
    pub fn load(&self) -> Result<&[T], EngineError> {
        if let Some(items) = self.items.get() {
            return Ok(items);
        }
        let loader = self.loader.as_ref().ok_or_else(|| {
            EngineError::new(ErrorKind::Internal).with_message("Lazy collection has no loader")
        })?;
        let loaded = loader()?;
        Ok(self.items.get_or_init(|| loaded))
    }

    pub fn iter(&self) -> Result<std::slice::Iter<'_, T>, EngineError> {
        Ok(self.load()?.iter())
    }

    /// Number of items
    ///
    /// Uses the counter, if any, without initialising the collection.
    pub fn count(&self) -> Result<usize, EngineError> {
        if let Some(items) = self.items.get() {
            return Ok(items.len());
        }
        match &self.counter {
            Some(counter) => counter(),
            None => Ok(self.load()?.len()),
        }
    }

    pub fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.count()? == 0)
    }

    /// Append an item, initialising the collection first
    pub fn push(&mut self, item: T) -> Result<(), EngineError> {
        self.load()?;
        if let Some(items) = self.items.get_mut() {
            items.push(item);
        }
        Ok(())
    }

    /// Remove every item matching `predicate`, initialising the collection first
    pub fn retain(&mut self, predicate: impl FnMut(&T) -> bool) -> Result<(), EngineError> {
        self.load()?;
        if let Some(items) = self.items.get_mut() {
            items.retain(predicate);
        }
        Ok(())
    }
}

impl<T: Clone> LazyCollection<T> {
    pub fn first(&self) -> Result<Option<T>, EngineError> {
        Ok(self.load()?.first().cloned())
    }

    pub fn get(&self, index: usize) -> Result<Option<T>, EngineError> {
        Ok(self.load()?.get(index).cloned())
    }

    pub fn to_vec(&self) -> Result<Vec<T>, EngineError> {
        Ok(self.load()?.to_vec())
    }
}

impl<T: 'static> LazyCollection<T> {
    /// Convert every item with `f`
    ///
    /// An uninitialised collection stays uninitialised: `f` runs when the
    /// source would have loaded. An initialised one is converted now.
    pub fn map<U: 'static>(
        self,
        f: impl Fn(T) -> Result<U, EngineError> + 'static,
    ) -> Result<LazyCollection<U>, EngineError> {
        let LazyCollection {
            items,
            loader,
            counter,
        } = self;

        if let Some(items) = items.into_inner() {
            let converted = items.into_iter().map(f).collect::<Result<Vec<_>, _>>()?;
            return Ok(LazyCollection {
                items: OnceCell::from(converted),
                loader: None,
                counter,
            });
        }

        let loader = loader.ok_or_else(|| {
            EngineError::new(ErrorKind::Internal).with_message("Lazy collection has no loader")
        })?;
        Ok(LazyCollection {
            items: OnceCell::new(),
            loader: Some(Box::new(move || {
                loader()?.into_iter().map(&f).collect::<Result<Vec<_>, _>>()
            })),
            counter,
        })
    }
}

impl<E> LazyCollection<Managed<E>> {
    /// True when this exact instance is an item
    pub fn contains_instance(&self, entity: &Managed<E>) -> Result<bool, EngineError> {
        Ok(self.load()?.iter().any(|item| Rc::ptr_eq(item, entity)))
    }

    /// Add an instance unless it is already an item
    pub fn add_instance(&mut self, entity: Managed<E>) -> Result<(), EngineError> {
        if !self.contains_instance(&entity)? {
            self.push(entity)?;
        }
        Ok(())
    }

    pub fn remove_instance(&mut self, entity: &Managed<E>) -> Result<(), EngineError> {
        self.retain(|item| !Rc::ptr_eq(item, entity))
    }
}

impl<T> Default for LazyCollection<T> {
    fn default() -> Self {
        Self::from_items(Vec::new())
    }
}

impl<T> std::fmt::Debug for LazyCollection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyCollection")
            .field("initialized", &self.is_initialized())
            .field("len", &self.items.get().map(Vec::len))
            .finish()
    }
}
