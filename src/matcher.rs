//! The registry mapping operation names to constructors and entity factories.
//!
//! Only the [`OperationRequest`](crate::OperationRequest) travels through the
//! broker, so the processor needs a way to turn `operation_name` back into a
//! runnable instance. Registration happens at startup; lookups are safe from
//! any number of workers afterwards.

use crate::entity::{Entity, EntityFactory};
use crate::hooks::{HookedOperation, OperationHook};
use crate::operation::{ApiOperation, OperationConstructor};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Lookup and construction failures.
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("no operation registered under {key:?}")]
    OperationKeyLookup { key: String },
    #[error("no entity factory registered under {key:?}")]
    EntityKeyLookup { key: String },
    #[error("operation id must not be empty")]
    EmptyOperationId,
    #[error("entity factory for {key:?} failed")]
    EntityCreation {
        key: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Name-keyed registry of operation constructors and entity factories.
#[derive(Default)]
pub struct Matcher {
    operations: RwLock<HashMap<String, OperationConstructor>>,
    entity_factories: RwLock<HashMap<String, EntityFactory>>,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name`. A later call with the same name
    /// replaces the earlier entry.
    ///
    /// ```ignore
    /// matcher.register("LongRunning", LongRunningOperation::default);
    /// ```
    pub fn register<F, O>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> O + Send + Sync + 'static,
        O: ApiOperation + 'static,
    {
        let constructor: OperationConstructor = Arc::new(move || Box::new(constructor()));
        self.write_operations().insert(name.into(), constructor);
    }

    /// Register an entity factory under `name`; same replacement semantics
    /// as [`register`](Self::register).
    pub fn register_entity<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Box<dyn Entity>, Box<dyn StdError + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.write_factories().insert(name.into(), Arc::new(factory));
    }

    /// Pure query: is an operation registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.read_operations().contains_key(name)
    }

    /// Build a fresh, zero-valued instance of the operation registered under
    /// `name`. Every call returns a distinct instance.
    pub fn create_operation(&self, name: &str) -> Result<Box<dyn ApiOperation>, MatcherError> {
        let constructor = self
            .read_operations()
            .get(name)
            .cloned()
            .ok_or_else(|| MatcherError::OperationKeyLookup { key: name.to_owned() })?;
        Ok(constructor())
    }

    /// Build the entity registered under `name` from the id of the last
    /// accepted operation.
    pub fn create_entity(
        &self,
        name: &str,
        last_operation_id: &str,
    ) -> Result<Box<dyn Entity>, MatcherError> {
        if last_operation_id.is_empty() {
            return Err(MatcherError::EmptyOperationId);
        }
        let factory = self
            .read_factories()
            .get(name)
            .cloned()
            .ok_or_else(|| MatcherError::EntityKeyLookup { key: name.to_owned() })?;
        factory(last_operation_id)
            .map_err(|source| MatcherError::EntityCreation { key: name.to_owned(), source })
    }

    /// Compose [`create_operation`](Self::create_operation) with a hook list.
    /// An empty hook list yields a transparent wrapper.
    pub fn create_hooked(
        &self,
        name: &str,
        hooks: Vec<Arc<dyn OperationHook>>,
    ) -> Result<HookedOperation, MatcherError> {
        let operation = self.create_operation(name)?;
        Ok(HookedOperation::new(operation, hooks))
    }

    fn read_operations(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, OperationConstructor>> {
        self.operations.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_operations(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, OperationConstructor>> {
        self.operations.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_factories(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, EntityFactory>> {
        self.entity_factories.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_factories(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, EntityFactory>> {
        self.entity_factories.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut operations: Vec<String> = self.read_operations().keys().cloned().collect();
        operations.sort();
        let mut entities: Vec<String> = self.read_factories().keys().cloned().collect();
        entities.sort();
        f.debug_struct("Matcher")
            .field("operations", &operations)
            .field("entity_factories", &entities)
            .finish()
    }
}
