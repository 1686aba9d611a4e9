//! Engine trait and the registry that builds engines by name

use super::{Database, StorageConfig};
use crate::{Entry, KestrelError, KeyValue, QueryFilter, Result, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Name of the log-structured engine registered by `EngineRegistry::with_defaults`
pub const LSM_ENGINE: &str = "lsm";

/// Storage engine operations
pub trait Engine: Send + Sync {
    fn insert(&self, entry: &Entry) -> Result<()>;

    fn get_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<KeyValue>>;

    fn close(&self) -> Result<()>;
}

impl Engine for Database {
    fn insert(&self, entry: &Entry) -> Result<()> {
        Database::insert(self, entry)
    }

    fn get_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<KeyValue>> {
        Database::get_range(self, start, end, filter)
    }

    fn close(&self) -> Result<()> {
        Database::close(self)
    }
}

/// Builds an engine from opaque options and an instance id
pub type EngineFactory =
    Box<dyn Fn(serde_json::Value, Uuid) -> Result<Arc<dyn Engine>> + Send + Sync>;

/// Name -> constructor map, created once and passed to whoever opens engines
#[derive(Default)]
pub struct EngineRegistry {
    factories: RwLock<HashMap<String, EngineFactory>>,
}

impl EngineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `lsm` engine
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.factories.write().insert(
            LSM_ENGINE.to_string(),
            Box::new(|options: serde_json::Value, id: Uuid| -> Result<Arc<dyn Engine>> {
                let config: StorageConfig = serde_json::from_value(options)
                    .map_err(|e| KestrelError::Config(format!("invalid lsm options: {}", e)))?;
                let db: Arc<dyn Engine> = Arc::new(Database::open(config, id)?);
                Ok(db)
            }),
        );
        registry
    }

    /// Register a constructor; a name can only be registered once
    pub fn register(&self, name: &str, factory: EngineFactory) -> Result<()> {
        let mut factories = self.factories.write();
        if factories.contains_key(name) {
            return Err(KestrelError::DuplicateRegistration(name.to_string()));
        }
        factories.insert(name.to_string(), factory);
        info!(engine = name, "Registered storage engine");
        Ok(())
    }

    /// Build the named engine for instance `id`
    pub fn open(
        &self,
        name: &str,
        options: serde_json::Value,
        id: &str,
    ) -> Result<Arc<dyn Engine>> {
        let id = Uuid::parse_str(id)
            .map_err(|e| KestrelError::Config(format!("invalid instance id {:?}: {}", id, e)))?;

        let factories = self.factories.read();
        let factory = factories
            .get(name)
            .ok_or_else(|| KestrelError::Config(format!("unknown engine: {}", name)))?;
        factory(options, id)
    }

    /// Registered engine names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}
