use std::collections::HashMap;
use std::sync::{Arc, Weak};

use anyhow::Result;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::{DogConfig, DogConfigSnapshot};
use crate::errors::DogError;
use crate::model::{BaseModel, Model};
use crate::schema::Schema;
use crate::store::MemoryStore;

/// Anything that resolves models by name.
///
/// Implemented by `Connection` and by wrappers that hand out models
/// re-bound to some context (e.g. a tenant).
pub trait ModelLookup: Send + Sync {
    fn model(&self, name: &str) -> Result<Arc<dyn Model>>;
}

pub(crate) struct ConnectionInner {
    models: RwLock<HashMap<String, Arc<BaseModel>>>,
    store: Arc<MemoryStore>,
    config: RwLock<DogConfig>,
}

/// A connection: the model registry, its store and configuration.
///
/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// Default collection name: lower-cased model name, pluralized.
fn collection_for(model_name: &str) -> String {
    let lower = model_name.to_lowercase();
    if lower.ends_with('s') {
        lower
    } else {
        format!("{lower}s")
    }
}

impl Connection {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                models: RwLock::new(HashMap::new()),
                store,
                config: RwLock::new(DogConfig::new()),
            }),
        }
    }

    pub(crate) fn from_weak(weak: &Weak<ConnectionInner>) -> Result<Self> {
        weak.upgrade()
            .map(|inner| Self { inner })
            .ok_or_else(|| DogError::general_error("connection has been dropped").into_anyhow())
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.inner.store
    }

    /// Compile `schema` into a model stored in the default collection.
    pub fn compile(&self, name: &str, schema: Schema) -> Result<Arc<BaseModel>> {
        self.compile_in(name, &collection_for(name), schema)
    }

    /// Compile `schema` into a model stored in `collection`.
    pub fn compile_in(&self, name: &str, collection: &str, schema: Schema) -> Result<Arc<BaseModel>> {
        let model = BaseModel::compile(
            name.to_string(),
            collection.to_string(),
            Arc::new(schema),
            None,
            self.inner.store.clone(),
            Arc::downgrade(&self.inner),
        );
        self.register(model.clone())?;
        Ok(model)
    }

    pub(crate) fn register(&self, model: Arc<BaseModel>) -> Result<()> {
        let mut models = self.inner.models.write();
        if models.contains_key(model.name()) {
            return Err(DogError::conflict(format!(
                "Cannot overwrite `{}` model once compiled.",
                model.name()
            ))
            .into_anyhow());
        }
        debug!(model = model.name(), "registered model");
        models.insert(model.name().to_string(), model);
        Ok(())
    }

    /// Look up a compiled model.
    pub fn model(&self, name: &str) -> Result<Arc<BaseModel>> {
        self.inner.models.read().get(name).cloned().ok_or_else(|| {
            DogError::not_found(format!("Schema hasn't been registered for model \"{name}\""))
                .into_anyhow()
        })
    }

    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.models.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// `conn.set(key, value)`
    pub fn set<K, V>(&self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.inner.config.write().set(key, value);
    }

    /// `conn.get(key)`
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.config.read().get(key).map(str::to_string)
    }

    pub fn config_snapshot(&self) -> DogConfigSnapshot {
        self.inner.config.read().snapshot()
    }
}

impl ModelLookup for Connection {
    fn model(&self, name: &str) -> Result<Arc<dyn Model>> {
        let model: Arc<dyn Model> = Connection::model(self, name)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType};

    #[test]
    fn compile_and_lookup() {
        let conn = Connection::new();
        let schema = Schema::new().field(FieldDef::new("name", FieldType::String));
        let m = conn.compile("Post", schema).unwrap();

        assert_eq!(m.collection_name(), "posts");
        assert!(Arc::ptr_eq(&m, &conn.model("Post").unwrap()));
        assert_eq!(conn.model_names(), vec!["Post".to_string()]);
    }

    #[test]
    fn compile_twice_is_a_conflict() {
        let conn = Connection::new();
        conn.compile("Post", Schema::new()).unwrap();
        let err = conn.compile("Post", Schema::new()).unwrap_err();
        assert_eq!(DogError::kind_of(&err), crate::ErrorKind::Conflict);
    }

    #[test]
    fn unknown_model_is_not_found() {
        let conn = Connection::new();
        let err = conn.model("Nope").unwrap_err();
        assert_eq!(DogError::kind_of(&err), crate::ErrorKind::NotFound);
    }

    #[test]
    fn config_round_trip() {
        let conn = Connection::new();
        conn.set("tenant.key", "org");
        assert_eq!(conn.get("tenant.key").as_deref(), Some("org"));
        assert_eq!(conn.config_snapshot().get("tenant.key"), Some("org"));
    }
}
