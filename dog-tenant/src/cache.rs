use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use dog_odm::TenantId;
use parking_lot::RwLock;
use tracing::debug;

/// Bound models by base model name, then by tenant key.
///
/// Tenants are keyed by `TenantId::cache_key()`, so identifiers with equal
/// string forms share an entry. The first instance stored for a key is
/// the one every caller gets back.
pub struct BoundModelCache<T: ?Sized> {
    models: RwLock<HashMap<String, HashMap<String, Arc<T>>>>,
}

impl<T: ?Sized> Default for BoundModelCache<T> {
    fn default() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized> BoundModelCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model_name: &str, tenant: &TenantId) -> Option<Arc<T>> {
        self.models
            .read()
            .get(model_name)
            .and_then(|by_tenant| by_tenant.get(&tenant.cache_key()))
            .cloned()
    }

    /// Cached instance, or the one built by `create`.
    ///
    /// `create` runs without the lock held (it may bind further models), so
    /// racing callers can both build; only the first insert is kept.
    pub fn get_or_create<F>(&self, model_name: &str, tenant: &TenantId, create: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<Arc<T>>,
    {
        if let Some(hit) = self.get(model_name, tenant) {
            debug!(model = model_name, tenant = %tenant, "bound model cache hit");
            return Ok(hit);
        }

        let built = create()?;
        let mut models = self.models.write();
        let kept = models
            .entry(model_name.to_string())
            .or_default()
            .entry(tenant.cache_key())
            .or_insert(built)
            .clone();
        debug!(model = model_name, tenant = %tenant, "bound model cached");
        Ok(kept)
    }

    /// Total number of bound models.
    pub fn len(&self) -> usize {
        self.models.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.models.write().clear();
    }
}
