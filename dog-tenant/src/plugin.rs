//! # Tenant plugin
//!
//! Attaching the plugin to a schema:
//!
//! 1. scopes unique indexes to the tenant field,
//! 2. adds the tenant field itself,
//! 3. installs scoping pre-hooks for every hookable operation,
//! 4. registers the binding accessor (`byTenant` by default) and the plugin
//!    itself as schema state.
//!
//! ```rust,no_run
//! use dog_odm::{Connection, FieldDef, FieldType, Schema};
//! use dog_tenant::{TenantModelExt, TenantOptions, TenantPlugin};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut schema = Schema::new().field(FieldDef::new("email", FieldType::String).unique());
//! TenantPlugin::attach(&mut schema, TenantOptions::default())?;
//!
//! let conn = Connection::new();
//! let users = conn.compile("User", schema)?;
//! let acme = users.by_tenant("acme")?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use anyhow::Result;
use dog_odm::{BaseModel, FieldType, Model, ModelAccessor, Schema, TenantId};
use tracing::info;

use crate::bound::TenantModel;
use crate::cache::BoundModelCache;
use crate::compat::TenantIntrospection;
use crate::error::TenantError;
use crate::fields::{inject_tenant_field, rewrite_unique_indexes};
use crate::middleware;
use crate::options::TenantOptions;

/// Schema extension key the plugin is stored under.
pub const TENANT_PLUGIN_KEY: &str = "dog-tenant";

pub struct TenantPlugin {
    options: TenantOptions,
    cache: BoundModelCache<TenantModel>,
}

impl TenantPlugin {
    /// Install the plugin on `schema`.
    pub fn attach(schema: &mut Schema, options: TenantOptions) -> Result<Arc<TenantPlugin>> {
        options.validate().map_err(TenantError::into_anyhow)?;

        if options.enabled {
            rewrite_unique_indexes(schema, &options);
            inject_tenant_field(schema, &options);
            middleware::install(schema, &options.tenant_id_key);
        }

        let plugin = Arc::new(TenantPlugin {
            options,
            cache: BoundModelCache::new(),
        });
        let accessor: Arc<dyn ModelAccessor> = plugin.clone();
        schema.register_accessor(plugin.options.accessor_method.clone(), accessor);
        schema.set_extension(TENANT_PLUGIN_KEY, plugin.clone());

        info!(
            enabled = plugin.options.enabled,
            tenant_id_key = %plugin.options.tenant_id_key,
            accessor = %plugin.options.accessor_method,
            "tenant plugin attached"
        );
        Ok(plugin)
    }

    /// The plugin attached to `schema`, if any.
    pub fn of(schema: &Schema) -> Option<Arc<TenantPlugin>> {
        schema.extension::<TenantPlugin>(TENANT_PLUGIN_KEY)
    }

    pub fn options(&self) -> &TenantOptions {
        &self.options
    }

    /// `base` bound to `tenant`; the unbound base when the plugin is disabled.
    pub fn bind(&self, base: &Arc<BaseModel>, tenant: impl Into<TenantId>) -> Result<Arc<dyn Model>> {
        if !self.options.enabled {
            let unbound: Arc<dyn Model> = base.clone();
            return Ok(unbound);
        }
        let bound: Arc<dyn Model> = self.bound_model(base, tenant)?;
        Ok(bound)
    }

    /// Cached bound model for (`base`, `tenant`).
    pub fn bound_model(&self, base: &Arc<BaseModel>, tenant: impl Into<TenantId>) -> Result<Arc<TenantModel>> {
        let tenant = tenant.into();
        self.cache.get_or_create(base.name(), &tenant, || {
            TenantModel::bind(base, tenant.clone(), &self.options)
        })
    }

    /// Drop every cached bound model.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl ModelAccessor for TenantPlugin {
    fn access(&self, model: &Arc<BaseModel>, tenant: TenantId) -> Result<Arc<dyn Model>> {
        self.bind(model, tenant)
    }
}

impl TenantIntrospection for TenantPlugin {
    fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    fn tenant_id_key(&self) -> &str {
        &self.options.tenant_id_key
    }

    fn tenant_id_type(&self) -> &FieldType {
        &self.options.tenant_id_type
    }

    fn accessor_method(&self) -> &str {
        &self.options.accessor_method
    }

    fn is_tenant_id_required(&self) -> bool {
        self.options.require_tenant_id
    }
}

/// Tenant entry points on compiled models.
pub trait TenantModelExt {
    /// Bind through the schema's tenant accessor.
    fn by_tenant(&self, tenant: impl Into<TenantId>) -> Result<Arc<dyn Model>>;

    fn tenant_plugin(&self) -> Option<Arc<TenantPlugin>>;
}

impl TenantModelExt for Arc<BaseModel> {
    fn by_tenant(&self, tenant: impl Into<TenantId>) -> Result<Arc<dyn Model>> {
        let plugin = self
            .tenant_plugin()
            .ok_or_else(|| TenantError::NotAttached(self.name().to_string()).into_anyhow())?;
        self.access(plugin.accessor_method(), tenant)
    }

    fn tenant_plugin(&self) -> Option<Arc<TenantPlugin>> {
        TenantPlugin::of(self.schema())
    }
}
