//! Cross-model compatibility and the tenant-scoped connection handle.

use std::sync::Arc;

use anyhow::Result;
use dog_odm::{Connection, FieldType, Model, ModelLookup, TenantContext};
use tracing::debug;

use crate::options::TenantOptions;
use crate::plugin::TenantPlugin;

/// What a schema's tenant plugin reports about its configuration.
pub trait TenantIntrospection: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn tenant_id_key(&self) -> &str;

    fn tenant_id_type(&self) -> &FieldType;

    fn accessor_method(&self) -> &str;

    fn is_tenant_id_required(&self) -> bool;

    /// Same tenant field name on both sides?
    fn is_compatible_to(&self, other: Option<&dyn TenantIntrospection>) -> bool {
        other.is_some_and(|o| o.tenant_id_key() == self.tenant_id_key())
    }
}

impl TenantIntrospection for TenantOptions {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn tenant_id_key(&self) -> &str {
        &self.tenant_id_key
    }

    fn tenant_id_type(&self) -> &FieldType {
        &self.tenant_id_type
    }

    fn accessor_method(&self) -> &str {
        &self.accessor_method
    }

    fn is_tenant_id_required(&self) -> bool {
        self.require_tenant_id
    }
}

/// Connection handle of a tenant-bound model.
///
/// Models fetched by name come back bound to the same tenant when their
/// schema carries a compatible tenant plugin, and unbound otherwise.
pub struct TenantConnection {
    conn: Connection,
    tenant: TenantContext,
    origin: TenantOptions,
}

impl TenantConnection {
    pub fn new(conn: Connection, tenant: TenantContext, origin: TenantOptions) -> Self {
        Self {
            conn,
            tenant,
            origin,
        }
    }

    pub fn tenant(&self) -> &TenantContext {
        &self.tenant
    }

    /// The unscoped connection underneath.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl ModelLookup for TenantConnection {
    fn model(&self, name: &str) -> Result<Arc<dyn Model>> {
        let model = self.conn.model(name)?;
        let other = TenantPlugin::of(model.schema());
        let other_view = other.as_deref().map(|p| p as &dyn TenantIntrospection);

        if let Some(plugin) = other.as_deref() {
            if self.origin.is_compatible_to(other_view) {
                debug!(model = name, tenant = %self.tenant.tenant_id, "re-binding model to tenant");
                return model.access(plugin.accessor_method(), self.tenant.tenant_id.clone());
            }
        }
        let unbound: Arc<dyn Model> = model;
        Ok(unbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatible_only_with_same_key() {
        let a = TenantOptions::default();
        let b = TenantOptions::builder().accessor_method("other").build();
        let c = TenantOptions::builder().tenant_id_key("org").build();

        assert!(a.is_compatible_to(Some(&b)));
        assert!(!a.is_compatible_to(Some(&c)));
        assert!(!a.is_compatible_to(None));
    }
}
