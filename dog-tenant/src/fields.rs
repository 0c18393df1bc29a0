//! Schema rewriting: the tenant field and per-tenant unique indexes.

use dog_odm::{FieldDef, IndexSpec, Schema, SortDirection};
use tracing::debug;

use crate::options::TenantOptions;

/// Add the tenant field (indexed, not unique) to `schema`.
///
/// No-op when the plugin is disabled.
pub fn inject_tenant_field(schema: &mut Schema, opts: &TenantOptions) {
    if !opts.enabled {
        return;
    }
    schema.add(
        FieldDef::new(opts.tenant_id_key.clone(), opts.tenant_id_type.clone())
            .indexed()
            .required_if(opts.require_tenant_id),
    );
}

/// Scope unique indexes to the tenant.
///
/// Schema-level unique indexes get the tenant field as leading key. Unique
/// fields lose their global index in favour of a compound
/// `(tenant, field)` index with the same options. Indexes flagged with
/// `preserve_unique_key` stay global. No-op when the plugin is disabled.
pub fn rewrite_unique_indexes(schema: &mut Schema, opts: &TenantOptions) {
    if !opts.enabled {
        return;
    }
    let key = opts.tenant_id_key.as_str();

    for index in schema.indexes_mut().iter_mut() {
        if !index.options.unique || index.options.preserve_unique_key {
            continue;
        }
        let mut keys = Vec::with_capacity(index.keys.len() + 1);
        keys.push((key.to_string(), SortDirection::Asc));
        keys.extend(index.keys.drain(..));
        index.keys = keys;
        debug!(index = %index.name(), "scoped schema index to tenant");
    }

    let mut compound = Vec::new();
    for field in schema.paths_mut().iter_mut() {
        if field.name == key {
            continue;
        }
        let Some(options) = &field.index else {
            continue;
        };
        if !options.unique || options.preserve_unique_key {
            continue;
        }
        let mut options = options.clone();
        options.unique = true;
        compound.push(IndexSpec::ascending([key.to_string(), field.name.clone()], options));
        field.index = None;
        debug!(field = %field.name, "replaced unique field index with tenant compound index");
    }
    for spec in compound {
        schema.index(spec);
    }
}
