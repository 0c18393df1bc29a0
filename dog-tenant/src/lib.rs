//! dog-tenant: per-tenant data scoping for `dog-odm` models.
//!
//! Attach `TenantPlugin` to a schema, compile the model, then bind it to a
//! tenant with `by_tenant`. Everything done through the bound model reads
//! and writes only that tenant's documents, including models reached
//! through its connection handle (population, discriminators).

pub mod bound;
pub mod cache;
pub mod compat;
pub mod error;
pub mod fields;
pub mod middleware;
pub mod options;
pub mod plugin;

pub use bound::TenantModel;
pub use cache::BoundModelCache;
pub use compat::{TenantConnection, TenantIntrospection};
pub use error::{TenantError, TenantResult};
pub use options::{TenantOptions, TenantOptionsBuilder};
pub use plugin::{TenantModelExt, TenantPlugin, TENANT_PLUGIN_KEY};
