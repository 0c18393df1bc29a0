//! Pre-hooks that scope hookable operations to the calling model's tenant.
//!
//! Each hook is a no-op when the invoker carries no tenant context, and
//! always continues the chain.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dog_odm::{DogPreHook, HookContext, HookOp, Next, Schema};

/// `find`, `find_one`, `find_one_and_remove`, `count`, `count_documents`:
/// merge the tenant condition into the filter.
pub struct ScopeQueryHook {
    tenant_id_key: String,
}

impl ScopeQueryHook {
    pub fn new(tenant_id_key: impl Into<String>) -> Self {
        Self {
            tenant_id_key: tenant_id_key.into(),
        }
    }
}

#[async_trait]
impl DogPreHook for ScopeQueryHook {
    async fn run(&self, ctx: &mut HookContext, next: Next<'_>) -> Result<()> {
        if let Some(tenant) = ctx.invoker.tenant.clone() {
            ctx.filter
                .set(self.tenant_id_key.clone(), tenant.tenant_id.into_value());
        }
        next.run(ctx).await
    }
}

/// Update operations: scope the filter and pin the tenant field in `$set`.
pub struct ScopeUpdateHook {
    tenant_id_key: String,
}

impl ScopeUpdateHook {
    pub fn new(tenant_id_key: impl Into<String>) -> Self {
        Self {
            tenant_id_key: tenant_id_key.into(),
        }
    }
}

#[async_trait]
impl DogPreHook for ScopeUpdateHook {
    async fn run(&self, ctx: &mut HookContext, next: Next<'_>) -> Result<()> {
        if let Some(tenant) = ctx.invoker.tenant.clone() {
            let value = tenant.tenant_id.into_value();
            ctx.filter.set(self.tenant_id_key.clone(), value.clone());
            if let Some(update) = ctx.update.as_mut() {
                update.force_set(&self.tenant_id_key, value);
            }
        }
        next.run(ctx).await
    }
}

/// `save`: force the tenant field on the document and scope the replace
/// target to the tenant.
pub struct ScopeSaveHook {
    tenant_id_key: String,
}

impl ScopeSaveHook {
    pub fn new(tenant_id_key: impl Into<String>) -> Self {
        Self {
            tenant_id_key: tenant_id_key.into(),
        }
    }
}

#[async_trait]
impl DogPreHook for ScopeSaveHook {
    async fn run(&self, ctx: &mut HookContext, next: Next<'_>) -> Result<()> {
        if let Some(tenant) = ctx.invoker.tenant.clone() {
            let value = tenant.tenant_id.into_value();
            ctx.filter.set(self.tenant_id_key.clone(), value.clone());
            if let Some(doc) = ctx.document.as_mut() {
                doc.insert(self.tenant_id_key.clone(), value);
            }
        }
        next.run(ctx).await
    }
}

/// Register the scoping hook for every hookable operation.
pub fn install(schema: &mut Schema, tenant_id_key: &str) {
    let query: Arc<dyn DogPreHook> = Arc::new(ScopeQueryHook::new(tenant_id_key));
    let update: Arc<dyn DogPreHook> = Arc::new(ScopeUpdateHook::new(tenant_id_key));
    let save: Arc<dyn DogPreHook> = Arc::new(ScopeSaveHook::new(tenant_id_key));

    for op in HookOp::ALL {
        let hook = match op {
            HookOp::Save => save.clone(),
            op if op.is_update() => update.clone(),
            _ => query.clone(),
        };
        schema.pre(op, hook);
    }
}
