//! # Pre-hooks
//!
//! Schemas carry a chain of pre-hooks per operation. Each hook gets the
//! mutable operation context plus a `Next` continuation and must call
//! `next.run(ctx)` to let the operation proceed. A chain that never reaches
//! the end aborts the operation.
//!
//! `aggregate`, `insert_many`, `delete_one`, `delete_many` and `remove` are
//! not hookable; models that need to alter those override them directly.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::document::{Document, Filter, Update};
use crate::tenant::TenantContext;

/// Operations that run the schema's pre-hook chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookOp {
    Find,
    FindOne,
    FindOneAndUpdate,
    FindOneAndRemove,
    Count,
    CountDocuments,
    Update,
    UpdateOne,
    UpdateMany,
    Save,
}

impl HookOp {
    /// Every hookable operation.
    pub const ALL: [HookOp; 10] = [
        HookOp::Find,
        HookOp::FindOne,
        HookOp::FindOneAndUpdate,
        HookOp::FindOneAndRemove,
        HookOp::Count,
        HookOp::CountDocuments,
        HookOp::Update,
        HookOp::UpdateOne,
        HookOp::UpdateMany,
        HookOp::Save,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookOp::Find => "find",
            HookOp::FindOne => "findOne",
            HookOp::FindOneAndUpdate => "findOneAndUpdate",
            HookOp::FindOneAndRemove => "findOneAndRemove",
            HookOp::Count => "count",
            HookOp::CountDocuments => "countDocuments",
            HookOp::Update => "update",
            HookOp::UpdateOne => "updateOne",
            HookOp::UpdateMany => "updateMany",
            HookOp::Save => "save",
        }
    }

    /// Operations that carry an update payload.
    pub fn is_update(&self) -> bool {
        matches!(
            self,
            HookOp::FindOneAndUpdate | HookOp::Update | HookOp::UpdateOne | HookOp::UpdateMany
        )
    }
}

impl fmt::Display for HookOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the model that started an operation.
///
/// A tenant-bound model passes its tenant context here; the unbound base
/// model passes none.
#[derive(Debug, Clone)]
pub struct Invoker {
    pub model_name: String,
    pub tenant: Option<TenantContext>,
}

impl Invoker {
    pub fn unbound(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            tenant: None,
        }
    }

    pub fn bound(model_name: impl Into<String>, tenant: TenantContext) -> Self {
        Self {
            model_name: model_name.into(),
            tenant: Some(tenant),
        }
    }

    pub fn has_tenant_context(&self) -> bool {
        self.tenant.is_some()
    }
}

/// Context passed to pre-hooks.
#[derive(Debug)]
pub struct HookContext {
    pub op: HookOp,
    pub invoker: Invoker,
    /// Active query conditions (empty for `save`).
    pub filter: Filter,
    /// Update payload for update operations.
    pub update: Option<Update>,
    /// Document being written by `save`.
    pub document: Option<Document>,
    proceeded: bool,
}

impl HookContext {
    pub fn for_query(op: HookOp, invoker: Invoker, filter: Filter) -> Self {
        Self {
            op,
            invoker,
            filter,
            update: None,
            document: None,
            proceeded: false,
        }
    }

    pub fn for_update(op: HookOp, invoker: Invoker, filter: Filter, update: Update) -> Self {
        Self {
            update: Some(update),
            ..Self::for_query(op, invoker, filter)
        }
    }

    pub fn for_save(invoker: Invoker, document: Document) -> Self {
        Self {
            document: Some(document),
            ..Self::for_query(HookOp::Save, invoker, Filter::new())
        }
    }

    /// Did the chain run to completion?
    pub fn proceeded(&self) -> bool {
        self.proceeded
    }
}

/// A pre-operation hook.
#[async_trait]
pub trait DogPreHook: Send + Sync {
    async fn run(&self, ctx: &mut HookContext, next: Next<'_>) -> Result<()>;
}

/// Continuation into the remaining hooks of a chain.
pub struct Next<'a> {
    hooks: &'a [Arc<dyn DogPreHook>],
}

impl<'a> Next<'a> {
    pub fn new(hooks: &'a [Arc<dyn DogPreHook>]) -> Self {
        Self { hooks }
    }

    /// Run the rest of the chain.
    pub async fn run(self, ctx: &mut HookContext) -> Result<()> {
        match self.hooks.split_first() {
            Some((hook, rest)) => hook.run(ctx, Next { hooks: rest }).await,
            None => {
                ctx.proceeded = true;
                Ok(())
            }
        }
    }
}

/// Per-operation hook lists, in registration order.
#[derive(Clone, Default)]
pub struct PreHooks {
    by_op: std::collections::BTreeMap<HookOp, Vec<Arc<dyn DogPreHook>>>,
}

impl PreHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, op: HookOp, hook: Arc<dyn DogPreHook>) {
        self.by_op.entry(op).or_default().push(hook);
    }

    pub fn for_op(&self, op: HookOp) -> &[Arc<dyn DogPreHook>] {
        self.by_op.get(&op).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, op: HookOp) -> usize {
        self.for_op(op).len()
    }

    /// Run the chain for `ctx.op`. Errors if a hook stopped the chain.
    pub async fn run(&self, ctx: &mut HookContext) -> Result<()> {
        let hooks = self.for_op(ctx.op);
        Next::new(hooks).run(ctx).await?;
        if !ctx.proceeded {
            tracing::warn!(op = %ctx.op, model = %ctx.invoker.model_name, "pre hook chain did not proceed");
            return Err(crate::errors::DogError::general_error(format!(
                "pre hook chain for '{}' did not proceed",
                ctx.op
            ))
            .into_anyhow());
        }
        Ok(())
    }
}

impl fmt::Debug for PreHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        for (op, hooks) in &self.by_op {
            m.entry(op, &hooks.len());
        }
        m.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SetField(&'static str);

    #[async_trait]
    impl DogPreHook for SetField {
        async fn run(&self, ctx: &mut HookContext, next: Next<'_>) -> Result<()> {
            ctx.filter.set(self.0, json!(true));
            next.run(ctx).await
        }
    }

    struct Stop;

    #[async_trait]
    impl DogPreHook for Stop {
        async fn run(&self, _ctx: &mut HookContext, _next: Next<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn chain_runs_in_order() {
        let mut hooks = PreHooks::new();
        hooks.add(HookOp::Find, Arc::new(SetField("a")));
        hooks.add(HookOp::Find, Arc::new(SetField("b")));

        let mut ctx = HookContext::for_query(HookOp::Find, Invoker::unbound("m"), Filter::new());
        hooks.run(&mut ctx).await.unwrap();

        assert!(ctx.proceeded());
        assert_eq!(ctx.filter.len(), 2);
    }

    #[tokio::test]
    async fn stopped_chain_is_an_error() {
        let mut hooks = PreHooks::new();
        hooks.add(HookOp::Count, Arc::new(Stop));
        hooks.add(HookOp::Count, Arc::new(SetField("never")));

        let mut ctx = HookContext::for_query(HookOp::Count, Invoker::unbound("m"), Filter::new());
        assert!(hooks.run(&mut ctx).await.is_err());
        assert!(ctx.filter.is_empty());
    }

    #[tokio::test]
    async fn empty_chain_proceeds() {
        let hooks = PreHooks::new();
        let mut ctx = HookContext::for_save(Invoker::unbound("m"), Document::new());
        hooks.run(&mut ctx).await.unwrap();
        assert!(ctx.proceeded());
    }
}
