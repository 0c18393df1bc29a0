//! Tenant-bound models.
//!
//! A `TenantModel` wraps a base model and a tenant. Hookable operations
//! delegate to the base model with the bound invoker, so the schema's
//! scoping hooks see the tenant. Operations the host never hooks
//! (`aggregate`, `insert_many`, the deletes) are scoped here directly.

use std::fmt;
use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use dog_odm::{
    Aggregatable, BaseModel, BulkWritable, DeleteResult, Docs, Document, DogError, Filter, HookOp,
    Instance, Invoker, Model, ModelLookup, Pipeline, Queryable, Schema, Stage, TenantContext,
    TenantId, Update, UpdateResult,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::compat::TenantConnection;
use crate::options::TenantOptions;
use crate::plugin::TenantPlugin;

pub struct TenantModel {
    base: Arc<BaseModel>,
    tenant: TenantContext,
    invoker: Invoker,
    tenant_id_key: String,
    db: Arc<TenantConnection>,
    me: Weak<TenantModel>,
}

impl TenantModel {
    /// Bind `base` to `tenant`.
    pub fn bind(base: &Arc<BaseModel>, tenant: TenantId, options: &TenantOptions) -> Result<Arc<Self>> {
        let tenant = TenantContext::new(tenant);
        let db = Arc::new(TenantConnection::new(
            base.connection()?,
            tenant.clone(),
            options.clone(),
        ));
        debug!(model = base.name(), tenant = %tenant.tenant_id, "binding model to tenant");
        Ok(Arc::new_cyclic(|me| Self {
            base: base.clone(),
            invoker: Invoker::bound(base.name(), tenant.clone()),
            tenant,
            tenant_id_key: options.tenant_id_key.clone(),
            db,
            me: me.clone(),
        }))
    }

    pub fn base(&self) -> &Arc<BaseModel> {
        &self.base
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant.tenant_id
    }

    fn tenant_value(&self) -> Value {
        self.tenant.tenant_id.as_value().clone()
    }

    fn scope(&self, filter: Option<Filter>) -> Filter {
        let mut filter = filter.unwrap_or_default();
        filter.set(self.tenant_id_key.clone(), self.tenant_value());
        filter
    }

    fn scope_pipeline(&self, pipeline: Option<Pipeline>) -> Pipeline {
        let mut pipeline = pipeline.unwrap_or_default();
        match pipeline.first_mut() {
            Some(Stage::Match(filter)) => {
                filter.set(self.tenant_id_key.clone(), self.tenant_value());
            }
            _ => pipeline.prepend(Stage::Match(self.scope(None))),
        }
        pipeline
    }

    fn arc(&self) -> Result<Arc<TenantModel>> {
        self.me.upgrade().ok_or_else(|| {
            DogError::general_error(format!("bound model '{}' has been dropped", self.base.name()))
                .into_anyhow()
        })
    }
}

#[async_trait]
impl Queryable for TenantModel {
    async fn find(&self, filter: Filter) -> Result<Vec<Document>> {
        self.base.find_as(&self.invoker, filter).await
    }

    async fn find_one(&self, filter: Filter) -> Result<Option<Document>> {
        self.base.find_one_as(&self.invoker, filter).await
    }

    async fn find_one_and_update(&self, filter: Filter, update: Update) -> Result<Option<Document>> {
        self.base
            .find_one_and_update_as(&self.invoker, filter, update)
            .await
    }

    async fn find_one_and_remove(&self, filter: Filter) -> Result<Option<Document>> {
        self.base.find_one_and_remove_as(&self.invoker, filter).await
    }

    async fn count(&self, filter: Filter) -> Result<u64> {
        self.base.count_as(HookOp::Count, &self.invoker, filter).await
    }

    async fn count_documents(&self, filter: Filter) -> Result<u64> {
        self.base
            .count_as(HookOp::CountDocuments, &self.invoker, filter)
            .await
    }

    async fn update(&self, filter: Filter, update: Update) -> Result<UpdateResult> {
        self.base
            .update_as(HookOp::Update, &self.invoker, filter, update)
            .await
    }

    async fn update_one(&self, filter: Filter, update: Update) -> Result<UpdateResult> {
        self.base
            .update_as(HookOp::UpdateOne, &self.invoker, filter, update)
            .await
    }

    async fn update_many(&self, filter: Filter, update: Update) -> Result<UpdateResult> {
        self.base
            .update_as(HookOp::UpdateMany, &self.invoker, filter, update)
            .await
    }

    async fn delete_one(&self, filter: Option<Filter>) -> Result<DeleteResult> {
        self.base.delete_as(Some(self.scope(filter)), false).await
    }

    async fn delete_many(&self, filter: Option<Filter>) -> Result<DeleteResult> {
        self.base.delete_as(Some(self.scope(filter)), true).await
    }

    async fn remove(&self, filter: Option<Filter>) -> Result<DeleteResult> {
        self.base.delete_as(Some(self.scope(filter)), true).await
    }
}

#[async_trait]
impl Aggregatable for TenantModel {
    async fn aggregate(&self, pipeline: Option<Pipeline>) -> Result<Vec<Document>> {
        self.base
            .aggregate_as(Some(self.scope_pipeline(pipeline)))
            .await
    }
}

#[async_trait]
impl BulkWritable for TenantModel {
    async fn insert_many(&self, mut docs: Docs) -> Result<Vec<Instance>> {
        let this = self.handle()?;
        let value = self.tenant_value();
        docs.for_each_mut(|doc| {
            doc.insert(self.tenant_id_key.clone(), value.clone());
        });
        let inserted = self.base.insert_many_as(docs).await?;
        Ok(inserted
            .into_iter()
            .map(|d| Instance::new(this.clone(), d))
            .collect())
    }

    async fn save(&self, doc: Document) -> Result<Document> {
        self.base.save_as(&self.invoker, doc).await
    }

    async fn create(&self, doc: Document) -> Result<Instance> {
        let this = self.handle()?;
        let saved = self.base.save_as(&self.invoker, doc).await?;
        Ok(Instance::new(this, saved))
    }
}

impl Model for TenantModel {
    fn model_name(&self) -> &str {
        self.base.name()
    }

    fn collection_name(&self) -> &str {
        self.base.collection_name()
    }

    fn schema(&self) -> &Arc<Schema> {
        self.base.schema()
    }

    fn tenant(&self) -> Option<&TenantContext> {
        Some(&self.tenant)
    }

    fn db(&self) -> Result<Arc<dyn ModelLookup>> {
        let db: Arc<dyn ModelLookup> = self.db.clone();
        Ok(db)
    }

    fn discriminator_names(&self) -> Vec<String> {
        self.base.discriminator_names()
    }

    /// The discriminator, bound to this model's tenant.
    fn discriminator(&self, name: &str) -> Option<Arc<dyn Model>> {
        let (_, child) = self
            .base
            .discriminators()
            .into_iter()
            .find(|(n, _)| n == name)?;
        let bound: Arc<dyn Model> = match TenantPlugin::of(child.schema()) {
            Some(plugin) => match plugin.bind(&child, self.tenant_id().clone()) {
                Ok(bound) => bound,
                Err(err) => {
                    warn!(discriminator = name, error = %err, "failed to bind discriminator to tenant");
                    return None;
                }
            },
            None => child,
        };
        Some(bound)
    }

    fn handle(&self) -> Result<Arc<dyn Model>> {
        let this: Arc<dyn Model> = self.arc()?;
        Ok(this)
    }
}

impl fmt::Debug for TenantModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantModel")
            .field("model", &self.base.name())
            .field("tenant", &self.tenant.tenant_id)
            .field("tenant_id_key", &self.tenant_id_key)
            .finish()
    }
}
