//! # Models
//!
//! A model is the operation surface over one collection. The surface is split
//! into capability traits so wrappers (e.g. tenant-bound models) can
//! implement the exact same interface as `BaseModel`:
//!
//! - `Queryable`    → find / count / update / delete
//! - `Aggregatable` → aggregation pipelines
//! - `BulkWritable` → save / create / insert_many
//! - `Model`        → identity, schema, connection handle, discriminators
//!
//! `BaseModel` exposes `*_as` variants that take the calling model's
//! `Invoker`, so a wrapper can delegate while keeping its own identity
//! visible to pre-hooks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::connection::{Connection, ConnectionInner, ModelLookup};
use crate::document::{new_object_id, Document, Filter, Update, ID_FIELD};
use crate::errors::DogError;
use crate::hooks::{HookContext, HookOp, Invoker};
use crate::pipeline::{Pipeline, Stage};
use crate::schema::{IndexSpec, Schema, DISCRIMINATOR_KEY};
use crate::store::{DeleteResult, MemoryStore, UpdateResult};
use crate::tenant::{TenantContext, TenantId};

/// Input of `insert_many`: one document or an ordered batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Docs {
    One(Document),
    Many(Vec<Document>),
}

impl Docs {
    pub fn into_vec(self) -> Vec<Document> {
        match self {
            Docs::One(d) => vec![d],
            Docs::Many(v) => v,
        }
    }

    /// Visit every document.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut Document)) {
        match self {
            Docs::One(d) => f(d),
            Docs::Many(v) => v.iter_mut().for_each(f),
        }
    }
}

impl From<Document> for Docs {
    fn from(d: Document) -> Self {
        Docs::One(d)
    }
}

impl From<Vec<Document>> for Docs {
    fn from(v: Vec<Document>) -> Self {
        Docs::Many(v)
    }
}

#[async_trait]
pub trait Queryable: Send + Sync {
    async fn find(&self, filter: Filter) -> Result<Vec<Document>>;

    async fn find_one(&self, filter: Filter) -> Result<Option<Document>>;

    async fn find_by_id(&self, id: Value) -> Result<Option<Document>> {
        self.find_one(Filter::new().with(ID_FIELD, id)).await
    }

    /// Update the first match; returns the updated document.
    async fn find_one_and_update(&self, filter: Filter, update: Update) -> Result<Option<Document>>;

    /// Remove the first match; returns the removed document.
    async fn find_one_and_remove(&self, filter: Filter) -> Result<Option<Document>>;

    async fn count(&self, filter: Filter) -> Result<u64>;

    async fn count_documents(&self, filter: Filter) -> Result<u64>;

    /// Legacy single-document update.
    async fn update(&self, filter: Filter, update: Update) -> Result<UpdateResult>;

    async fn update_one(&self, filter: Filter, update: Update) -> Result<UpdateResult>;

    async fn update_many(&self, filter: Filter, update: Update) -> Result<UpdateResult>;

    /// `None` means "no conditions".
    async fn delete_one(&self, filter: Option<Filter>) -> Result<DeleteResult>;

    async fn delete_many(&self, filter: Option<Filter>) -> Result<DeleteResult>;

    /// Legacy remove: deletes every match.
    async fn remove(&self, filter: Option<Filter>) -> Result<DeleteResult>;
}

#[async_trait]
pub trait Aggregatable: Send + Sync {
    /// `None` runs an empty pipeline (every document).
    async fn aggregate(&self, pipeline: Option<Pipeline>) -> Result<Vec<Document>>;
}

#[async_trait]
pub trait BulkWritable: Send + Sync {
    /// Insert without save hooks; documents are validated first.
    async fn insert_many(&self, docs: Docs) -> Result<Vec<Instance>>;

    /// Insert or replace by `_id`, running save hooks and validation.
    async fn save(&self, doc: Document) -> Result<Document>;

    /// Save a new document and wrap it in an instance of this model.
    async fn create(&self, doc: Document) -> Result<Instance>;
}

pub trait Model: Queryable + Aggregatable + BulkWritable {
    fn model_name(&self) -> &str;

    fn collection_name(&self) -> &str;

    fn schema(&self) -> &Arc<Schema>;

    /// Tenant this model is bound to, if any.
    fn tenant(&self) -> Option<&TenantContext> {
        None
    }

    fn has_tenant_context(&self) -> bool {
        self.tenant().is_some()
    }

    /// Connection handle used to resolve other models by name.
    fn db(&self) -> Result<Arc<dyn ModelLookup>>;

    fn discriminator_names(&self) -> Vec<String>;

    fn discriminator(&self, name: &str) -> Option<Arc<dyn Model>>;

    /// This model as a shared handle.
    fn handle(&self) -> Result<Arc<dyn Model>>;
}

/// A document together with the model that produced it.
#[derive(Clone)]
pub struct Instance {
    doc: Document,
    model: Arc<dyn Model>,
}

impl Instance {
    pub fn new(model: Arc<dyn Model>, doc: Document) -> Self {
        Self { doc, model }
    }

    pub fn id(&self) -> Option<&Value> {
        self.doc.get(ID_FIELD)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        crate::document::get_path(&self.doc, path)
    }

    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        crate::document::set_path(&mut self.doc, path, value.into())
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    pub fn has_tenant_context(&self) -> bool {
        self.model.has_tenant_context()
    }

    /// Persist through the owning model (and its hooks).
    pub async fn save(&mut self) -> Result<()> {
        self.doc = self.model.save(self.doc.clone()).await?;
        Ok(())
    }

    pub async fn remove(&self) -> Result<DeleteResult> {
        let id = self.id().cloned().ok_or_else(|| {
            DogError::bad_request("cannot remove a document without _id").into_anyhow()
        })?;
        self.model
            .delete_one(Some(Filter::new().with(ID_FIELD, id)))
            .await
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.model.model_name())
            .field("tenant", &self.model.tenant())
            .field("doc", &self.doc)
            .finish()
    }
}

/// A model compiled from a schema, executing against the store.
pub struct BaseModel {
    name: String,
    collection: String,
    schema: Arc<Schema>,
    indexes: Vec<IndexSpec>,
    /// Tag value when this is a discriminator of another model.
    discriminator_value: Option<String>,
    discriminators: RwLock<BTreeMap<String, Arc<BaseModel>>>,
    store: Arc<MemoryStore>,
    db: Weak<ConnectionInner>,
    me: Weak<BaseModel>,
}

impl BaseModel {
    pub(crate) fn compile(
        name: String,
        collection: String,
        schema: Arc<Schema>,
        discriminator_value: Option<String>,
        store: Arc<MemoryStore>,
        db: Weak<ConnectionInner>,
    ) -> Arc<Self> {
        let indexes = schema.effective_indexes();
        Arc::new_cyclic(|me| Self {
            name,
            collection,
            schema,
            indexes,
            discriminator_value,
            discriminators: RwLock::new(BTreeMap::new()),
            store,
            db,
            me: me.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Indexes enforced by the store for writes through this model.
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn connection(&self) -> Result<Connection> {
        Connection::from_weak(&self.db)
    }

    fn invoker(&self) -> Invoker {
        Invoker::unbound(self.name.clone())
    }

    fn arc(&self) -> Result<Arc<BaseModel>> {
        self.me.upgrade().ok_or_else(|| {
            DogError::general_error(format!("model '{}' has been dropped", self.name)).into_anyhow()
        })
    }

    /// Call a named accessor registered on the schema (e.g. a tenant binder).
    pub fn access(&self, accessor: &str, tenant: impl Into<TenantId>) -> Result<Arc<dyn Model>> {
        let found = self.schema.accessor(accessor).ok_or_else(|| {
            DogError::not_found(format!(
                "model '{}' has no accessor named '{accessor}'",
                self.name
            ))
            .into_anyhow()
        })?;
        found.access(&self.arc()?, tenant.into())
    }

    /// Register a discriminator sharing this model's collection.
    ///
    /// The child's schema inherits this schema's fields, indexes, hooks and
    /// plugin state. The child is also registered on the connection.
    pub fn discriminator_model(&self, name: &str, child: Schema) -> Result<Arc<BaseModel>> {
        if self.discriminators.read().contains_key(name) {
            return Err(DogError::conflict(format!(
                "Discriminator with name \"{name}\" already exists"
            ))
            .into_anyhow());
        }

        let schema = Arc::new(self.schema.merged_with(child));
        let model = BaseModel::compile(
            name.to_string(),
            self.collection.clone(),
            schema,
            Some(name.to_string()),
            self.store.clone(),
            self.db.clone(),
        );
        self.connection()?.register(model.clone())?;
        self.discriminators
            .write()
            .insert(name.to_string(), model.clone());
        debug!(model = %self.name, discriminator = name, "registered discriminator");
        Ok(model)
    }

    /// Discriminator models keyed by name.
    pub fn discriminators(&self) -> Vec<(String, Arc<BaseModel>)> {
        self.discriminators
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn scoped(&self, mut filter: Filter) -> Filter {
        if let Some(tag) = &self.discriminator_value {
            filter.set(DISCRIMINATOR_KEY, tag.clone());
        }
        filter
    }

    fn prepare(&self, mut doc: Document) -> Result<Document> {
        self.schema.apply_defaults(&mut doc)?;
        if let Some(tag) = &self.discriminator_value {
            doc.insert(DISCRIMINATOR_KEY.to_string(), Value::String(tag.clone()));
        }
        Ok(doc)
    }

    async fn query_hooks(&self, op: HookOp, invoker: &Invoker, filter: Filter) -> Result<Filter> {
        let mut ctx = HookContext::for_query(op, invoker.clone(), filter);
        self.schema.hooks().run(&mut ctx).await?;
        Ok(self.scoped(ctx.filter))
    }

    async fn update_hooks(
        &self,
        op: HookOp,
        invoker: &Invoker,
        filter: Filter,
        update: Update,
    ) -> Result<(Filter, Update)> {
        let mut ctx = HookContext::for_update(op, invoker.clone(), filter, update);
        self.schema.hooks().run(&mut ctx).await?;
        let update = ctx.update.take().unwrap_or_default();
        Ok((self.scoped(ctx.filter), update))
    }

    pub async fn find_as(&self, invoker: &Invoker, filter: Filter) -> Result<Vec<Document>> {
        let filter = self.query_hooks(HookOp::Find, invoker, filter).await?;
        self.store.find(&self.collection, &filter, None)
    }

    pub async fn find_one_as(&self, invoker: &Invoker, filter: Filter) -> Result<Option<Document>> {
        let filter = self.query_hooks(HookOp::FindOne, invoker, filter).await?;
        Ok(self.store.find(&self.collection, &filter, Some(1))?.into_iter().next())
    }

    pub async fn find_one_and_update_as(
        &self,
        invoker: &Invoker,
        filter: Filter,
        update: Update,
    ) -> Result<Option<Document>> {
        let (filter, update) = self
            .update_hooks(HookOp::FindOneAndUpdate, invoker, filter, update)
            .await?;
        let (_, updated) = self
            .store
            .update(&self.collection, &filter, &update, false, &self.indexes)?;
        Ok(updated.into_iter().next())
    }

    pub async fn find_one_and_remove_as(
        &self,
        invoker: &Invoker,
        filter: Filter,
    ) -> Result<Option<Document>> {
        let filter = self
            .query_hooks(HookOp::FindOneAndRemove, invoker, filter)
            .await?;
        Ok(self.store.delete(&self.collection, &filter, false)?.into_iter().next())
    }

    /// `op` is `Count` or `CountDocuments`.
    pub async fn count_as(&self, op: HookOp, invoker: &Invoker, filter: Filter) -> Result<u64> {
        let filter = self.query_hooks(op, invoker, filter).await?;
        self.store.count(&self.collection, &filter)
    }

    /// `op` is `Update`, `UpdateOne` or `UpdateMany`.
    pub async fn update_as(
        &self,
        op: HookOp,
        invoker: &Invoker,
        filter: Filter,
        update: Update,
    ) -> Result<UpdateResult> {
        let (filter, update) = self.update_hooks(op, invoker, filter, update).await?;
        let multi = op == HookOp::UpdateMany;
        let (result, _) = self
            .store
            .update(&self.collection, &filter, &update, multi, &self.indexes)?;
        debug!(model = %self.name, %op, matched = result.matched_count, "update");
        Ok(result)
    }

    /// Not hooked: callers that need scoping must rewrite `filter` first.
    pub async fn delete_as(&self, filter: Option<Filter>, multi: bool) -> Result<DeleteResult> {
        let filter = self.scoped(filter.unwrap_or_default());
        let removed = self.store.delete(&self.collection, &filter, multi)?;
        Ok(DeleteResult {
            deleted_count: removed.len() as u64,
        })
    }

    /// Not hooked: callers that need scoping must rewrite `pipeline` first.
    pub async fn aggregate_as(&self, pipeline: Option<Pipeline>) -> Result<Vec<Document>> {
        let mut pipeline = pipeline.unwrap_or_default();
        if let Some(tag) = &self.discriminator_value {
            pipeline.prepend(Stage::Match(
                Filter::new().with(DISCRIMINATOR_KEY, tag.clone()),
            ));
        }
        pipeline.run(self.store.scan(&self.collection))
    }

    /// Not hooked. Validates every document, then inserts in order.
    pub async fn insert_many_as(&self, docs: Docs) -> Result<Vec<Document>> {
        let mut prepared = Vec::new();
        for doc in docs.into_vec() {
            let doc = self.prepare(doc)?;
            self.schema.validate(&self.name, &doc)?;
            prepared.push(doc);
        }
        self.store.insert(&self.collection, prepared, &self.indexes)
    }

    /// Replaces the stored document with the same `_id` only when it also
    /// matches the hooked filter; otherwise inserts, so a foreign `_id`
    /// surfaces as a duplicate key.
    pub async fn save_as(&self, invoker: &Invoker, doc: Document) -> Result<Document> {
        let mut doc = self.prepare(doc)?;
        let id = doc
            .entry(ID_FIELD.to_string())
            .or_insert_with(new_object_id)
            .clone();
        let mut ctx = HookContext::for_save(invoker.clone(), doc);
        ctx.filter.set(ID_FIELD, id);
        self.schema.hooks().run(&mut ctx).await?;
        let doc = ctx.document.take().unwrap_or_default();
        let filter = self.scoped(ctx.filter);
        self.schema.validate(&self.name, &doc)?;
        self.store
            .replace_or_insert(&self.collection, &filter, doc, &self.indexes)
    }
}

#[async_trait]
impl Queryable for BaseModel {
    async fn find(&self, filter: Filter) -> Result<Vec<Document>> {
        self.find_as(&self.invoker(), filter).await
    }

    async fn find_one(&self, filter: Filter) -> Result<Option<Document>> {
        self.find_one_as(&self.invoker(), filter).await
    }

    async fn find_one_and_update(&self, filter: Filter, update: Update) -> Result<Option<Document>> {
        self.find_one_and_update_as(&self.invoker(), filter, update).await
    }

    async fn find_one_and_remove(&self, filter: Filter) -> Result<Option<Document>> {
        self.find_one_and_remove_as(&self.invoker(), filter).await
    }

    async fn count(&self, filter: Filter) -> Result<u64> {
        self.count_as(HookOp::Count, &self.invoker(), filter).await
    }

    async fn count_documents(&self, filter: Filter) -> Result<u64> {
        self.count_as(HookOp::CountDocuments, &self.invoker(), filter).await
    }

    async fn update(&self, filter: Filter, update: Update) -> Result<UpdateResult> {
        self.update_as(HookOp::Update, &self.invoker(), filter, update).await
    }

    async fn update_one(&self, filter: Filter, update: Update) -> Result<UpdateResult> {
        self.update_as(HookOp::UpdateOne, &self.invoker(), filter, update).await
    }

    async fn update_many(&self, filter: Filter, update: Update) -> Result<UpdateResult> {
        self.update_as(HookOp::UpdateMany, &self.invoker(), filter, update).await
    }

    async fn delete_one(&self, filter: Option<Filter>) -> Result<DeleteResult> {
        self.delete_as(filter, false).await
    }

    async fn delete_many(&self, filter: Option<Filter>) -> Result<DeleteResult> {
        self.delete_as(filter, true).await
    }

    async fn remove(&self, filter: Option<Filter>) -> Result<DeleteResult> {
        self.delete_as(filter, true).await
    }
}

#[async_trait]
impl Aggregatable for BaseModel {
    async fn aggregate(&self, pipeline: Option<Pipeline>) -> Result<Vec<Document>> {
        self.aggregate_as(pipeline).await
    }
}

#[async_trait]
impl BulkWritable for BaseModel {
    async fn insert_many(&self, docs: Docs) -> Result<Vec<Instance>> {
        let this = self.handle()?;
        let inserted = self.insert_many_as(docs).await?;
        Ok(inserted
            .into_iter()
            .map(|d| Instance::new(this.clone(), d))
            .collect())
    }

    async fn save(&self, doc: Document) -> Result<Document> {
        self.save_as(&self.invoker(), doc).await
    }

    async fn create(&self, doc: Document) -> Result<Instance> {
        let this = self.handle()?;
        let saved = self.save_as(&self.invoker(), doc).await?;
        Ok(Instance::new(this, saved))
    }
}

impl Model for BaseModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn collection_name(&self) -> &str {
        &self.collection
    }

    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn db(&self) -> Result<Arc<dyn ModelLookup>> {
        let conn: Arc<dyn ModelLookup> = Arc::new(self.connection()?);
        Ok(conn)
    }

    fn discriminator_names(&self) -> Vec<String> {
        self.discriminators.read().keys().cloned().collect()
    }

    fn discriminator(&self, name: &str) -> Option<Arc<dyn Model>> {
        self.discriminators
            .read()
            .get(name)
            .map(|m| m.clone() as Arc<dyn Model>)
    }

    fn handle(&self) -> Result<Arc<dyn Model>> {
        let this: Arc<dyn Model> = self.arc()?;
        Ok(this)
    }
}

impl fmt::Debug for BaseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseModel")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("discriminator", &self.discriminator_value)
            .finish()
    }
}

impl fmt::Debug for dyn Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.model_name())
            .field("collection", &self.collection_name())
            .finish()
    }
}
