//! dog-odm: a small document mapper for DogRS.
//!
//! Schemas compile into models on a `Connection`; models run queries,
//! updates, aggregations and saves against an in-memory store. Schemas
//! carry pre-hook chains, named accessors and plugin state so plugins
//! (like `dog-tenant`) can reshape what a model does.

pub mod config;
pub mod connection;
pub mod document;
pub mod errors;
pub mod hooks;
pub mod model;
pub mod pipeline;
pub mod populate;
pub mod schema;
pub mod store;
pub mod tenant;

pub use config::{DogConfig, DogConfigSnapshot};
pub use connection::{Connection, ModelLookup};
pub use document::{Document, Filter, Update, ID_FIELD};
pub use errors::{DogError, ErrorKind};
pub use hooks::{DogPreHook, HookContext, HookOp, Invoker, Next, PreHooks};
pub use model::{Aggregatable, BaseModel, BulkWritable, Docs, Instance, Model, Queryable};
pub use pipeline::{Pipeline, SortDirection, Stage};
pub use populate::populate;
pub use schema::{
    FieldDef, FieldType, IndexOptions, IndexSpec, ModelAccessor, Schema, DISCRIMINATOR_KEY,
};
pub use store::{DeleteResult, MemoryStore, UpdateResult};
pub use tenant::{TenantContext, TenantId};
