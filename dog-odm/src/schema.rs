//! # Schemas
//!
//! A `Schema` declares fields, indexes, pre-hooks and named accessors.
//! It is mutable while the application (and its plugins) set it up, and
//! frozen behind an `Arc` once a model is compiled from it.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{get_path, set_path, Document, Filter};
use crate::errors::DogError;
use crate::hooks::{DogPreHook, HookOp, PreHooks};
use crate::model::{BaseModel, Model};
use crate::pipeline::SortDirection;
use crate::tenant::TenantId;

/// Key tagging documents that belong to a discriminator model.
pub const DISCRIMINATOR_KEY: &str = "__t";

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    ObjectId,
    Date,
    Object,
    Array,
    Mixed,
    /// Reference to a document of another model (stores its `_id`).
    Ref(String),
}

impl FieldType {
    pub fn name(&self) -> &str {
        match self {
            FieldType::String => "String",
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
            FieldType::ObjectId => "ObjectId",
            FieldType::Date => "Date",
            FieldType::Object => "Object",
            FieldType::Array => "Array",
            FieldType::Mixed => "Mixed",
            FieldType::Ref(_) => "Ref",
        }
    }

    /// Does a stored value fit this type?
    pub fn accepts(&self, v: &Value) -> bool {
        match self {
            FieldType::String | FieldType::ObjectId => v.is_string(),
            FieldType::Number => v.is_number(),
            FieldType::Boolean => v.is_boolean(),
            FieldType::Date => v.is_string() || v.is_number(),
            FieldType::Object => v.is_object(),
            FieldType::Array => v.is_array(),
            FieldType::Mixed => true,
            // populated references hold the whole document
            FieldType::Ref(_) => v.is_string() || v.is_number() || v.is_object(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Ref(model) => write!(f, "Ref<{model}>"),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let t = match s.trim().to_ascii_lowercase().as_str() {
            "string" => FieldType::String,
            "number" => FieldType::Number,
            "boolean" | "bool" => FieldType::Boolean,
            "objectid" => FieldType::ObjectId,
            "date" => FieldType::Date,
            "object" => FieldType::Object,
            "array" => FieldType::Array,
            "mixed" => FieldType::Mixed,
            other => {
                return Err(
                    DogError::bad_request(format!("unknown field type: {other}")).into_anyhow()
                )
            }
        };
        Ok(t)
    }
}

/// Options shared by field-level and schema-level indexes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    pub unique: bool,
    pub sparse: bool,
    pub name: Option<String>,
    /// Keep this unique index global instead of scoping it per tenant.
    pub preserve_unique_key: bool,
    /// Only documents matching this filter are indexed.
    pub partial_filter: Option<Filter>,
}

impl IndexOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique() -> Self {
        Self {
            unique: true,
            ..Self::default()
        }
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn preserve_unique_key(mut self) -> Self {
        self.preserve_unique_key = true;
        self
    }

    pub fn partial(mut self, filter: Filter) -> Self {
        self.partial_filter = Some(filter);
        self
    }
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    /// Field-level index (`index: true` / `unique: true`).
    pub index: Option<IndexOptions>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            index: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn required_if(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn default_value(mut self, v: impl Into<Value>) -> Self {
        self.default = Some(v.into());
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = Some(IndexOptions::new());
        self
    }

    pub fn unique(mut self) -> Self {
        self.index = Some(IndexOptions::unique());
        self
    }

    pub fn with_index(mut self, options: IndexOptions) -> Self {
        self.index = Some(options);
        self
    }

    pub fn is_unique(&self) -> bool {
        self.index.as_ref().map(|i| i.unique).unwrap_or(false)
    }
}

/// A schema-level (possibly compound) index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub keys: Vec<(String, SortDirection)>,
    pub options: IndexOptions,
}

impl IndexSpec {
    pub fn new(keys: Vec<(String, SortDirection)>, options: IndexOptions) -> Self {
        Self { keys, options }
    }

    /// Ascending index over `fields`, in order.
    pub fn ascending<I, S>(fields: I, options: IndexOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: fields
                .into_iter()
                .map(|f| (f.into(), SortDirection::Asc))
                .collect(),
            options,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(k, _)| k.as_str())
    }

    /// Explicit name, or the store's default `field_1_other_-1`.
    pub fn name(&self) -> String {
        if let Some(name) = &self.options.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|(k, d)| match d {
                SortDirection::Asc => format!("{k}_1"),
                SortDirection::Desc => format!("{k}_-1"),
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// A named static entry point on every model compiled from a schema.
///
/// Plugins register accessors (e.g. a tenant binder) that application code
/// calls by name through `BaseModel::access`.
pub trait ModelAccessor: Send + Sync {
    fn access(&self, model: &Arc<BaseModel>, tenant: TenantId) -> Result<Arc<dyn Model>>;
}

/// Per-field validation messages (Feathers `errors` payload).
#[derive(Default)]
pub struct ValidationErrors {
    map: Map<String, Value>,
}

impl ValidationErrors {
    pub fn push_field(&mut self, field: &str, msg: impl Into<String>) {
        let msg = Value::String(msg.into());
        match self.map.get_mut(field) {
            Some(Value::Array(arr)) => arr.push(msg),
            _ => {
                self.map.insert(field.to_string(), Value::Array(vec![msg]));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn into_unprocessable_anyhow(self, message: &str) -> anyhow::Error {
        DogError::unprocessable(message)
            .with_errors(Value::Object(self.map))
            .into_anyhow()
    }
}

#[derive(Clone, Default)]
pub struct Schema {
    fields: Vec<FieldDef>,
    indexes: Vec<IndexSpec>,
    hooks: PreHooks,
    accessors: BTreeMap<String, Arc<dyn ModelAccessor>>,
    extensions: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field declaration.
    pub fn field(mut self, def: FieldDef) -> Self {
        self.add(def);
        self
    }

    /// Add (or redefine) a field.
    pub fn add(&mut self, def: FieldDef) {
        match self.fields.iter_mut().find(|f| f.name == def.name) {
            Some(existing) => *existing = def,
            None => self.fields.push(def),
        }
    }

    pub fn path(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn paths(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn paths_mut(&mut self) -> &mut [FieldDef] {
        &mut self.fields
    }

    /// Declare a schema-level index.
    pub fn index(&mut self, spec: IndexSpec) {
        self.indexes.push(spec);
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn indexes_mut(&mut self) -> &mut Vec<IndexSpec> {
        &mut self.indexes
    }

    /// Schema-level indexes plus one single-key index per indexed field.
    pub fn effective_indexes(&self) -> Vec<IndexSpec> {
        let mut all = self.indexes.clone();
        for f in &self.fields {
            if let Some(options) = &f.index {
                all.push(IndexSpec::ascending([f.name.clone()], options.clone()));
            }
        }
        all
    }

    /// Register a pre-hook for `op`.
    pub fn pre(&mut self, op: HookOp, hook: Arc<dyn DogPreHook>) {
        self.hooks.add(op, hook);
    }

    pub fn hooks(&self) -> &PreHooks {
        &self.hooks
    }

    pub fn register_accessor(&mut self, name: impl Into<String>, accessor: Arc<dyn ModelAccessor>) {
        self.accessors.insert(name.into(), accessor);
    }

    pub fn accessor(&self, name: &str) -> Option<&Arc<dyn ModelAccessor>> {
        self.accessors.get(name)
    }

    /// Attach plugin state under `key`.
    pub fn set_extension<T>(&mut self, key: impl Into<String>, value: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        self.extensions.insert(key.into(), value);
    }

    /// Typed lookup of plugin state. `None` if absent or of another type.
    pub fn extension<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let any = self.extensions.get(key)?.clone();
        any.downcast::<T>().ok()
    }

    /// Schema for a discriminator: this schema's fields, indexes, hooks and
    /// plugin state, extended by `child`.
    pub fn merged_with(&self, child: Schema) -> Schema {
        let mut merged = self.clone();
        for f in child.fields {
            merged.add(f);
        }
        merged.indexes.extend(child.indexes);
        for op in HookOp::ALL {
            for hook in child.hooks.for_op(op) {
                merged.hooks.add(op, hook.clone());
            }
        }
        merged.accessors.extend(child.accessors);
        merged.extensions.extend(child.extensions);
        merged.add(FieldDef::new(DISCRIMINATOR_KEY, FieldType::String));
        merged
    }

    /// Fill missing fields that declare a default.
    pub fn apply_defaults(&self, doc: &mut Document) -> Result<()> {
        for f in &self.fields {
            if let Some(default) = &f.default {
                if get_path(doc, &f.name).map(Value::is_null).unwrap_or(true) {
                    set_path(doc, &f.name, default.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Required-field and type checks. Failures are `Unprocessable` with a
    /// per-field `errors` map.
    pub fn validate(&self, model_name: &str, doc: &Document) -> Result<()> {
        let mut errors = ValidationErrors::default();
        for f in &self.fields {
            match get_path(doc, &f.name) {
                None | Some(Value::Null) => {
                    if f.required {
                        errors.push_field(&f.name, format!("Path `{}` is required.", f.name));
                    }
                }
                Some(v) if !f.kind.accepts(v) => {
                    errors.push_field(
                        &f.name,
                        format!("Cast to {} failed for value {v} at path `{}`", f.kind, f.name),
                    );
                }
                Some(_) => {}
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into_unprocessable_anyhow(&format!("{model_name} validation failed")))
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("fields", &self.fields)
            .field("indexes", &self.indexes)
            .field("hooks", &self.hooks)
            .field("accessors", &self.accessors.keys().collect::<Vec<_>>())
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}
