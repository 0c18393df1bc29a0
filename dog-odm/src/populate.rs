//! Reference population.
//!
//! Replaces reference ids stored at a `Ref` path with the referenced
//! documents. The referenced model is resolved through the calling model's
//! `db()`, so a model bound to some context resolves references through
//! models bound to the same context.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::{json, Value};
use tracing::debug;

use crate::document::{get_path, set_path, Document, Filter, ID_FIELD};
use crate::errors::DogError;
use crate::model::{Model, Queryable};
use crate::schema::FieldType;

/// Populate `path` on every document in `docs`.
///
/// Ids with no visible referenced document become `null`.
pub async fn populate(model: &dyn Model, docs: &mut [Document], path: &str) -> Result<()> {
    let target = match model.schema().path(path).map(|f| &f.kind) {
        Some(FieldType::Ref(target)) => target.clone(),
        _ => {
            return Err(DogError::bad_request(format!(
                "Cannot populate path `{path}` of model '{}': not a reference",
                model.model_name()
            ))
            .into_anyhow())
        }
    };

    let mut ids: Vec<Value> = Vec::new();
    for doc in docs.iter() {
        if let Some(id) = get_path(doc, path) {
            if !id.is_null() && !id.is_object() && !ids.contains(id) {
                ids.push(id.clone());
            }
        }
    }
    if ids.is_empty() {
        return Ok(());
    }

    let referenced = model.db()?.model(&target)?;
    let found = referenced
        .find(Filter::new().with(ID_FIELD, json!({ "$in": ids })))
        .await?;
    debug!(model = model.model_name(), path, target = %target, found = found.len(), "populate");

    let by_id: HashMap<String, Document> = found
        .into_iter()
        .filter_map(|d| d.get(ID_FIELD).map(|id| (id.to_string(), d.clone())))
        .collect();

    for doc in docs.iter_mut() {
        let Some(id) = get_path(doc, path).cloned() else {
            continue;
        };
        if id.is_null() || id.is_object() {
            continue;
        }
        let replacement = by_id
            .get(&id.to_string())
            .cloned()
            .map(Value::Object)
            .unwrap_or(Value::Null);
        set_path(doc, path, replacement)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BulkWritable;
    use crate::schema::{FieldDef, Schema};
    use crate::Connection;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn replaces_ids_with_documents() {
        let conn = Connection::new();
        let authors = conn
            .compile("Author", Schema::new().field(FieldDef::new("name", FieldType::String)))
            .unwrap();
        let posts = conn
            .compile(
                "Post",
                Schema::new().field(FieldDef::new("author", FieldType::Ref("Author".into()))),
            )
            .unwrap();

        let ann = authors.save(doc(json!({"name": "ann"}))).await.unwrap();
        posts
            .save(doc(json!({"author": ann["_id"].clone()})))
            .await
            .unwrap();
        posts.save(doc(json!({"author": "missing"}))).await.unwrap();

        let mut found = posts.find(Filter::new()).await.unwrap();
        populate(posts.as_ref(), &mut found, "author").await.unwrap();

        assert_eq!(found[0]["author"]["name"], json!("ann"));
        assert_eq!(found[1]["author"], Value::Null);
    }

    #[tokio::test]
    async fn non_reference_path_is_rejected() {
        let conn = Connection::new();
        let posts = conn
            .compile("Post", Schema::new().field(FieldDef::new("title", FieldType::String)))
            .unwrap();
        let mut docs = vec![doc(json!({"title": "x"}))];
        let err = populate(posts.as_ref(), &mut docs, "title").await.unwrap_err();
        assert_eq!(DogError::kind_of(&err), crate::ErrorKind::BadRequest);
    }
}
