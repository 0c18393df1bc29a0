//! In-memory document store.
//!
//! Collections are vectors of documents behind one lock. Every write holds
//! the write lock for the whole operation, so unique-index checks and the
//! write itself are atomic with respect to other writers.

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::document::{get_path, new_object_id, Document, Filter, Update, ID_FIELD};
use crate::errors::DogError;
use crate::schema::IndexSpec;

/// Outcome of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

fn index_key(index: &IndexSpec, doc: &Document) -> Result<Option<Vec<Value>>> {
    if let Some(partial) = &index.options.partial_filter {
        if !partial.matches(doc)? {
            return Ok(None);
        }
    }
    let mut key = Vec::with_capacity(index.keys.len());
    for field in index.fields() {
        match get_path(doc, field) {
            Some(v) => key.push(v.clone()),
            None if index.options.sparse => return Ok(None),
            None => key.push(Value::Null),
        }
    }
    Ok(Some(key))
}

fn duplicate_key(collection: &str, index: &str, dup: Map<String, Value>) -> anyhow::Error {
    DogError::conflict(format!(
        "E11000 duplicate key error collection: {collection} index: {index} dup key: {}",
        Value::Object(dup.clone())
    ))
    .with_data(serde_json::json!({ "index": index, "keyValue": dup }))
    .into_anyhow()
}

/// Reject `candidate` if it collides with any document in `existing`
/// (other than the one at `skip`) on `_id` or a unique index.
fn check_unique(
    collection: &str,
    existing: &[Document],
    skip: Option<usize>,
    candidate: &Document,
    indexes: &[IndexSpec],
) -> Result<()> {
    if let Some(id) = candidate.get(ID_FIELD) {
        let taken = existing
            .iter()
            .enumerate()
            .any(|(pos, other)| Some(pos) != skip && other.get(ID_FIELD) == Some(id));
        if taken {
            let dup = Map::from_iter([(ID_FIELD.to_string(), id.clone())]);
            return Err(duplicate_key(collection, "_id_", dup));
        }
    }
    for index in indexes.iter().filter(|i| i.options.unique) {
        let Some(key) = index_key(index, candidate)? else {
            continue;
        };
        for (pos, other) in existing.iter().enumerate() {
            if Some(pos) == skip {
                continue;
            }
            if index_key(index, other)?.as_ref() == Some(&key) {
                let dup: Map<String, Value> = index
                    .fields()
                    .map(str::to_string)
                    .zip(key.iter().cloned())
                    .collect();
                return Err(duplicate_key(collection, &index.name(), dup));
            }
        }
    }
    Ok(())
}

fn matching_positions(docs: &[Document], filter: &Filter, multi: bool) -> Result<Vec<usize>> {
    let mut hits = Vec::new();
    for (pos, d) in docs.iter().enumerate() {
        if filter.matches(d)? {
            hits.push(pos);
            if !multi {
                break;
            }
        }
    }
    Ok(hits)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents matching `filter`, in insertion order.
    pub fn find(&self, collection: &str, filter: &Filter, limit: Option<usize>) -> Result<Vec<Document>> {
        let cols = self.collections.read();
        let Some(docs) = cols.get(collection) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for d in docs {
            if limit.is_some_and(|n| out.len() >= n) {
                break;
            }
            if filter.matches(d)? {
                out.push(d.clone());
            }
        }
        Ok(out)
    }

    pub fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let cols = self.collections.read();
        let Some(docs) = cols.get(collection) else {
            return Ok(0);
        };
        let mut n = 0u64;
        for d in docs {
            if filter.matches(d)? {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Snapshot of a whole collection (aggregation input).
    pub fn scan(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Ordered insert: documents before a failing one stay inserted.
    pub fn insert(
        &self,
        collection: &str,
        docs: Vec<Document>,
        indexes: &[IndexSpec],
    ) -> Result<Vec<Document>> {
        let mut cols = self.collections.write();
        let stored = cols.entry(collection.to_string()).or_default();
        let mut inserted = Vec::with_capacity(docs.len());
        for mut doc in docs {
            if !doc.contains_key(ID_FIELD) {
                doc.insert(ID_FIELD.to_string(), new_object_id());
            }
            check_unique(collection, stored, None, &doc, indexes)?;
            stored.push(doc.clone());
            inserted.push(doc);
        }
        Ok(inserted)
    }

    /// Replace the stored document with `doc`'s `_id` if it also matches
    /// `filter`, else insert `doc` (which fails on a taken `_id`).
    pub fn replace_or_insert(
        &self,
        collection: &str,
        filter: &Filter,
        mut doc: Document,
        indexes: &[IndexSpec],
    ) -> Result<Document> {
        if !doc.contains_key(ID_FIELD) {
            doc.insert(ID_FIELD.to_string(), new_object_id());
        }
        let id = doc.get(ID_FIELD).cloned().unwrap_or(Value::Null);

        let mut cols = self.collections.write();
        let stored = cols.entry(collection.to_string()).or_default();
        let mut pos = None;
        for (p, d) in stored.iter().enumerate() {
            if d.get(ID_FIELD) == Some(&id) && filter.matches(d)? {
                pos = Some(p);
                break;
            }
        }
        check_unique(collection, stored, pos, &doc, indexes)?;
        match pos {
            Some(p) => stored[p] = doc.clone(),
            None => stored.push(doc.clone()),
        }
        Ok(doc)
    }

    /// Apply `update` to the first (or every, when `multi`) match.
    /// Returns the result and the updated documents.
    pub fn update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
        indexes: &[IndexSpec],
    ) -> Result<(UpdateResult, Vec<Document>)> {
        let mut cols = self.collections.write();
        let stored = cols.entry(collection.to_string()).or_default();
        let hits = matching_positions(stored, filter, multi)?;

        let mut result = UpdateResult {
            matched_count: hits.len() as u64,
            modified_count: 0,
        };
        let mut updated = Vec::with_capacity(hits.len());
        for pos in hits {
            let mut next = stored[pos].clone();
            update.apply(&mut next)?;
            if next != stored[pos] {
                check_unique(collection, stored, Some(pos), &next, indexes)?;
                stored[pos] = next.clone();
                result.modified_count += 1;
            }
            updated.push(next);
        }
        Ok((result, updated))
    }

    /// Remove the first (or every, when `multi`) match.
    pub fn delete(&self, collection: &str, filter: &Filter, multi: bool) -> Result<Vec<Document>> {
        let mut cols = self.collections.write();
        let Some(stored) = cols.get_mut(collection) else {
            return Ok(Vec::new());
        };
        let hits = matching_positions(stored, filter, multi)?;
        let mut removed = Vec::with_capacity(hits.len());
        for pos in hits.into_iter().rev() {
            removed.push(stored.remove(pos));
        }
        removed.reverse();
        Ok(removed)
    }
}
