//! Aggregation pipelines.

use anyhow::Result;
use serde_json::{Map, Value};

use crate::document::{compare_values, get_path, set_path, Document, Filter, ID_FIELD};
use crate::errors::DogError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn from_value(field: &str, v: &Value) -> Result<Self> {
        match v.as_i64() {
            Some(1) => Ok(SortDirection::Asc),
            Some(-1) => Ok(SortDirection::Desc),
            _ => Err(DogError::bad_request(format!(
                "$sort direction for '{field}' must be 1 or -1"
            ))
            .into_anyhow()),
        }
    }
}

/// One aggregation stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Project(Document),
    Sort(Vec<(String, SortDirection)>),
    Skip(usize),
    Limit(usize),
    Count(String),
}

impl Stage {
    /// Parse `{"$match": {...}}` style stage objects.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(DogError::bad_request("pipeline stage must be an object").into_anyhow());
        };
        if map.len() != 1 {
            return Err(DogError::bad_request(
                "a pipeline stage specification object must contain exactly one field",
            )
            .into_anyhow());
        }
        let Some((name, arg)) = map.into_iter().next() else {
            return Err(DogError::bad_request("empty pipeline stage").into_anyhow());
        };

        match name.as_str() {
            "$match" => Ok(Stage::Match(Filter::from_value(arg)?)),
            "$project" => match arg {
                Value::Object(spec) => Ok(Stage::Project(spec)),
                _ => Err(DogError::bad_request("$project needs an object").into_anyhow()),
            },
            "$sort" => {
                let Value::Object(spec) = arg else {
                    return Err(DogError::bad_request("$sort needs an object").into_anyhow());
                };
                let mut keys = Vec::with_capacity(spec.len());
                for (field, dir) in spec {
                    let dir = SortDirection::from_value(&field, &dir)?;
                    keys.push((field, dir));
                }
                Ok(Stage::Sort(keys))
            }
            "$skip" => Ok(Stage::Skip(non_negative(&name, &arg)?)),
            "$limit" => Ok(Stage::Limit(non_negative(&name, &arg)?)),
            "$count" => match arg {
                Value::String(field) if !field.is_empty() => Ok(Stage::Count(field)),
                _ => Err(DogError::bad_request("$count needs a field name").into_anyhow()),
            },
            other => Err(DogError::bad_request(format!(
                "Unrecognized pipeline stage name: '{other}'"
            ))
            .into_anyhow()),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        match self {
            Stage::Match(f) => {
                out.insert("$match".into(), Value::Object(f.as_document().clone()));
            }
            Stage::Project(spec) => {
                out.insert("$project".into(), Value::Object(spec.clone()));
            }
            Stage::Sort(keys) => {
                let spec = keys
                    .iter()
                    .map(|(k, d)| {
                        let dir = match d {
                            SortDirection::Asc => 1,
                            SortDirection::Desc => -1,
                        };
                        (k.clone(), Value::from(dir))
                    })
                    .collect();
                out.insert("$sort".into(), Value::Object(spec));
            }
            Stage::Skip(n) => {
                out.insert("$skip".into(), Value::from(*n as u64));
            }
            Stage::Limit(n) => {
                out.insert("$limit".into(), Value::from(*n as u64));
            }
            Stage::Count(field) => {
                out.insert("$count".into(), Value::String(field.clone()));
            }
        }
        Value::Object(out)
    }

    fn run(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        match self {
            Stage::Match(filter) => {
                let mut kept = Vec::with_capacity(docs.len());
                for d in docs {
                    if filter.matches(&d)? {
                        kept.push(d);
                    }
                }
                Ok(kept)
            }
            Stage::Project(spec) => docs.into_iter().map(|d| project(spec, d)).collect(),
            Stage::Sort(keys) => {
                let mut docs = docs;
                docs.sort_by(|a, b| {
                    for (field, dir) in keys {
                        let av = get_path(a, field).unwrap_or(&Value::Null);
                        let bv = get_path(b, field).unwrap_or(&Value::Null);
                        let ord = compare_values(av, bv);
                        let ord = match dir {
                            SortDirection::Asc => ord,
                            SortDirection::Desc => ord.reverse(),
                        };
                        if ord.is_ne() {
                            return ord;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                Ok(docs)
            }
            Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
            Stage::Count(field) => {
                if docs.is_empty() {
                    return Ok(Vec::new());
                }
                let mut out = Map::new();
                out.insert(field.clone(), Value::from(docs.len() as u64));
                Ok(vec![out])
            }
        }
    }
}

fn non_negative(stage: &str, v: &Value) -> Result<usize> {
    v.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| {
            DogError::bad_request(format!("{stage} needs a non-negative integer")).into_anyhow()
        })
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Null => false,
        _ => true,
    }
}

fn project(spec: &Document, doc: Document) -> Result<Document> {
    let inclusive = spec.iter().any(|(k, v)| k != ID_FIELD && truthy(v));
    let keep_id = spec.get(ID_FIELD).map(truthy).unwrap_or(true);

    if inclusive {
        let mut out = Map::new();
        if keep_id {
            if let Some(id) = doc.get(ID_FIELD) {
                out.insert(ID_FIELD.to_string(), id.clone());
            }
        }
        for (field, v) in spec {
            if field == ID_FIELD || !truthy(v) {
                continue;
            }
            if let Some(found) = get_path(&doc, field) {
                set_path(&mut out, field, found.clone())?;
            }
        }
        Ok(out)
    } else {
        let mut out = doc;
        for field in spec.keys() {
            if field == ID_FIELD && keep_id {
                continue;
            }
            crate::document::remove_path(&mut out, field);
        }
        Ok(out)
    }
}

/// An ordered list of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline(Vec<Stage>);

impl Pipeline {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Parse a JSON array of stage objects.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(DogError::bad_request("pipeline must be an array").into_anyhow());
        };
        items
            .into_iter()
            .map(Stage::from_value)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn with(mut self, stage: Stage) -> Self {
        self.0.push(stage);
        self
    }

    pub fn push(&mut self, stage: Stage) {
        self.0.push(stage);
    }

    pub fn prepend(&mut self, stage: Stage) {
        self.0.insert(0, stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.0
    }

    pub fn first_mut(&mut self) -> Option<&mut Stage> {
        self.0.first_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.0.iter().map(Stage::to_value).collect())
    }

    /// Run every stage in order over `docs`.
    pub fn run(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        self.0.iter().try_fold(docs, |acc, stage| stage.run(acc))
    }
}

impl From<Vec<Stage>> for Pipeline {
    fn from(stages: Vec<Stage>) -> Self {
        Self(stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<Document> {
        [
            json!({"_id": "1", "status": "active", "n": 3}),
            json!({"_id": "2", "status": "idle", "n": 1}),
            json!({"_id": "3", "status": "active", "n": 2}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
    }

    #[test]
    fn parses_and_runs_stages() {
        let p = Pipeline::from_value(json!([
            {"$match": {"status": "active"}},
            {"$sort": {"n": 1}},
            {"$project": {"n": 1, "_id": 0}}
        ]))
        .unwrap();

        let out = p.run(docs()).unwrap();
        assert_eq!(
            out.into_iter().map(Value::Object).collect::<Vec<_>>(),
            vec![json!({"n": 2}), json!({"n": 3})]
        );
    }

    #[test]
    fn count_stage() {
        let p = Pipeline::new()
            .with(Stage::Match(Filter::new().with("status", "active")))
            .with(Stage::Count("total".into()));
        let out = p.run(docs()).unwrap();
        assert_eq!(Value::Object(out[0].clone()), json!({"total": 2}));
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let err = Pipeline::from_value(json!([{"$lookup": {}}])).unwrap_err();
        assert!(err.to_string().contains("$lookup"));
    }

    #[test]
    fn skip_limit_and_exclusion() {
        let p = Pipeline::from_value(json!([
            {"$sort": {"n": -1}},
            {"$skip": 1},
            {"$limit": 1},
            {"$project": {"status": 0}}
        ]))
        .unwrap();
        let out = p.run(docs()).unwrap();
        assert_eq!(Value::Object(out[0].clone()), json!({"_id": "3", "n": 2}));
    }
}
