//! Documents, query filters and update payloads.
//!
//! Filters and updates are structured wrappers over JSON objects so that
//! plugins can merge fields into them (`Filter::set`, `Update::force_set`)
//! instead of writing raw keys into untyped maps.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DogError;

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Field holding the primary key.
pub const ID_FIELD: &str = "_id";

/// Fresh primary key for an inserted document.
pub fn new_object_id() -> Value {
    Value::String(uuid::Uuid::new_v4().simple().to_string())
}

/// Read a (possibly dotted) path.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut cur = doc.get(first)?;
    for part in parts {
        cur = match cur {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Write a (possibly dotted) path, creating intermediate objects.
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(inner) => set_path(inner, rest, value),
                Value::Null => {
                    let mut inner = Map::new();
                    set_path(&mut inner, rest, value)?;
                    *entry = Value::Object(inner);
                    Ok(())
                }
                _ => Err(DogError::bad_request(format!(
                    "Cannot create field '{rest}' in element {{{head}: {entry}}}"
                ))
                .into_anyhow()),
            }
        }
    }
}

/// Remove a (possibly dotted) path; returns the removed value.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            Value::Object(inner) => remove_path(inner, rest),
            _ => None,
        },
    }
}

/// Order two JSON values the way the store sorts them.
///
/// Null sorts first, then numbers, strings, booleans; mixed types order by
/// that rank.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Ordering::Equal,
        _ => a == b,
    }
}

/// Equality with array fan-out: an array field matches when any element
/// (or the whole array) equals the expected value.
fn field_equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(v) => values_equal(v, expected),
    }
}

fn field_compares(actual: Option<&Value>, expected: &Value, accept: fn(Ordering) -> bool) -> bool {
    let same_kind = |v: &Value| {
        std::mem::discriminant(v) == std::mem::discriminant(expected)
            && !matches!(v, Value::Null)
    };
    match actual {
        None => false,
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| same_kind(item) && accept(compare_values(item, expected))),
        Some(v) => same_kind(v) && accept(compare_values(v, expected)),
    }
}

fn is_operator_object(cond: &Value) -> bool {
    match cond {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn expect_array<'a>(op: &str, v: &'a Value) -> Result<&'a Vec<Value>> {
    v.as_array().ok_or_else(|| {
        DogError::bad_request(format!("{op} needs an array")).into_anyhow()
    })
}

fn matches_condition(actual: Option<&Value>, cond: &Value) -> Result<bool> {
    if !is_operator_object(cond) {
        return Ok(field_equals(actual, cond));
    }

    let ops = cond.as_object().into_iter().flatten();
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => field_equals(actual, arg),
            "$ne" => !field_equals(actual, arg),
            "$in" => expect_array(op, arg)?
                .iter()
                .any(|candidate| field_equals(actual, candidate)),
            "$nin" => !expect_array(op, arg)?
                .iter()
                .any(|candidate| field_equals(actual, candidate)),
            "$gt" => field_compares(actual, arg, |o| o == Ordering::Greater),
            "$gte" => field_compares(actual, arg, |o| o != Ordering::Less),
            "$lt" => field_compares(actual, arg, |o| o == Ordering::Less),
            "$lte" => field_compares(actual, arg, |o| o != Ordering::Greater),
            "$exists" => {
                let want = arg.as_bool().unwrap_or(!arg.is_null());
                actual.is_some() == want
            }
            other => {
                return Err(DogError::bad_request(format!("unknown operator: {other}")).into_anyhow())
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A query filter: field path -> condition.
///
/// Conditions are literal values (equality) or operator objects such as
/// `{"$in": [...]}`. `$and` / `$or` take arrays of nested filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Document);

impl Filter {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from a JSON object; anything else is a `BadRequest`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(DogError::bad_request(format!(
                "filter must be an object, got {other}"
            ))
            .into_anyhow()),
        }
    }

    /// Builder-style condition.
    pub fn with(mut self, field: impl Into<String>, cond: impl Into<Value>) -> Self {
        self.0.insert(field.into(), cond.into());
        self
    }

    /// Set a field condition, replacing whatever the caller put there.
    pub fn set(&mut self, field: impl Into<String>, cond: impl Into<Value>) {
        self.0.insert(field.into(), cond.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn into_document(self) -> Document {
        self.0
    }

    /// Does `doc` satisfy every condition?
    pub fn matches(&self, doc: &Document) -> Result<bool> {
        for (field, cond) in &self.0 {
            let ok = match field.as_str() {
                "$and" => {
                    let mut all = true;
                    for sub in expect_array("$and", cond)? {
                        if !Filter::from_value(sub.clone())?.matches(doc)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => {
                    let mut any = false;
                    for sub in expect_array("$or", cond)? {
                        if Filter::from_value(sub.clone())?.matches(doc)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
                path if path.starts_with('$') => {
                    return Err(DogError::bad_request(format!(
                        "unknown top level operator: {path}"
                    ))
                    .into_anyhow())
                }
                path => matches_condition(get_path(doc, path), cond)?,
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Literal equality conditions, used to seed upserted documents and
    /// discriminator tags.
    pub fn equality_fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0
            .iter()
            .filter(|(k, v)| !k.starts_with('$') && !is_operator_object(v))
    }
}

impl From<Document> for Filter {
    fn from(doc: Document) -> Self {
        Self(doc)
    }
}

/// An update payload with `$set`, `$unset` and `$inc` sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Document,
    unset: BTreeSet<String>,
    inc: Document,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{"$set": {...}, "$unset": {...}, "$inc": {...}}`.
    ///
    /// Plain top-level fields are treated as `$set`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(DogError::bad_request("update must be an object").into_anyhow());
        };

        let mut update = Update::new();
        for (key, section) in map {
            match key.as_str() {
                "$set" => {
                    let Value::Object(fields) = section else {
                        return Err(DogError::bad_request("$set needs an object").into_anyhow());
                    };
                    update.set.extend(fields);
                }
                "$unset" => {
                    let Value::Object(fields) = section else {
                        return Err(DogError::bad_request("$unset needs an object").into_anyhow());
                    };
                    update.unset.extend(fields.into_iter().map(|(k, _)| k));
                }
                "$inc" => {
                    let Value::Object(fields) = section else {
                        return Err(DogError::bad_request("$inc needs an object").into_anyhow());
                    };
                    for (field, by) in fields {
                        if !by.is_number() {
                            return Err(DogError::bad_request(format!(
                                "$inc on '{field}' needs a number"
                            ))
                            .into_anyhow());
                        }
                        update.inc.insert(field, by);
                    }
                }
                op if op.starts_with('$') => {
                    return Err(
                        DogError::bad_request(format!("unsupported update operator: {op}"))
                            .into_anyhow(),
                    )
                }
                _ => {
                    update.set.insert(key, section);
                }
            }
        }
        Ok(update)
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.insert(field.into());
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.inc.insert(field.into(), by.into());
        self
    }

    /// Pin `field` to `value`: it ends up in `$set` and nowhere else.
    pub fn force_set(&mut self, field: &str, value: Value) {
        self.unset.remove(field);
        self.inc.remove(field);
        self.set.insert(field.to_string(), value);
    }

    pub fn get_set(&self, field: &str) -> Option<&Value> {
        self.set.get(field)
    }

    pub fn is_unset(&self, field: &str) -> bool {
        self.unset.contains(field)
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.inc.is_empty()
    }

    /// Apply to a stored document in place.
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        for (field, value) in &self.set {
            set_path(doc, field, value.clone())?;
        }
        for field in &self.unset {
            remove_path(doc, field);
        }
        for (field, by) in &self.inc {
            let next = match get_path(doc, field) {
                None | Some(Value::Null) => by.clone(),
                Some(Value::Number(cur)) => add_numbers(cur, by)?,
                Some(other) => {
                    return Err(DogError::bad_request(format!(
                        "cannot $inc non-numeric field '{field}' ({other})"
                    ))
                    .into_anyhow())
                }
            };
            set_path(doc, field, next)?;
        }
        Ok(())
    }
}

fn add_numbers(cur: &serde_json::Number, by: &Value) -> Result<Value> {
    let Value::Number(by) = by else {
        return Err(DogError::bad_request("$inc needs a number").into_anyhow());
    };
    if let (Some(a), Some(b)) = (cur.as_i64(), by.as_i64()) {
        return Ok(Value::from(a + b));
    }
    let sum = cur.as_f64().unwrap_or_default() + by.as_f64().unwrap_or_default();
    Ok(Value::from(sum))
}
