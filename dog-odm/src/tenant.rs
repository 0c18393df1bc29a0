//! Core multi-tenant types.
//!
//! The mapper itself never filters by tenant; it only carries the calling
//! model's tenant context into hook chains so plugins can act on it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tenant identifier.
///
/// Any JSON scalar works (string, number, uuid). Two identifiers are the
/// same tenant for caching purposes when their string forms are equal, so
/// identifiers must stringify injectively (`"1"` and `1` collide).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Value);

impl TenantId {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// The value written into documents and filters.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// String form used as the cache key.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

impl From<&str> for TenantId {
    fn from(v: &str) -> Self {
        Self(Value::String(v.to_string()))
    }
}

impl From<String> for TenantId {
    fn from(v: String) -> Self {
        Self(Value::String(v))
    }
}

impl From<&String> for TenantId {
    fn from(v: &String) -> Self {
        Self(Value::String(v.clone()))
    }
}

impl From<i64> for TenantId {
    fn from(v: i64) -> Self {
        Self(Value::from(v))
    }
}

impl From<u64> for TenantId {
    fn from(v: u64) -> Self {
        Self(Value::from(v))
    }
}

impl From<i32> for TenantId {
    fn from(v: i32) -> Self {
        Self(Value::from(v))
    }
}

impl From<uuid::Uuid> for TenantId {
    fn from(v: uuid::Uuid) -> Self {
        Self(Value::String(v.to_string()))
    }
}

impl From<Value> for TenantId {
    fn from(v: Value) -> Self {
        Self(v)
    }
}

/// Context carried by a tenant-bound model into every operation it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: tenant.into(),
        }
    }
}
