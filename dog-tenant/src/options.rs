// Tenant plugin options and configuration.

use dog_odm::{DogConfigSnapshot, FieldType};
use serde::{Deserialize, Serialize};

use crate::error::{TenantError, TenantResult};

/// Plugin options, fixed once the plugin is attached to a schema.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TenantOptions {
    /// Disabled plugins leave the schema untouched and bind nothing.
    pub enabled: bool,

    /// Name of the tenant field added to every document.
    #[serde(alias = "tenant_id_key")]
    pub tenant_id_key: String,

    /// Declared type of the tenant field.
    #[serde(alias = "tenant_id_type")]
    pub tenant_id_type: FieldType,

    /// Name of the accessor that binds a model to a tenant.
    #[serde(alias = "accessor_method")]
    pub accessor_method: String,

    /// Make the tenant field required on save/insert.
    #[serde(alias = "require_tenant_id")]
    pub require_tenant_id: bool,
}

impl Default for TenantOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            tenant_id_key: "tenant".to_string(),
            tenant_id_type: FieldType::String,
            accessor_method: "byTenant".to_string(),
            require_tenant_id: false,
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> TenantResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(TenantError::InvalidConfigValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

impl TenantOptions {
    pub fn validate(&self) -> TenantResult<()> {
        if self.tenant_id_key.trim().is_empty() {
            return Err(TenantError::EmptyTenantIdKey);
        }
        if self.accessor_method.trim().is_empty() {
            return Err(TenantError::EmptyAccessorMethod);
        }
        Ok(())
    }

    pub fn builder() -> TenantOptionsBuilder {
        TenantOptionsBuilder::new()
    }

    /// Options from connection config, falling back to defaults:
    ///
    /// - `tenant.enabled`  → `enabled`
    /// - `tenant.key`      → `tenant_id_key`
    /// - `tenant.type`     → `tenant_id_type`
    /// - `tenant.accessor` → `accessor_method`
    /// - `tenant.required` → `require_tenant_id`
    pub fn from_config(cfg: &DogConfigSnapshot) -> TenantResult<Self> {
        let mut opts = Self::default();
        if let Some(raw) = cfg.get("tenant.enabled") {
            opts.enabled = parse_bool("tenant.enabled", raw)?;
        }
        if let Some(key) = cfg.get("tenant.key") {
            opts.tenant_id_key = key.to_string();
        }
        if let Some(raw) = cfg.get("tenant.type") {
            opts.tenant_id_type = raw.parse().map_err(|_| TenantError::InvalidConfigValue {
                key: "tenant.type".to_string(),
                value: raw.to_string(),
            })?;
        }
        if let Some(accessor) = cfg.get("tenant.accessor") {
            opts.accessor_method = accessor.to_string();
        }
        if let Some(raw) = cfg.get("tenant.required") {
            opts.require_tenant_id = parse_bool("tenant.required", raw)?;
        }
        opts.validate()?;
        Ok(opts)
    }
}

/// Builder for `TenantOptions`.
#[derive(Clone, Debug, Default)]
pub struct TenantOptionsBuilder {
    opts: TenantOptions,
}

impl TenantOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.opts.enabled = enabled;
        self
    }

    pub fn tenant_id_key(mut self, key: impl Into<String>) -> Self {
        self.opts.tenant_id_key = key.into();
        self
    }

    pub fn tenant_id_type(mut self, kind: FieldType) -> Self {
        self.opts.tenant_id_type = kind;
        self
    }

    pub fn accessor_method(mut self, name: impl Into<String>) -> Self {
        self.opts.accessor_method = name.into();
        self
    }

    pub fn require_tenant_id(mut self, required: bool) -> Self {
        self.opts.require_tenant_id = required;
        self
    }

    pub fn build(self) -> TenantOptions {
        self.opts
    }

    pub fn build_validated(self) -> TenantResult<TenantOptions> {
        let opts = self.build();
        opts.validate()?;
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let o = TenantOptions::default();
        assert!(o.enabled);
        assert_eq!(o.tenant_id_key, "tenant");
        assert_eq!(o.tenant_id_type, FieldType::String);
        assert_eq!(o.accessor_method, "byTenant");
        assert!(!o.require_tenant_id);
        assert!(o.validate().is_ok());
    }

    #[test]
    fn deserializes_camel_case_and_fills_defaults() {
        let o: TenantOptions =
            serde_json::from_value(json!({"tenantIdKey": "org", "requireTenantId": true})).unwrap();
        assert_eq!(o.tenant_id_key, "org");
        assert!(o.require_tenant_id);
        assert_eq!(o.accessor_method, "byTenant");

        let o: TenantOptions = serde_json::from_value(json!({"tenant_id_key": "org"})).unwrap();
        assert_eq!(o.tenant_id_key, "org");
    }

    #[test]
    fn builder_validates() {
        let err = TenantOptions::builder()
            .tenant_id_key("  ")
            .build_validated()
            .unwrap_err();
        assert_eq!(err, TenantError::EmptyTenantIdKey);

        let err = TenantOptions::builder()
            .accessor_method("")
            .build_validated()
            .unwrap_err();
        assert_eq!(err, TenantError::EmptyAccessorMethod);
    }

    #[test]
    fn from_config_reads_keys() {
        let cfg = DogConfigSnapshot::from_pairs([
            ("tenant.key", "org"),
            ("tenant.type", "number"),
            ("tenant.accessor", "forOrg"),
            ("tenant.required", "yes"),
        ]);
        let o = TenantOptions::from_config(&cfg).unwrap();
        assert_eq!(o.tenant_id_key, "org");
        assert_eq!(o.tenant_id_type, FieldType::Number);
        assert_eq!(o.accessor_method, "forOrg");
        assert!(o.require_tenant_id);
        assert!(o.enabled);
    }

    #[test]
    fn from_config_rejects_bad_values() {
        let cfg = DogConfigSnapshot::from_pairs([("tenant.enabled", "maybe")]);
        assert!(matches!(
            TenantOptions::from_config(&cfg),
            Err(TenantError::InvalidConfigValue { .. })
        ));

        let cfg = DogConfigSnapshot::from_pairs([("tenant.type", "blob")]);
        assert!(TenantOptions::from_config(&cfg).is_err());
    }
}
