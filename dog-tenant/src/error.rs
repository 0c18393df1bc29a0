use thiserror::Error;

/// Result type for plugin setup.
pub type TenantResult<T> = Result<T, TenantError>;

/// Plugin configuration and attachment errors.
///
/// Scoped operations never produce these; storage errors pass through
/// as `anyhow::Error` unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenantError {
    #[error("tenant id key must not be empty")]
    EmptyTenantIdKey,

    #[error("accessor method name must not be empty")]
    EmptyAccessorMethod,

    #[error("invalid value for config key '{key}': {value}")]
    InvalidConfigValue { key: String, value: String },

    #[error("tenant plugin is not attached to model '{0}'")]
    NotAttached(String),
}

impl TenantError {
    /// Lift into the host error shape (`BadRequest`).
    pub fn into_anyhow(self) -> anyhow::Error {
        dog_odm::DogError::bad_request(self.to_string())
            .with_source(anyhow::Error::new(self))
            .into_anyhow()
    }
}
