//! # Errors (Feathers-style)
//!
//! The mapper reports failures as structured `DogError`s carried inside
//! `anyhow::Error`, so they flow through hook chains and model calls
//! unchanged. Callers downcast with `DogError::from_anyhow` when they need
//! the kind (e.g. to tell a duplicate key from a validation failure).

use std::fmt;

use anyhow::Error as AnyError;
use serde_json::Value;

/// A convenience result type for mapper APIs.
pub type DogResult<T> = std::result::Result<T, AnyError>;

/// Feathers-ish error class names + status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,    // 400
    NotFound,      // 404
    Conflict,      // 409
    Unprocessable, // 422
    GeneralError,  // 500
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Unprocessable => 422,
            ErrorKind::GeneralError => 500,
        }
    }

    /// Feathers error `name` (e.g. "NotFound")
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Unprocessable => "Unprocessable",
            ErrorKind::GeneralError => "GeneralError",
        }
    }

    /// Feathers error `className` (kebab-cased)
    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unprocessable => "unprocessable",
            ErrorKind::GeneralError => "general-error",
        }
    }
}

/// A structured mapper error that can live inside `anyhow::Error`.
#[derive(Debug)]
pub struct DogError {
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<Value>,
    pub errors: Option<Value>,
    pub source: Option<AnyError>,
}

impl DogError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
            errors: None,
            source: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_errors(mut self, errors: Value) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    /// Convert into `anyhow::Error` so it flows through the hook chain.
    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Downcast an `anyhow::Error` to a `DogError` if possible.
    pub fn from_anyhow(err: &AnyError) -> Option<&DogError> {
        err.downcast_ref::<DogError>()
    }

    /// Kind of an arbitrary error; anything that is not a `DogError` is
    /// a `GeneralError`.
    pub fn kind_of(err: &AnyError) -> ErrorKind {
        Self::from_anyhow(err)
            .map(|e| e.kind)
            .unwrap_or(ErrorKind::GeneralError)
    }

    /// Turn any error into a DogError:
    /// - if it's already a DogError, keep it (lossless)
    /// - otherwise wrap as GeneralError
    pub fn normalize(err: AnyError) -> DogError {
        match err.downcast::<DogError>() {
            Ok(dog) => dog,
            Err(other) => {
                DogError::new(ErrorKind::GeneralError, other.to_string()).with_source(other)
            }
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }
    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unprocessable, msg)
    }
    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }

    /// Feathers-ish JSON payload.
    pub fn to_json(&self) -> Value {
        use serde_json::json;

        let mut base = json!({
            "name": self.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.class_name(),
        });

        if let Some(d) = &self.data {
            base["data"] = d.clone();
        }
        if let Some(e) = &self.errors {
            base["errors"] = e.clone();
        }
        base
    }
}

impl fmt::Display for DogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.code(), self.message)
    }
}

impl std::error::Error for DogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience helper for "bail with DogError".
#[macro_export]
macro_rules! bail_dog {
    ($ctor:ident, $msg:expr) => {
        return Err($crate::errors::DogError::$ctor($msg).into_anyhow())
    };
    ($ctor:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::DogError::$ctor(format!($fmt, $($arg)*)).into_anyhow())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_dog_errors() {
        let err = DogError::conflict("dup").into_anyhow();
        let dog = DogError::normalize(err);
        assert_eq!(dog.kind, ErrorKind::Conflict);
        assert_eq!(dog.code(), 409);
    }

    #[test]
    fn normalize_wraps_foreign_errors() {
        let dog = DogError::normalize(anyhow::anyhow!("boom"));
        assert_eq!(dog.kind, ErrorKind::GeneralError);
        assert!(dog.source.is_some());
    }

    #[test]
    fn to_json_includes_errors() {
        let dog = DogError::unprocessable("Validation failed")
            .with_errors(serde_json::json!({"email": ["required"]}));
        let v = dog.to_json();
        assert_eq!(v["className"], "unprocessable");
        assert_eq!(v["errors"]["email"][0], "required");
    }
}
