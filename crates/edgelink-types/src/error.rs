//! Errors reported by domain services.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::error_code;

/// Named template parameters for localized messages.
pub type Params = BTreeMap<String, String>;

/// A business-level failure carrying a numeric error code.
///
/// The code selects a localized message; `params` fill its placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("domain error {code}")]
pub struct DomainError {
    /// Numeric error code from [`error_code`].
    pub code: u32,
    /// Template parameters for the localized message.
    pub params: Params,
}

impl DomainError {
    /// Creates an error without parameters.
    pub fn new(code: u32) -> Self {
        Self {
            code,
            params: Params::new(),
        }
    }

    /// Adds a template parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// The referenced record does not exist.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::new(error_code::RECORD_NOT_FOUND).with_param("name", name)
    }

    /// The request payload was malformed.
    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::new(error_code::INVALID_PARAMS).with_param("reason", reason)
    }

    /// Unclassified internal failure.
    pub fn system() -> Self {
        Self::new(error_code::SYSTEM_ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_params() {
        let err = DomainError::not_found("modbus-driver");
        assert_eq!(err.code, error_code::RECORD_NOT_FOUND);
        assert_eq!(err.params.get("name").map(String::as_str), Some("modbus-driver"));
        assert_eq!(err.to_string(), "domain error 10003");
    }
}
