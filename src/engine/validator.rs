//! KEEPSAKE - Write Validator
//! Enforces key length, value size and TTL constraints before any mutation.

use crate::config::Config;
use crate::error::ValidationError;
use crate::types::Document;

/// Size and shape limits applied to every create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    max_key_len: usize,
    max_value_size: usize,
}

impl Validator {
    pub fn new(max_key_len: usize, max_value_size: usize) -> Self {
        Self {
            max_key_len,
            max_value_size,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_key_len, config.max_value_size)
    }

    /// Check a key/value pair. Pure: no side effects.
    ///
    /// Key length is counted in characters, value size in bytes of the
    /// compact JSON encoding. Only JSON objects count as structured documents.
    pub fn validate(&self, key: &str, value: &Document) -> Result<(), ValidationError> {
        self.validate_key(key)?;

        if !value.is_object() {
            return Err(ValidationError::ValueNotStructured(format!(
                "expected a JSON object, got {}",
                kind_of(value)
            )));
        }

        let size = serde_json::to_vec(value)
            .map_err(|e| ValidationError::ValueNotStructured(e.to_string()))?
            .len();
        if size > self.max_value_size {
            return Err(ValidationError::ValueTooLarge {
                size,
                max: self.max_value_size,
            });
        }
        Ok(())
    }

    pub fn validate_key(&self, key: &str) -> Result<(), ValidationError> {
        let len = key.chars().count();
        if len == 0 {
            return Err(ValidationError::KeyEmpty);
        }
        if len > self.max_key_len {
            return Err(ValidationError::KeyTooLong {
                len,
                max: self.max_key_len,
            });
        }
        Ok(())
    }

    pub fn validate_ttl(&self, ttl_seconds: Option<u64>) -> Result<(), ValidationError> {
        match ttl_seconds {
            Some(0) => Err(ValidationError::TtlNotPositive),
            _ => Ok(()),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn kind_of(value: &Document) -> &'static str {
    match value {
        Document::Null => "null",
        Document::Bool(_) => "a boolean",
        Document::Number(_) => "a number",
        Document::String(_) => "a string",
        Document::Array(_) => "an array",
        Document::Object(_) => "an object",
    }
}
