//! KEEPSAKE - Core Type Definitions
//! Defines fundamental types used across the store.

use serde::{Deserialize, Serialize};

/// Key type for the store.
pub type Key = String;

/// Value type for the store: any JSON document.
pub type Document = serde_json::Value;

/// Represents a single stored entry. The key is held by the enclosing map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub value: Document,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: u64,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl Record {
    /// Create a record stamped with the given creation instant.
    pub fn new(value: Document, created_at: u64, ttl_seconds: Option<u64>) -> Self {
        Self {
            value,
            created_at,
            ttl_seconds,
        }
    }

    /// Expiration instant in milliseconds, or `None` if the record never expires.
    pub fn expires_at(&self) -> Option<u64> {
        crate::engine::expiry::expires_at(self.created_at, self.ttl_seconds)
    }
}
