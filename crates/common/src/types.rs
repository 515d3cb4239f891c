use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of one event log.
///
/// An aggregate id pairs the entity type (e.g. `"account"`) with a caller
/// chosen business key. Its canonical string form is `type.key`, which is
/// what registries and partitioned stores key on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateId {
    #[serde(rename = "type")]
    aggregate_type: String,
    key: String,
}

impl AggregateId {
    /// Creates an aggregate id from its type and key.
    pub fn new(aggregate_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            key: key.into(),
        }
    }

    /// Returns the entity type this log belongs to.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Returns the business key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the canonical `type.key` encoding.
    pub fn canonical(&self) -> String {
        format!("{}.{}", self.aggregate_type, self.key)
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.aggregate_type, self.key)
    }
}

/// Error returned when a canonical aggregate string has no `.` separator
/// or an empty type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid aggregate id '{0}': expected 'type.key'")]
pub struct ParseAggregateIdError(String);

impl FromStr for AggregateId {
    type Err = ParseAggregateIdError;

    /// Splits on the first `.`, so keys may themselves contain dots.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((aggregate_type, key)) if !aggregate_type.is_empty() => {
                Ok(Self::new(aggregate_type, key))
            }
            _ => Err(ParseAggregateIdError(s.to_string())),
        }
    }
}
