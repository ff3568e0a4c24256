use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Name of the numeric column the fill engine populates unless a table says
/// otherwise.
pub const DEFAULT_COUNTER_COLUMN: &str = "PlusID";

/// Observation state of a tracked table.
///
/// Disabled is terminal: a re-discovered table gets a fresh record instead
/// of flipping an old one back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Active,
    Disabled,
}

/// A tracked remote table whose counter column gets auto-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Remote table ids are globally unique, so the id alone is identity.
    pub id: String,
    pub tenant_id: String,
    pub status: TableStatus,
    pub counter_column: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Table {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>) -> Result<Self, CoreError> {
        let now = Utc::now();
        let table = Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            status: TableStatus::Active,
            counter_column: DEFAULT_COUNTER_COLUMN.to_string(),
            created_at: now,
            updated_at: now,
        };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.is_empty() {
            return Err(CoreError::Validation("table id is required".into()));
        }
        if self.tenant_id.is_empty() {
            return Err(CoreError::Validation("tenant id is required".into()));
        }
        if self.counter_column.is_empty() {
            return Err(CoreError::Validation("counter column is required".into()));
        }
        Ok(())
    }
}

/// Ids present in `set` and absent from `subset`, preserving `set` order.
pub fn diff(set: &[String], subset: &[String]) -> Vec<String> {
    if set.is_empty() {
        return Vec::new();
    }
    let known: HashSet<&str> = subset.iter().map(String::as_str).collect();
    set.iter()
        .filter(|id| !known.contains(id.as_str()))
        .cloned()
        .collect()
}
