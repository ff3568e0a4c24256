use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A registered customer workspace.
///
/// `processed_at` is the scheduling cursor: the last time this tenant was
/// handed to the fill engine. The scheduler always claims the tenants with
/// the oldest cursor first, so wall-clock registration order is irrelevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    /// Opaque bearer secret for the remote table API.
    pub credential: String,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: impl Into<String>, credential: impl Into<String>) -> Result<Self, CoreError> {
        let now = Utc::now();
        let tenant = Self {
            id: id.into(),
            credential: credential.into(),
            processed_at: now,
            created_at: now,
            updated_at: now,
        };
        tenant.validate()?;
        Ok(tenant)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.is_empty() {
            return Err(CoreError::Validation("tenant id is required".into()));
        }
        if self.credential.is_empty() {
            return Err(CoreError::Validation("credential is required".into()));
        }
        Ok(())
    }
}
