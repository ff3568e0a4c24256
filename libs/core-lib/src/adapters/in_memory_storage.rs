use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::domain::{Table, TableStatus, Tenant};
use crate::storage::{ProcTenants, Storage};
use crate::CoreError;

#[derive(Debug, Default)]
struct State {
    tenants: HashMap<String, Tenant>,
    tables: HashMap<String, Table>,
}

/// In-memory implementation of the Storage port for testing and
/// single-executable mode.
///
/// The claim mutex stands in for the real store's serializable claim
/// transaction: it is the single linearization point that keeps two
/// concurrent schedulers from claiming the same tenants.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<State>>,
    claim: Arc<Mutex<()>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn tenant(&self, id: &str) -> Result<Tenant, CoreError> {
        if id.is_empty() {
            return Err(CoreError::Validation("tenant id is required".into()));
        }

        self.state
            .read()
            .await
            .tenants
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("tenant {id}")))
    }

    async fn tenants(&self) -> Result<Vec<Tenant>, CoreError> {
        Ok(self.state.read().await.tenants.values().cloned().collect())
    }

    async fn store_tenant(&self, mut tenant: Tenant) -> Result<Tenant, CoreError> {
        tenant.validate()?;

        let mut state = self.state.write().await;
        let now = Utc::now();
        if let Some(existing) = state.tenants.get(&tenant.id) {
            tenant.created_at = existing.created_at;
        }
        tenant.updated_at = now;
        state.tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(tenant)
    }

    async fn remove_tenant(&self, tenant_id: &str) -> Result<(), CoreError> {
        if tenant_id.is_empty() {
            return Err(CoreError::Validation("tenant id is required".into()));
        }

        self.state.write().await.tenants.remove(tenant_id);
        Ok(())
    }

    async fn proc_oldest_tenants(
        &self,
        count: usize,
        proc: &ProcTenants,
    ) -> Result<(), CoreError> {
        // Claims are serialized end to end, including the callback, exactly
        // like the store-side transaction would.
        let _claim = self.claim.lock().await;

        let batch = {
            let state = self.state.read().await;
            let mut tenants: Vec<Tenant> = state.tenants.values().cloned().collect();
            tenants.sort_by_key(|t| t.processed_at);
            tenants.truncate(count);
            tenants
        };

        proc(batch.clone()).await?;

        let mut state = self.state.write().await;
        let now = Utc::now();
        for claimed in &batch {
            if let Some(tenant) = state.tenants.get_mut(&claimed.id) {
                tenant.processed_at = now;
                tenant.updated_at = now;
            }
        }
        Ok(())
    }

    async fn tables(&self) -> Result<Vec<Table>, CoreError> {
        Ok(self.state.read().await.tables.values().cloned().collect())
    }

    async fn store_table(&self, tenant_id: &str, mut table: Table) -> Result<Table, CoreError> {
        table.tenant_id = tenant_id.to_string();
        table.validate()?;

        let mut state = self.state.write().await;
        if let Some(existing) = state.tables.get(&table.id) {
            table.created_at = existing.created_at;
        }
        table.updated_at = Utc::now();
        state.tables.insert(table.id.clone(), table.clone());
        Ok(table)
    }

    async fn disable_table(&self, tenant_id: &str, table_id: &str) -> Result<Table, CoreError> {
        let mut state = self.state.write().await;
        let table = state
            .tables
            .get_mut(table_id)
            .filter(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::NotFound(format!("table {table_id}")))?;

        table.status = TableStatus::Disabled;
        table.updated_at = Utc::now();
        Ok(table.clone())
    }

    async fn active_table_ids(
        &self,
        tenant_id: &str,
        table_ids: &[String],
    ) -> Result<Vec<String>, CoreError> {
        let state = self.state.read().await;
        Ok(table_ids
            .iter()
            .filter(|id| {
                state
                    .tables
                    .get(*id)
                    .is_some_and(|t| t.tenant_id == tenant_id && t.status == TableStatus::Active)
            })
            .cloned()
            .collect())
    }

    async fn active_tables(&self, tenant_id: &str) -> Result<Vec<Table>, CoreError> {
        if tenant_id.is_empty() {
            return Err(CoreError::Validation("tenant id is required".into()));
        }

        let state = self.state.read().await;
        Ok(state
            .tables
            .values()
            .filter(|t| t.tenant_id == tenant_id && t.status == TableStatus::Active)
            .cloned()
            .collect())
    }

    async fn remove_tenant_tables(&self, tenant_id: &str) -> Result<(), CoreError> {
        if tenant_id.is_empty() {
            return Err(CoreError::Validation("tenant id is required".into()));
        }

        self.state
            .write()
            .await
            .tables
            .retain(|_, t| t.tenant_id != tenant_id);
        Ok(())
    }
}
