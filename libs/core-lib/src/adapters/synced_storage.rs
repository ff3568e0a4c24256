use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{Table, TableStatus, Tenant};
use crate::storage::{ProcTenants, Storage};
use crate::CoreError;

/// How old the oldest mirrored scheduling cursor may get before a claim is
/// forced through the store's transaction.
pub const DEFAULT_STALENESS_SECS: i64 = 300;

#[derive(Debug, Default)]
struct Mirror {
    tenants: Vec<Tenant>,
    tables: Vec<Table>,
}

impl Mirror {
    fn oldest_processed_at(&self) -> Option<DateTime<Utc>> {
        self.tenants.iter().map(|t| t.processed_at).min()
    }

    fn upsert_tenant(&mut self, tenant: Tenant) {
        match self.tenants.iter_mut().find(|t| t.id == tenant.id) {
            Some(slot) => *slot = tenant,
            None => self.tenants.push(tenant),
        }
    }

    fn upsert_table(&mut self, table: Table) {
        match self
            .tables
            .iter_mut()
            .find(|t| t.id == table.id && t.tenant_id == table.tenant_id)
        {
            Some(slot) => *slot = table,
            None => self.tables.push(table),
        }
    }
}

/// Staleness-gated mirror in front of the authoritative store.
///
/// Reads are answered from memory under a single coarse read/write lock;
/// writes go to the store first and only then touch the mirror, so a
/// rejected write never diverges the two. Scheduling claims run from memory
/// while the mirror is fresh and fall back to the store's transaction once
/// the oldest mirrored cursor exceeds the staleness window.
pub struct SyncedStorage {
    inner: Arc<dyn Storage>,
    mirror: RwLock<Mirror>,
    staleness: Duration,
}

impl SyncedStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self::with_staleness(inner, Duration::seconds(DEFAULT_STALENESS_SECS))
    }

    pub fn with_staleness(inner: Arc<dyn Storage>, staleness: Duration) -> Self {
        Self {
            inner,
            mirror: RwLock::new(Mirror::default()),
            staleness,
        }
    }

    /// Atomically replace the whole mirror with a full store read.
    pub async fn sync(&self) -> Result<(), CoreError> {
        let tenants = self.inner.tenants().await?;
        let tables = self.inner.tables().await?;

        let mut mirror = self.mirror.write().await;
        mirror.tenants = tenants;
        mirror.tables = tables;
        Ok(())
    }

    async fn is_stale(&self) -> bool {
        let mirror = self.mirror.read().await;
        match mirror.oldest_processed_at() {
            Some(oldest) => Utc::now() - oldest > self.staleness,
            // Nothing mirrored: only the store can tell.
            None => true,
        }
    }
}

#[async_trait]
impl Storage for SyncedStorage {
    async fn tenant(&self, id: &str) -> Result<Tenant, CoreError> {
        if id.is_empty() {
            return Err(CoreError::Validation("tenant id is required".into()));
        }

        self.mirror
            .read()
            .await
            .tenants
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("tenant {id}")))
    }

    async fn tenants(&self) -> Result<Vec<Tenant>, CoreError> {
        Ok(self.mirror.read().await.tenants.clone())
    }

    async fn store_tenant(&self, tenant: Tenant) -> Result<Tenant, CoreError> {
        let stored = self.inner.store_tenant(tenant).await?;
        self.mirror.write().await.upsert_tenant(stored.clone());
        Ok(stored)
    }

    async fn remove_tenant(&self, tenant_id: &str) -> Result<(), CoreError> {
        self.inner.remove_tenant(tenant_id).await?;
        self.mirror
            .write()
            .await
            .tenants
            .retain(|t| t.id != tenant_id);
        Ok(())
    }

    async fn proc_oldest_tenants(
        &self,
        count: usize,
        proc: &ProcTenants,
    ) -> Result<(), CoreError> {
        if self.is_stale().await {
            debug!("mirror is stale, claiming through the store");
            self.inner.proc_oldest_tenants(count, proc).await?;
            return self.sync().await;
        }

        // Soft claim: same oldest-first selection, invocation and stamping
        // as the hard path, minus the store write. A crash before the next
        // hard sync simply re-claims these tenants.
        let batch = {
            let mirror = self.mirror.read().await;
            let mut tenants = mirror.tenants.clone();
            tenants.sort_by_key(|t| t.processed_at);
            tenants.truncate(count);
            tenants
        };

        proc(batch.clone()).await?;

        let mut mirror = self.mirror.write().await;
        let now = Utc::now();
        for claimed in &batch {
            if let Some(tenant) = mirror.tenants.iter_mut().find(|t| t.id == claimed.id) {
                tenant.processed_at = now;
            }
        }
        Ok(())
    }

    async fn tables(&self) -> Result<Vec<Table>, CoreError> {
        Ok(self.mirror.read().await.tables.clone())
    }

    async fn store_table(&self, tenant_id: &str, table: Table) -> Result<Table, CoreError> {
        let stored = self.inner.store_table(tenant_id, table).await?;
        self.mirror.write().await.upsert_table(stored.clone());
        Ok(stored)
    }

    async fn disable_table(&self, tenant_id: &str, table_id: &str) -> Result<Table, CoreError> {
        let disabled = self.inner.disable_table(tenant_id, table_id).await?;
        self.mirror.write().await.upsert_table(disabled.clone());
        Ok(disabled)
    }

    async fn active_table_ids(
        &self,
        tenant_id: &str,
        table_ids: &[String],
    ) -> Result<Vec<String>, CoreError> {
        let mirror = self.mirror.read().await;
        Ok(table_ids
            .iter()
            .filter(|id| {
                mirror.tables.iter().any(|t| {
                    t.id == **id && t.tenant_id == tenant_id && t.status == TableStatus::Active
                })
            })
            .cloned()
            .collect())
    }

    async fn active_tables(&self, tenant_id: &str) -> Result<Vec<Table>, CoreError> {
        if tenant_id.is_empty() {
            return Err(CoreError::Validation("tenant id is required".into()));
        }

        let mirror = self.mirror.read().await;
        Ok(mirror
            .tables
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.status == TableStatus::Active)
            .cloned()
            .collect())
    }

    async fn remove_tenant_tables(&self, tenant_id: &str) -> Result<(), CoreError> {
        self.inner.remove_tenant_tables(tenant_id).await?;
        self.mirror
            .write()
            .await
            .tables
            .retain(|t| t.tenant_id != tenant_id);
        Ok(())
    }
}
