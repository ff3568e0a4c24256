use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::domain::{Table, Tenant};
use crate::CoreError;

/// Processing handler for a claimed batch of tenants.
///
/// An `Err` return aborts the claim: no tenant in the batch is marked
/// processed and the same batch is retried on the next cycle.
pub type ProcTenants =
    dyn Fn(Vec<Tenant>) -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync;

/// Port for the authoritative tenant/table store.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn tenant(&self, id: &str) -> Result<Tenant, CoreError>;
    async fn tenants(&self) -> Result<Vec<Tenant>, CoreError>;
    async fn store_tenant(&self, tenant: Tenant) -> Result<Tenant, CoreError>;
    async fn remove_tenant(&self, tenant_id: &str) -> Result<(), CoreError>;

    /// Claim up to `count` tenants with the oldest `processed_at`, invoke
    /// `proc` with the batch and, only on success, stamp their cursor to
    /// now. The implementation must serialize concurrent claims so that no
    /// two callers receive the same tenant.
    ///
    /// Ties in `processed_at` are broken by store iteration order, which is
    /// deliberately unspecified.
    async fn proc_oldest_tenants(&self, count: usize, proc: &ProcTenants)
        -> Result<(), CoreError>;

    async fn tables(&self) -> Result<Vec<Table>, CoreError>;
    async fn store_table(&self, tenant_id: &str, table: Table) -> Result<Table, CoreError>;
    /// Flip a table to Disabled. A table owned by a different tenant is
    /// indistinguishable from a missing one.
    async fn disable_table(&self, tenant_id: &str, table_id: &str) -> Result<Table, CoreError>;
    /// Subset of `table_ids` that are registered, Active and owned by the
    /// tenant. Unknown ids are skipped, not errors.
    async fn active_table_ids(
        &self,
        tenant_id: &str,
        table_ids: &[String],
    ) -> Result<Vec<String>, CoreError>;
    async fn active_tables(&self, tenant_id: &str) -> Result<Vec<Table>, CoreError>;
    /// Cascade: drop every table belonging to the tenant.
    async fn remove_tenant_tables(&self, tenant_id: &str) -> Result<(), CoreError>;
}
