use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use gateway::GatewayFactory;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::domain::Tenant;
use crate::storage::Storage;
use crate::CoreError;

/// Per-tenant processing handler handed to [`TenantService::process_oldest`];
/// typically the fill engine's `proc_tenant`.
pub type ProcTenantFn =
    Arc<dyn Fn(Tenant) -> BoxFuture<'static, Result<Tenant, CoreError>> + Send + Sync>;

/// Tenant lifecycle and the scheduling entry point.
#[derive(Clone)]
pub struct TenantService {
    storage: Arc<dyn Storage>,
    gateways: Arc<dyn GatewayFactory>,
}

impl TenantService {
    pub fn new(storage: Arc<dyn Storage>, gateways: Arc<dyn GatewayFactory>) -> Self {
        Self { storage, gateways }
    }

    pub async fn tenant(&self, tenant_id: &str) -> Result<Tenant, CoreError> {
        self.storage.tenant(tenant_id).await
    }

    /// Persist a tenant after successful authorization.
    pub async fn register(&self, tenant: Tenant) -> Result<Tenant, CoreError> {
        self.storage.store_tenant(tenant).await
    }

    /// Drop the tenant and cascade to all of its tables.
    pub async fn unregister(&self, tenant_id: &str) -> Result<(), CoreError> {
        self.storage.remove_tenant(tenant_id).await?;
        self.storage.remove_tenant_tables(tenant_id).await
    }

    /// Reachability probe; `Unauthorized` means the credential was revoked.
    pub async fn is_available(&self, tenant: &Tenant) -> Result<(), CoreError> {
        let gw = self.gateways.for_credential(&tenant.credential)?;
        gw.verify_credential().await?;
        Ok(())
    }

    /// One scheduling cycle: claim up to `count` of the least recently
    /// processed tenants and run `proc_tenant` for each of them
    /// concurrently.
    ///
    /// Per-tenant failures are logged and swallowed so one bad tenant never
    /// blocks the rest of the batch from being marked processed; only
    /// claim-level store failures propagate (and leave the whole batch
    /// unstamped for a retry).
    pub async fn process_oldest(
        &self,
        count: usize,
        proc_tenant: ProcTenantFn,
    ) -> Result<(), CoreError> {
        let service = self.clone();

        let callback = move |tenants: Vec<Tenant>| -> BoxFuture<'static, Result<(), CoreError>> {
            let service = service.clone();
            let proc_tenant = Arc::clone(&proc_tenant);

            async move {
                let mut tasks = JoinSet::new();
                for tenant in tenants {
                    let service = service.clone();
                    let proc_tenant = Arc::clone(&proc_tenant);
                    tasks.spawn(async move {
                        service.process_one(tenant, proc_tenant).await;
                    });
                }
                while let Some(joined) = tasks.join_next().await {
                    if let Err(err) = joined {
                        error!(%err, "tenant task panicked");
                    }
                }
                Ok(())
            }
            .boxed()
        };

        self.storage.proc_oldest_tenants(count, &callback).await
    }

    async fn process_one(&self, tenant: Tenant, proc_tenant: ProcTenantFn) {
        match self.is_available(&tenant).await {
            Err(CoreError::Unauthorized(_)) => {
                // Revoked credential: the tenant asked us to go away.
                warn!(tenant = %tenant.id, "credential revoked, unregistering tenant");
                if let Err(err) = self.unregister(&tenant.id).await {
                    error!(tenant = %tenant.id, %err, "couldn't unregister tenant");
                }
                return;
            }
            Err(err) => {
                warn!(tenant = %tenant.id, %err, "availability check failed");
            }
            Ok(()) => {}
        }

        if let Err(err) = proc_tenant(tenant.clone()).await {
            error!(tenant = %tenant.id, %err, "couldn't process tenant");
        }
    }
}
