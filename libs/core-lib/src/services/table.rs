use std::sync::Arc;

use gateway::{
    ColumnKind, GatewayError, GatewayFactory, NumberCondition, NumberFilter, RowQuery, RowSort,
    SortDirection, TableGateway,
};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::domain::{diff, Table, Tenant, DEFAULT_COUNTER_COLUMN};
use crate::storage::Storage;
use crate::CoreError;

/// Upper bound on concurrent patch requests per table. Caps the outbound
/// write fan-out against the rate-limited remote API; not a correctness
/// knob.
const UPDATE_CHUNK_SIZE: usize = 3;

/// Table discovery, registration and the per-tenant fill engine.
#[derive(Clone)]
pub struct TableService {
    storage: Arc<dyn Storage>,
    gateways: Arc<dyn GatewayFactory>,
    chunk_size: usize,
}

impl TableService {
    pub fn new(storage: Arc<dyn Storage>, gateways: Arc<dyn GatewayFactory>) -> Self {
        Self {
            storage,
            gateways,
            chunk_size: UPDATE_CHUNK_SIZE,
        }
    }

    /// Every remote table reachable under the tenant's credential that
    /// exposes a numeric counter column, as fresh Active records.
    pub async fn available(&self, tenant: &Tenant) -> Result<Vec<Table>, CoreError> {
        tenant.validate()?;
        let gw = self.gateways.for_credential(&tenant.credential)?;

        let schemas = gw.search_tables().await?;
        let mut tables = Vec::new();
        for schema in schemas {
            if !schema.has_column(DEFAULT_COUNTER_COLUMN, &ColumnKind::Number) {
                continue;
            }
            match Table::new(&schema.id, &tenant.id) {
                Ok(table) => tables.push(table),
                Err(err) => {
                    warn!(tenant = %tenant.id, table = %schema.id, %err, "couldn't compose a table record");
                }
            }
        }
        Ok(tables)
    }

    /// `Ok` when the table currently qualifies for filling; `Incompatible`
    /// when the counter column is missing or not numeric.
    pub async fn is_fillable(&self, table_id: &str, tenant: &Tenant) -> Result<(), CoreError> {
        if table_id.is_empty() {
            return Err(CoreError::Validation("table id is required".into()));
        }
        let gw = self.gateways.for_credential(&tenant.credential)?;

        let schema = gw.table_schema(table_id).await?;
        if !schema.has_column(DEFAULT_COUNTER_COLUMN, &ColumnKind::Number) {
            return Err(CoreError::Incompatible(format!(
                "table {table_id} has no number column {DEFAULT_COUNTER_COLUMN}"
            )));
        }
        Ok(())
    }

    pub async fn register(&self, tenant_id: &str, table: Table) -> Result<Table, CoreError> {
        self.storage.store_table(tenant_id, table).await
    }

    /// Tables visible remotely but not yet registered as active.
    ///
    /// A registered table that discovery no longer returns is left alone
    /// here; only the fill step's not-found handling retires tables.
    pub async fn unregistered_diff(&self, tenant: &Tenant) -> Result<Vec<Table>, CoreError> {
        let available = self.available(tenant).await?;
        let ids: Vec<String> = available.iter().map(|t| t.id.clone()).collect();

        let registered = self.storage.active_table_ids(&tenant.id, &ids).await?;
        if registered.len() == ids.len() {
            return Ok(Vec::new());
        }

        let unknown = diff(&ids, &registered);
        Ok(available
            .into_iter()
            .filter(|t| unknown.contains(&t.id))
            .collect())
    }

    /// Register tables concurrently; individual failures are logged and
    /// skipped so one bad table doesn't abort the batch.
    pub async fn register_all(&self, tables: Vec<Table>) {
        let mut tasks = JoinSet::new();
        for table in tables {
            let service = self.clone();
            tasks.spawn(async move {
                let (tenant_id, table_id) = (table.tenant_id.clone(), table.id.clone());
                if let Err(err) = service.register(&tenant_id, table).await {
                    warn!(tenant = %tenant_id, table = %table_id, %err, "couldn't register a table");
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(%err, "registration task panicked");
            }
        }
    }

    /// Fill the table's counter column with successive integers.
    ///
    /// Rows are numbered in ascending creation-time order starting at one
    /// past the current maximum. A remote not-found or schema mismatch
    /// disables the table and returns Ok: that is the expected self-healing
    /// path, not a failure.
    pub async fn fill(&self, table: &Table, tenant: &Tenant) -> Result<(), CoreError> {
        let gw = self.gateways.for_credential(&tenant.credential)?;
        let column = table.counter_column.as_str();

        // Seed the counter from the row holding the current maximum.
        let seed = gw
            .query_rows(
                &table.id,
                RowQuery {
                    filter: Some(NumberFilter {
                        column: column.to_string(),
                        condition: NumberCondition::IsNotEmpty,
                    }),
                    sort: Some(RowSort::Column {
                        name: column.to_string(),
                        direction: SortDirection::Descending,
                    }),
                    page_size: Some(1),
                    start_cursor: None,
                },
            )
            .await;

        let seed_page = match seed {
            Ok(page) => page,
            Err(err @ (GatewayError::NotFound(_) | GatewayError::Incompatible(_))) => {
                info!(tenant = %tenant.id, table = %table.id, %err, "disabling table");
                self.storage.disable_table(&tenant.id, &table.id).await?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let mut counter: i64 = match seed_page.rows.first() {
            // Fractional read-back truncates toward zero.
            Some(row) => match row.number(column) {
                Some(max) => max.trunc() as i64,
                None => {
                    return Err(CoreError::Incompatible(format!(
                        "table {}: empty value in column {column}",
                        table.id
                    )))
                }
            },
            None => 0,
        };

        // Every successful patch removes its row from the is-empty result
        // set, so a resume cursor into that set would land past rows that
        // are still unnumbered. Re-query from the start instead; the loop
        // ends when a query comes back empty.
        loop {
            let page = gw
                .query_rows(
                    &table.id,
                    RowQuery {
                        filter: Some(NumberFilter {
                            column: column.to_string(),
                            condition: NumberCondition::IsEmpty,
                        }),
                        sort: Some(RowSort::CreatedTime {
                            direction: SortDirection::Ascending,
                        }),
                        page_size: None,
                        start_cursor: None,
                    },
                )
                .await
                .map_err(CoreError::from)?;

            if page.rows.is_empty() {
                return Ok(());
            }

            for chunk in page.rows.chunks(self.chunk_size) {
                let mut patches = JoinSet::new();
                for row in chunk {
                    // Increment before dispatch: each row gets a distinct,
                    // strictly increasing value in row order.
                    counter += 1;
                    let gw = Arc::clone(&gw);
                    let row_id = row.id.clone();
                    let column = column.to_string();
                    let value = counter as f64;
                    patches.spawn(async move {
                        gw.patch_row(&row_id, &column, value)
                            .await
                            .map(|_| ())
                            .map_err(|err| (row_id, err))
                    });
                }

                // Always drain the chunk, even after a failure, so no patch
                // is left in flight when this returns.
                let mut failure: Option<CoreError> = None;
                while let Some(joined) = patches.join_next().await {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err((row_id, err))) => {
                            error!(tenant = %tenant.id, table = %table.id, row = %row_id, %err, "patch failed");
                            failure.get_or_insert(err.into());
                        }
                        Err(err) => {
                            error!(tenant = %tenant.id, table = %table.id, %err, "patch task panicked");
                            failure.get_or_insert(CoreError::Internal(err.to_string()));
                        }
                    }
                }
                // Already-numbered rows stay numbered; a later run picks up
                // the remaining empty ones.
                if let Some(err) = failure {
                    return Err(err);
                }
            }

        }
    }

    /// One full tenant invocation: discover and register new tables while
    /// concurrently filling every known active one.
    pub async fn proc_tenant(&self, tenant: Tenant) -> Result<Tenant, CoreError> {
        let tables = match self.storage.active_tables(&tenant.id).await {
            Ok(tables) => tables,
            Err(CoreError::NotFound(_)) => Vec::new(),
            Err(err) => {
                return Err(CoreError::Internal(format!(
                    "tenant {}: couldn't list active tables: {err}",
                    tenant.id
                )))
            }
        };

        let mut tasks = JoinSet::new();

        // Branch A: discovery + registration.
        {
            let service = self.clone();
            let tenant = tenant.clone();
            tasks.spawn(async move {
                match service.unregistered_diff(&tenant).await {
                    Ok(fresh) if !fresh.is_empty() => {
                        info!(tenant = %tenant.id, count = fresh.len(), "registering discovered tables");
                        service.register_all(fresh).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(tenant = %tenant.id, %err, "couldn't fetch unregistered tables");
                    }
                }
            });
        }

        // Branch B: one fill task per active table.
        for table in tables {
            let service = self.clone();
            let tenant = tenant.clone();
            tasks.spawn(async move {
                if let Err(err) = service.fill(&table, &tenant).await {
                    error!(tenant = %tenant.id, table = %table.id, %err, "couldn't fill the table");
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(tenant = %tenant.id, %err, "tenant subtask panicked");
            }
        }

        Ok(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStorage;
    use crate::domain::TableStatus;
    use chrono::{TimeZone, Utc};
    use gateway::in_memory::InMemoryGatewayHub;
    use gateway::{RateLimiter, TableSchema};
    use std::collections::HashMap;

    const COL: &str = DEFAULT_COUNTER_COLUMN;

    fn schema(id: &str) -> TableSchema {
        TableSchema {
            id: id.to_string(),
            title: format!("table {id}"),
            columns: HashMap::from([(COL.to_string(), ColumnKind::Number)]),
        }
    }

    fn schema_without_counter(id: &str) -> TableSchema {
        TableSchema {
            id: id.to_string(),
            title: format!("table {id}"),
            columns: HashMap::from([("Name".to_string(), ColumnKind::Title)]),
        }
    }

    fn at(minute: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        hub: Arc<InMemoryGatewayHub>,
        service: TableService,
        tenant: Tenant,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let hub = Arc::new(InMemoryGatewayHub::new(Arc::new(RateLimiter::new(
            10_000, 10_000,
        ))));
        hub.add_credential("secret").await;
        let service = TableService::new(storage.clone(), hub.clone());
        let tenant = Tenant::new("ws-1", "secret").unwrap();
        Fixture {
            storage,
            hub,
            service,
            tenant,
        }
    }

    async fn tracked_table(fx: &Fixture, table_id: &str) -> Table {
        fx.storage
            .store_table("ws-1", Table::new(table_id, "ws-1").unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fill_continues_from_the_existing_maximum() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema("tbl")).await;
        let table = tracked_table(&fx, "tbl").await;

        // Max existing value 5; two empty rows created at t0 < t1.
        fx.hub.add_row("tbl", at(0), COL, None).await;
        fx.hub.add_row("tbl", at(5), COL, Some(5.0)).await;
        fx.hub.add_row("tbl", at(1), COL, None).await;

        fx.service.fill(&table, &fx.tenant).await.unwrap();

        assert_eq!(
            fx.hub.column_values("tbl", COL).await,
            vec![Some(6.0), Some(7.0), Some(5.0)]
        );
    }

    #[tokio::test]
    async fn fill_starts_at_one_on_a_blank_table() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema("tbl")).await;
        let table = tracked_table(&fx, "tbl").await;

        for minute in 0..4 {
            fx.hub.add_row("tbl", at(minute), COL, None).await;
        }

        fx.service.fill(&table, &fx.tenant).await.unwrap();

        assert_eq!(
            fx.hub.column_values("tbl", COL).await,
            vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]
        );
    }

    #[tokio::test]
    async fn fill_truncates_a_fractional_maximum() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema("tbl")).await;
        let table = tracked_table(&fx, "tbl").await;

        fx.hub.add_row("tbl", at(0), COL, Some(5.9)).await;
        fx.hub.add_row("tbl", at(1), COL, None).await;

        fx.service.fill(&table, &fx.tenant).await.unwrap();

        assert_eq!(
            fx.hub.column_values("tbl", COL).await,
            vec![Some(5.9), Some(6.0)]
        );
    }

    #[tokio::test]
    async fn fill_is_idempotent() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema("tbl")).await;
        let table = tracked_table(&fx, "tbl").await;

        fx.hub.add_row("tbl", at(0), COL, None).await;
        fx.hub.add_row("tbl", at(1), COL, None).await;

        fx.service.fill(&table, &fx.tenant).await.unwrap();
        let first_run = fx.hub.patch_calls().await;
        assert_eq!(first_run, 2);

        // No rows appeared in between: the second run patches nothing.
        fx.service.fill(&table, &fx.tenant).await.unwrap();
        assert_eq!(fx.hub.patch_calls().await, first_run);
        assert_eq!(
            fx.hub.column_values("tbl", COL).await,
            vec![Some(1.0), Some(2.0)]
        );
    }

    #[tokio::test]
    async fn fill_numbers_gaplessly_across_chunks() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema("tbl")).await;
        let table = tracked_table(&fx, "tbl").await;

        // More rows than one chunk (3); 8 rows exercises uneven chunking.
        for minute in 0..8 {
            fx.hub.add_row("tbl", at(minute), COL, None).await;
        }

        fx.service.fill(&table, &fx.tenant).await.unwrap();

        let values: Vec<f64> = fx
            .hub
            .column_values("tbl", COL)
            .await
            .into_iter()
            .map(Option::unwrap)
            .collect();
        let expected: Vec<f64> = (1..=8).map(|n| n as f64).collect();
        assert_eq!(values, expected);
    }

    #[tokio::test]
    async fn fill_numbers_every_row_beyond_one_page() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema("tbl")).await;
        let table = tracked_table(&fx, "tbl").await;

        // More empty rows than the remote's 100-row page limit: one
        // invocation must still number all of them, even though each
        // successful patch shrinks the is-empty result set between
        // page queries.
        let total = 120usize;
        let base = at(0);
        for second in 0..total {
            fx.hub
                .add_row("tbl", base + chrono::Duration::seconds(second as i64), COL, None)
                .await;
        }

        fx.service.fill(&table, &fx.tenant).await.unwrap();

        let values: Vec<f64> = fx
            .hub
            .column_values("tbl", COL)
            .await
            .into_iter()
            .map(Option::unwrap)
            .collect();
        let expected: Vec<f64> = (1..=total).map(|n| n as f64).collect();
        assert_eq!(values, expected);
    }

    #[tokio::test]
    async fn incompatible_table_is_disabled_without_patching() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema_without_counter("tbl")).await;
        let table = tracked_table(&fx, "tbl").await;
        fx.hub.add_row("tbl", at(0), "Name", None).await;

        fx.service.fill(&table, &fx.tenant).await.unwrap();

        assert_eq!(fx.hub.patch_calls().await, 0);
        let stored = fx.storage.tables().await.unwrap();
        assert_eq!(stored[0].status, TableStatus::Disabled);
    }

    #[tokio::test]
    async fn vanished_table_is_disabled() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema("tbl")).await;
        let table = tracked_table(&fx, "tbl").await;
        fx.hub.remove_table("tbl").await;

        fx.service.fill(&table, &fx.tenant).await.unwrap();

        let stored = fx.storage.tables().await.unwrap();
        assert_eq!(stored[0].status, TableStatus::Disabled);
    }

    #[tokio::test]
    async fn patch_failure_stops_the_fill_and_keeps_numbered_rows() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema("tbl")).await;
        let table = tracked_table(&fx, "tbl").await;
        for minute in 0..6 {
            fx.hub.add_row("tbl", at(minute), COL, None).await;
        }
        fx.hub.reject_patches("tbl", true).await;

        let res = fx.service.fill(&table, &fx.tenant).await;
        assert!(res.is_err());

        // Only the first chunk was dispatched before the failure surfaced.
        assert_eq!(fx.hub.patch_calls().await, fx.service.chunk_size as u64);
        assert!(fx
            .hub
            .column_values("tbl", COL)
            .await
            .iter()
            .all(Option::is_none));

        // The table stays active: a transient write failure is retried on a
        // later cycle, unlike a structural incompatibility.
        let stored = fx.storage.tables().await.unwrap();
        assert_eq!(stored[0].status, TableStatus::Active);
    }

    #[tokio::test]
    async fn discovery_registers_only_eligible_unknown_tables() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema("tbl-new")).await;
        fx.hub.add_table("secret", schema("tbl-known")).await;
        fx.hub
            .add_table("secret", schema_without_counter("tbl-plain"))
            .await;
        tracked_table(&fx, "tbl-known").await;

        let fresh = fx.service.unregistered_diff(&fx.tenant).await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, "tbl-new");

        fx.service.register_all(fresh).await;
        let active = fx.storage.active_tables("ws-1").await.unwrap();
        let mut ids: Vec<&str> = active.iter().map(|t| t.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["tbl-known", "tbl-new"]);
    }

    #[tokio::test]
    async fn is_fillable_checks_the_counter_column() {
        let fx = fixture().await;
        fx.hub.add_table("secret", schema("tbl-good")).await;
        fx.hub
            .add_table("secret", schema_without_counter("tbl-bad"))
            .await;

        assert!(fx.service.is_fillable("tbl-good", &fx.tenant).await.is_ok());
        assert!(matches!(
            fx.service.is_fillable("tbl-bad", &fx.tenant).await,
            Err(CoreError::Incompatible(_))
        ));
        assert!(matches!(
            fx.service.is_fillable("tbl-nope", &fx.tenant).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn proc_tenant_discovers_and_fills_in_one_pass() {
        let fx = fixture().await;
        // One tracked table with work to do, one brand new table.
        fx.hub.add_table("secret", schema("tbl-tracked")).await;
        fx.hub.add_table("secret", schema("tbl-new")).await;
        let _ = tracked_table(&fx, "tbl-tracked").await;
        fx.hub.add_row("tbl-tracked", at(0), COL, None).await;

        fx.service.proc_tenant(fx.tenant.clone()).await.unwrap();

        assert_eq!(
            fx.hub.column_values("tbl-tracked", COL).await,
            vec![Some(1.0)]
        );
        let active = fx.storage.active_tables("ws-1").await.unwrap();
        assert_eq!(active.len(), 2);
    }
}
