use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::types::{
    ColumnKind, NumberCondition, Row, RowPage, RowQuery, RowSort, SearchItem, SortDirection,
    TableSchema, MAX_PAGE_SIZE,
};
use crate::{GatewayError, GatewayFactory, RateLimiter, TableGateway};

#[derive(Debug, Clone)]
struct RemoteTable {
    credential: String,
    schema: TableSchema,
    rows: Vec<Row>,
    reject_patches: bool,
}

#[derive(Debug, Default)]
struct HubState {
    credentials: HashSet<String>,
    tables: HashMap<String, RemoteTable>,
    /// Extra search results injected by tests; exercises the object-tag union.
    search_extras: Vec<SearchItem>,
    patch_calls: u64,
}

/// In-memory stand-in for the remote table API.
///
/// Implements the full gateway contract (filtering, sorting, cursor
/// pagination, typed failure outcomes) against seeded state. Suitable for
/// tests and single-executable mode.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGatewayHub {
    state: Arc<RwLock<HubState>>,
    limiter: Arc<RateLimiter>,
}

impl InMemoryGatewayHub {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            state: Arc::default(),
            limiter,
        }
    }

    pub async fn add_credential(&self, credential: &str) {
        self.state
            .write()
            .await
            .credentials
            .insert(credential.to_string());
    }

    pub async fn revoke_credential(&self, credential: &str) {
        self.state.write().await.credentials.remove(credential);
    }

    pub async fn add_table(&self, credential: &str, schema: TableSchema) {
        let mut state = self.state.write().await;
        state.tables.insert(
            schema.id.clone(),
            RemoteTable {
                credential: credential.to_string(),
                schema,
                rows: Vec::new(),
                reject_patches: false,
            },
        );
    }

    pub async fn remove_table(&self, table_id: &str) {
        self.state.write().await.tables.remove(table_id);
    }

    /// Append a row; returns the minted row id.
    pub async fn add_row(
        &self,
        table_id: &str,
        created_time: DateTime<Utc>,
        column: &str,
        value: Option<f64>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let mut state = self.state.write().await;
        if let Some(table) = state.tables.get_mut(table_id) {
            table.rows.push(Row {
                id: id.clone(),
                created_time,
                values: HashMap::from([(column.to_string(), value)]),
            });
        }
        id
    }

    /// Make every patch against the table fail with a transport error.
    pub async fn reject_patches(&self, table_id: &str, reject: bool) {
        if let Some(table) = self.state.write().await.tables.get_mut(table_id) {
            table.reject_patches = reject;
        }
    }

    pub async fn inject_search_item(&self, credential: &str, item: SearchItem) {
        // Items piggyback on the credential so only that tenant sees them.
        let mut state = self.state.write().await;
        if state.credentials.contains(credential) {
            state.search_extras.push(item);
        }
    }

    /// Numeric values of a table's rows in ascending creation-time order.
    pub async fn column_values(&self, table_id: &str, column: &str) -> Vec<Option<f64>> {
        let state = self.state.read().await;
        let Some(table) = state.tables.get(table_id) else {
            return Vec::new();
        };
        let mut rows = table.rows.clone();
        rows.sort_by_key(|r| r.created_time);
        rows.iter().map(|r| r.number(column)).collect()
    }

    pub async fn patch_calls(&self) -> u64 {
        self.state.read().await.patch_calls
    }
}

impl GatewayFactory for InMemoryGatewayHub {
    fn for_credential(&self, credential: &str) -> Result<Arc<dyn TableGateway>, GatewayError> {
        if credential.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "credential is required".into(),
            ));
        }

        Ok(Arc::new(InMemoryGateway {
            state: Arc::clone(&self.state),
            limiter: Arc::clone(&self.limiter),
            credential: credential.to_string(),
        }))
    }
}

/// Per-credential client minted by [`InMemoryGatewayHub`].
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    state: Arc<RwLock<HubState>>,
    limiter: Arc<RateLimiter>,
    credential: String,
}

impl InMemoryGateway {
    fn check_credential(&self, state: &HubState) -> Result<(), GatewayError> {
        if state.credentials.contains(&self.credential) {
            Ok(())
        } else {
            Err(GatewayError::Unauthorized)
        }
    }

    fn owned_table<'a>(
        &self,
        state: &'a HubState,
        table_id: &str,
    ) -> Result<&'a RemoteTable, GatewayError> {
        match state.tables.get(table_id) {
            // A table registered under another credential must be
            // indistinguishable from a missing one.
            Some(table) if table.credential == self.credential => Ok(table),
            _ => Err(GatewayError::NotFound(format!("table {table_id}"))),
        }
    }
}

#[async_trait::async_trait]
impl TableGateway for InMemoryGateway {
    async fn query_rows(&self, table_id: &str, query: RowQuery) -> Result<RowPage, GatewayError> {
        query.validate()?;
        self.limiter.acquire().await;

        let state = self.state.read().await;
        self.check_credential(&state)?;
        let table = self.owned_table(&state, table_id)?;

        let mut rows: Vec<Row> = match &query.filter {
            Some(filter) => {
                // The remote API rejects filters over columns the schema does
                // not expose as numbers; that is the incompatibility signal.
                if !table.schema.has_column(&filter.column, &ColumnKind::Number) {
                    return Err(GatewayError::Incompatible(format!(
                        "no number column {} in table {table_id}",
                        filter.column
                    )));
                }
                table
                    .rows
                    .iter()
                    .filter(|r| match filter.condition {
                        NumberCondition::IsEmpty => r.number(&filter.column).is_none(),
                        NumberCondition::IsNotEmpty => r.number(&filter.column).is_some(),
                    })
                    .cloned()
                    .collect()
            }
            None => table.rows.clone(),
        };

        match &query.sort {
            Some(RowSort::Column { name, direction }) => {
                rows.sort_by(|a, b| {
                    let ord = a
                        .number(name)
                        .partial_cmp(&b.number(name))
                        .unwrap_or(std::cmp::Ordering::Equal);
                    match direction {
                        SortDirection::Ascending => ord,
                        SortDirection::Descending => ord.reverse(),
                    }
                });
            }
            Some(RowSort::CreatedTime { direction }) => {
                rows.sort_by_key(|r| r.created_time);
                if *direction == SortDirection::Descending {
                    rows.reverse();
                }
            }
            None => {}
        }

        let page_size = query.page_size.unwrap_or(MAX_PAGE_SIZE) as usize;
        let offset = match &query.start_cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| GatewayError::InvalidRequest(format!("bad cursor: {cursor}")))?,
            None => 0,
        };

        let end = (offset + page_size).min(rows.len());
        let has_more = end < rows.len();
        Ok(RowPage {
            rows: rows.get(offset..end).unwrap_or_default().to_vec(),
            has_more,
            next_cursor: has_more.then(|| end.to_string()),
        })
    }

    async fn patch_row(
        &self,
        row_id: &str,
        column: &str,
        value: f64,
    ) -> Result<Row, GatewayError> {
        self.limiter.acquire().await;

        let mut state = self.state.write().await;
        self.check_credential(&state)?;
        state.patch_calls += 1;

        let credential = self.credential.clone();
        for table in state.tables.values_mut() {
            if table.credential != credential {
                continue;
            }
            if table.reject_patches {
                if table.rows.iter().any(|r| r.id == row_id) {
                    return Err(GatewayError::Transport(format!(
                        "patch rejected for row {row_id}"
                    )));
                }
                continue;
            }
            if let Some(row) = table.rows.iter_mut().find(|r| r.id == row_id) {
                row.values.insert(column.to_string(), Some(value));
                return Ok(row.clone());
            }
        }

        Err(GatewayError::NotFound(format!("row {row_id}")))
    }

    async fn table_schema(&self, table_id: &str) -> Result<TableSchema, GatewayError> {
        self.limiter.acquire().await;

        let state = self.state.read().await;
        self.check_credential(&state)?;
        Ok(self.owned_table(&state, table_id)?.schema.clone())
    }

    async fn search_tables(&self) -> Result<Vec<TableSchema>, GatewayError> {
        self.limiter.acquire().await;

        let state = self.state.read().await;
        self.check_credential(&state)?;

        let items = state
            .tables
            .values()
            .filter(|t| t.credential == self.credential)
            .map(|t| SearchItem::Table(t.schema.clone()))
            .chain(state.search_extras.iter().cloned());

        let mut schemas = Vec::new();
        for item in items {
            match item {
                SearchItem::Table(schema) => schemas.push(schema),
                SearchItem::Row(row) => {
                    warn!(row_id = %row.id, "unexpected non-table item in search results");
                }
            }
        }
        Ok(schemas)
    }

    async fn verify_credential(&self) -> Result<(), GatewayError> {
        self.limiter.acquire().await;

        let state = self.state.read().await;
        self.check_credential(&state)
    }
}
