use std::sync::Arc;

use async_trait::async_trait;

// Declare modules
pub mod in_memory;
pub mod limit;
pub mod types;

pub use limit::RateLimiter;
pub use types::{
    ColumnKind, NumberCondition, NumberFilter, Row, RowPage, RowQuery, RowSort, SearchItem,
    SortDirection, TableSchema,
};

/// Typed outcomes of remote table API calls, distinct from plain transport
/// failures so that callers can react to each (disable a table, unregister a
/// tenant) instead of treating everything as fatal.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Remote resource not found: {0}")]
    NotFound(String),
    #[error("Remote table is incompatible: {0}")]
    Incompatible(String),
    #[error("Credential rejected by the remote API")]
    Unauthorized,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Port for the remote table API.
///
/// One client instance is bound to a single tenant credential; all calls are
/// rate limited by the shared process-wide limiter owned by the factory.
#[async_trait]
pub trait TableGateway: Send + Sync {
    /// Query rows of a table with filtering, sorting and cursor pagination.
    async fn query_rows(&self, table_id: &str, query: RowQuery) -> Result<RowPage, GatewayError>;

    /// Write a single numeric cell of a single row.
    async fn patch_row(&self, row_id: &str, column: &str, value: f64)
        -> Result<Row, GatewayError>;

    /// Fetch the schema of a table.
    async fn table_schema(&self, table_id: &str) -> Result<TableSchema, GatewayError>;

    /// List every table reachable under the client's credential.
    async fn search_tables(&self) -> Result<Vec<TableSchema>, GatewayError>;

    /// Cheap reachability probe; `Unauthorized` signals a revoked credential.
    async fn verify_credential(&self) -> Result<(), GatewayError>;
}

/// Port for minting per-tenant gateway clients.
///
/// The factory is owned once per process and carries the shared capabilities
/// (HTTP client, rate limiter) that individual clients must not duplicate.
pub trait GatewayFactory: Send + Sync {
    fn for_credential(&self, credential: &str) -> Result<Arc<dyn TableGateway>, GatewayError>;
}
