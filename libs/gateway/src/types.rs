use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::GatewayError;

/// Largest page the remote API hands out in one response.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Column type as tagged by the remote schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Number,
    Title,
    RichText,
    Checkbox,
    Date,
    Select,
    CreatedTime,
    #[serde(untagged)]
    Other(String),
}

/// Schema of a remote table: its identity plus the column name -> type map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub columns: HashMap<String, ColumnKind>,
}

impl TableSchema {
    /// Whether the table carries a column of the given name and kind.
    pub fn has_column(&self, name: &str, kind: &ColumnKind) -> bool {
        self.columns.get(name) == Some(kind)
    }
}

/// A single remote row, projected down to what this service cares about:
/// identity, creation time for stable fill ordering, and the numeric cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub created_time: DateTime<Utc>,
    /// Numeric cells by column name; `None` marks a present-but-empty cell.
    #[serde(default)]
    pub values: HashMap<String, Option<f64>>,
}

impl Row {
    /// Numeric value of a column, if the column exists and is non-empty.
    pub fn number(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied().flatten()
    }
}

/// Search results mix two object shapes; the remote `object` tag tells which.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum SearchItem {
    Table(TableSchema),
    Row(Row),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Sort key for a row query: either a named column or the row creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSort {
    Column {
        name: String,
        direction: SortDirection,
    },
    CreatedTime {
        direction: SortDirection,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberCondition {
    IsEmpty,
    IsNotEmpty,
}

/// Emptiness predicate over a numeric column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberFilter {
    pub column: String,
    pub condition: NumberCondition,
}

/// A row query request: filter, sort, page size and resume cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<NumberFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<RowSort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
}

impl RowQuery {
    pub fn validate(&self) -> Result<(), GatewayError> {
        match self.page_size {
            Some(0) => Err(GatewayError::InvalidRequest(
                "page size must be positive".into(),
            )),
            Some(n) if n > MAX_PAGE_SIZE => Err(GatewayError::InvalidRequest(format!(
                "page size is too big: max {MAX_PAGE_SIZE}, provided {n}"
            ))),
            _ => Ok(()),
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPage {
    pub rows: Vec<Row>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_item_decodes_by_object_tag() {
        let raw = r#"{"object":"table","id":"tbl-1","title":"Invoices","columns":{"PlusID":"number"}}"#;
        let item: SearchItem = serde_json::from_str(raw).unwrap();
        match item {
            SearchItem::Table(schema) => {
                assert_eq!(schema.id, "tbl-1");
                assert!(schema.has_column("PlusID", &ColumnKind::Number));
            }
            SearchItem::Row(_) => panic!("expected a table item"),
        }

        let raw = r#"{"object":"row","id":"row-1","created_time":"2024-02-01T00:00:00Z","values":{"PlusID":null}}"#;
        let item: SearchItem = serde_json::from_str(raw).unwrap();
        match item {
            SearchItem::Row(row) => {
                assert_eq!(row.id, "row-1");
                assert_eq!(row.number("PlusID"), None);
            }
            SearchItem::Table(_) => panic!("expected a row item"),
        }
    }

    #[test]
    fn unknown_column_kind_is_preserved() {
        let kind: ColumnKind = serde_json::from_str(r#""rollup""#).unwrap();
        assert_eq!(kind, ColumnKind::Other("rollup".into()));
    }

    #[test]
    fn query_rejects_oversized_page() {
        let query = RowQuery {
            page_size: Some(MAX_PAGE_SIZE + 1),
            ..Default::default()
        };
        assert!(matches!(
            query.validate(),
            Err(GatewayError::InvalidRequest(_))
        ));

        let query = RowQuery {
            page_size: Some(1),
            ..Default::default()
        };
        assert!(query.validate().is_ok());
    }
}
