pub mod table;
pub mod tenant;

pub use table::{diff, Table, TableStatus, DEFAULT_COUNTER_COLUMN};
pub use tenant::Tenant;
