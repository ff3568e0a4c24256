pub mod table;
pub mod tenant;

pub use table::TableService;
pub use tenant::{ProcTenantFn, TenantService};
