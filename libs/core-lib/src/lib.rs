use std::error::Error as StdError;

use gateway::GatewayError;

// Declare modules
pub mod adapters;
pub mod domain;
pub mod services;
pub mod storage;

pub use storage::{ProcTenants, Storage};

// Define a common error type for the core library
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Incompatible table: {0}")]
    Incompatible(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] Box<dyn StdError + Send + Sync>),
    #[error("Internal error: {0}")]
    Internal(String),
}

// Map typed gateway outcomes into the core taxonomy.
// This allows '?' on remote calls inside services.
impl From<GatewayError> for CoreError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(what) => CoreError::NotFound(what),
            GatewayError::Incompatible(what) => CoreError::Incompatible(what),
            GatewayError::Unauthorized => CoreError::Unauthorized("credential rejected".into()),
            GatewayError::InvalidRequest(msg) => CoreError::Validation(msg),
            GatewayError::Transport(msg) => CoreError::Internal(msg),
        }
    }
}

impl CoreError {
    /// Whether the error signals that the remote resource is gone or no
    /// longer structurally usable; both trigger self-healing disables
    /// rather than propagation.
    pub fn is_self_healing(&self) -> bool {
        matches!(self, CoreError::NotFound(_) | CoreError::Incompatible(_))
    }
}
