//! Sidecar Error Types
//!
//! Failures that stop the sidecar from starting. Errors inside a running
//! sidecar stay with their subsystem: handler errors become error replies,
//! delivery failures are logged, revalidation failures are counted.

use thiserror::Error;

use crate::config::ConfigError;
use crate::license::client::AuthorityError;

/// Errors surfaced while starting the sidecar
#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Licensing authority error: {0}")]
    Authority(#[from] AuthorityError),
}

/// Result type alias for sidecar operations
pub type SidecarResult<T> = Result<T, SidecarError>;
