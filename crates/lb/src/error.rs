//! Load balancer error types.

use thiserror::Error;

use crate::server::Server;

/// Errors produced by the balancing core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LbError {
    /// Invalid construction parameters. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The endpoint string could not be normalized into a server identity.
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    /// There is nothing to select from.
    #[error("no servers available")]
    NoServers,

    /// The round robin search ran past its iteration bound.
    #[error("no server accepted after a full cycle of {0} candidates")]
    SelectionExhausted(usize),

    /// A weight patch did not cover every known server.
    #[error("weight for server {0} is missing")]
    MetricsInconsistency(Server),

    /// The server is not registered.
    #[error("server {0} not found")]
    ServerNotFound(Server),
}

/// Result type for load balancer operations.
pub type LbResult<T> = Result<T, LbError>;
