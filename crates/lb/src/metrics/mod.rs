//! Response-time strategies that turn live traffic into weights.

pub mod ewma;
pub mod periodic;

use crate::server::Server;
use crate::weights::WeightTable;

pub use ewma::EwmaTracker;
pub use periodic::{PeriodicTracker, RecalculationTask};

/// A source of per-server weights that follows the registry's server set.
pub trait WeightProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Starts tracking `server`. Called once per newly registered server.
    fn upsert_server(&self, server: &Server);

    /// Drops every piece of state kept for `server`.
    fn remove_server(&self, server: &Server);

    /// Current weights for every tracked server.
    fn weights(&self) -> WeightTable;
}
