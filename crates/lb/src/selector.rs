use std::sync::Arc;

use crate::chooser::WeightedRandomChooser;
use crate::error::LbResult;
use crate::server::Server;
use crate::weights::WeightTable;
use crate::wrr::WeightedRoundRobin;

/// The picker consulted on every request.
pub enum Selector {
    /// Fed wholesale weight tables by the registry.
    RoundRobin(WeightedRoundRobin),
    /// Fed incremental patches by the periodic tracker.
    Random(Arc<WeightedRandomChooser>),
}

impl Selector {
    pub fn next(&self) -> LbResult<Server> {
        match self {
            Selector::RoundRobin(wrr) => wrr.next(),
            Selector::Random(chooser) => chooser.pick(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Selector::RoundRobin(_) => "weighted-round-robin",
            Selector::Random(_) => "weighted-random",
        }
    }

    pub fn weights(&self) -> WeightTable {
        match self {
            Selector::RoundRobin(wrr) => wrr.weights(),
            Selector::Random(chooser) => chooser.weights(),
        }
    }
}
