//! Smooth weighted round robin.
//!
//! The selector keeps the whole runtime state (servers, weights, max, gcd and
//! the `last`/`cw` cursor) in one snapshot behind an [`ArcSwap`]. Every weight
//! update builds a fresh snapshot and swaps it in, so a `next()` that already
//! loaded the previous snapshot finishes against a consistent view. The new
//! snapshot picks up the cursor where the old one stopped, and an unchanged
//! table is not rebuilt at all.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use log::{debug, info};

use crate::error::{LbError, LbResult};
use crate::server::Server;
use crate::weights::WeightTable;

/// Greatest common divisor of all weights.
///
/// Scans downward from the smallest weight and stops at the first value
/// above 1 that divides every weight. Falls back to 1.
pub fn gcd(weights: &[u32]) -> u32 {
    let Some(&smallest) = weights.iter().min() else {
        return 1;
    };

    (2..=smallest)
        .rev()
        .find(|divisor| weights.iter().all(|w| w % divisor == 0))
        .unwrap_or(1)
}

struct Snapshot {
    servers: Vec<Server>,
    weights: Vec<u32>,
    max: u32,
    gcd: u32,
    cursor: Mutex<Cursor>,
}

struct Cursor {
    last: usize,
    cw: i64,
}

impl Snapshot {
    fn build(table: &WeightTable) -> Self {
        let (servers, weights): (Vec<Server>, Vec<u32>) =
            table.iter().map(|(s, w)| (s.clone(), w)).unzip();
        let max = weights.iter().copied().max().unwrap_or(0);
        let gcd = gcd(&weights);

        Self {
            // first advance lands on index 0 and loads cw
            cursor: Mutex::new(Cursor {
                last: servers.len().saturating_sub(1),
                cw: 0,
            }),
            servers,
            weights,
            max,
            gcd,
        }
    }

    // Continues the cycle of `previous` so a rebuild does not restart it.
    // cw is capped at the weight under the cursor, which keeps the search
    // within one pass.
    fn carry(table: &WeightTable, previous: &Snapshot) -> Self {
        let mut snapshot = Self::build(table);
        let n = snapshot.servers.len();
        if n == 0 || previous.servers.is_empty() {
            return snapshot;
        }

        let (last, cw) = {
            let cursor = previous.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            (cursor.last, cursor.cw)
        };
        // nothing picked yet
        if cw == 0 {
            return snapshot;
        }

        let last = last % n;
        let cw = cw.clamp(0, i64::from(snapshot.weights[last]));
        *snapshot.cursor.get_mut().unwrap_or_else(PoisonError::into_inner) = Cursor { last, cw };
        snapshot
    }

    fn same_weights(&self, table: &WeightTable) -> bool {
        self.servers.len() == table.len()
            && self
                .servers
                .iter()
                .zip(&self.weights)
                .zip(table.iter())
                .all(|((s, w), (ts, tw))| s == ts && *w == tw)
    }

    fn next(&self) -> LbResult<Server> {
        let n = self.servers.len();
        if n == 0 {
            return Err(LbError::NoServers);
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);

        // cw never exceeds max and the heaviest server has weight max, so one
        // pass over all n servers always finds a candidate.
        for _ in 0..n {
            cursor.last = (cursor.last + 1) % n;
            if cursor.last == 0 {
                cursor.cw -= i64::from(self.gcd);
                if cursor.cw <= 0 {
                    cursor.cw = i64::from(self.max);
                }
            }

            if i64::from(self.weights[cursor.last]) >= cursor.cw {
                return Ok(self.servers[cursor.last].clone());
            }
        }

        Err(LbError::SelectionExhausted(n))
    }
}

/// Deterministic weighted round robin over an immutable weight snapshot.
pub struct WeightedRoundRobin {
    state: ArcSwap<Snapshot>,
}

impl WeightedRoundRobin {
    /// Builds a selector from an initial table, which must not be empty.
    pub fn new(table: &WeightTable) -> LbResult<Self> {
        if table.is_empty() {
            return Err(LbError::Configuration(
                "initial weight table is empty".to_string(),
            ));
        }

        let wrr = Self::default();
        wrr.update(table);
        Ok(wrr)
    }

    /// Returns the next server in the weighted cycle.
    pub fn next(&self) -> LbResult<Server> {
        let server = self.state.load().next()?;
        debug!("WRR selected {}", server);
        Ok(server)
    }

    /// Replaces the whole state with one built from `table`, continuing the
    /// current cycle. An unchanged table keeps the current state.
    ///
    /// An empty table is accepted here; `next()` then reports `NoServers`.
    pub fn update(&self, table: &WeightTable) {
        let current = self.state.load();
        if current.same_weights(table) {
            debug!("WRR weights unchanged");
            return;
        }

        let snapshot = Snapshot::carry(table, &current);
        info!("Changing WRR weights. gcd: {}, weights: {{ {} }}", snapshot.gcd, table);
        self.state.store(Arc::new(snapshot));
    }

    /// The weights currently in use.
    pub fn weights(&self) -> WeightTable {
        let snapshot = self.state.load();
        snapshot
            .servers
            .iter()
            .cloned()
            .zip(snapshot.weights.iter().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.load().servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self {
            state: ArcSwap::from_pointee(Snapshot::build(&WeightTable::new())),
        }
    }
}
