//! Weighted random chooser.
//!
//! Picks draw a number in `[1, max]` and binary search the cumulative weight
//! totals. Writers rebuild the choice list and totals and swap them in as one
//! state, so picks never lock.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use log::{debug, error, info};
use rand::Rng;

use crate::error::{LbError, LbResult};
use crate::server::Server;
use crate::weights::{MIN_WEIGHT, WeightTable};

#[derive(Clone)]
struct Choice {
    server: Server,
    weight: u32,
}

#[derive(Clone, Default)]
struct ChooserState {
    choices: Vec<Choice>,
    totals: Vec<u64>,
    max: u64,
}

impl ChooserState {
    fn with_choices(choices: Vec<Choice>) -> Self {
        let mut running = 0u64;
        let totals = choices
            .iter()
            .map(|choice| {
                running += u64::from(choice.weight);
                running
            })
            .collect();

        Self {
            choices,
            totals,
            max: running,
        }
    }

    fn position(&self, server: &Server) -> Option<usize> {
        self.choices.iter().position(|c| &c.server == server)
    }
}

pub struct WeightedRandomChooser {
    state: ArcSwap<ChooserState>,
    // serializes writers; picks only load the state
    write: Mutex<()>,
    epsilon: f64,
}

impl WeightedRandomChooser {
    /// `epsilon` is the share of the old weight kept on every patch and must
    /// be in `(0, 1]`.
    pub fn new(epsilon: f64) -> LbResult<Self> {
        if !(epsilon > 0.0 && epsilon <= 1.0) {
            return Err(LbError::Configuration(format!(
                "epsilon must be in (0, 1], found {epsilon}"
            )));
        }

        Ok(Self {
            state: ArcSwap::from_pointee(ChooserState::default()),
            write: Mutex::new(()),
            epsilon,
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn pick(&self) -> LbResult<Server> {
        let state = self.state.load();
        if state.choices.is_empty() || state.max == 0 {
            return Err(LbError::NoServers);
        }

        let draw = rand::thread_rng().gen_range(1..=state.max);
        let idx = state.totals.partition_point(|&total| total < draw);
        let server = state.choices[idx].server.clone();
        debug!("Chooser selected {} (draw {} of {})", server, draw, state.max);
        Ok(server)
    }

    /// Adds `server` with an average share of the current total weight.
    /// Returns `false` if it was already present.
    pub fn add_server(&self, server: &Server) -> bool {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.state.load();
        if state.position(server).is_some() {
            return false;
        }

        let current_max = state.max.max(1);
        let count = state.choices.len().max(1) as u64;
        let weight = u32::try_from(current_max / count)
            .unwrap_or(u32::MAX)
            .max(MIN_WEIGHT);

        let mut choices = state.choices.clone();
        choices.push(Choice {
            server: server.clone(),
            weight,
        });
        info!("Added server {} to chooser with weight {}", server, weight);
        self.state.store(Arc::new(ChooserState::with_choices(choices)));
        true
    }

    /// Blends every weight toward its target:
    /// `round(weight * epsilon + target * (1 - epsilon))`.
    ///
    /// A target missing for a known server is a defect in the caller; it is
    /// reported and nothing is changed.
    pub fn patch_weights(&self, targets: &WeightTable) -> LbResult<()> {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.state.load();

        let mut choices = Vec::with_capacity(state.choices.len());
        for choice in &state.choices {
            let Some(target) = targets.get(&choice.server) else {
                error!("Weight for server {} is missing from patch", choice.server);
                return Err(LbError::MetricsInconsistency(choice.server.clone()));
            };

            let blended = f64::from(choice.weight) * self.epsilon
                + f64::from(target) * (1.0 - self.epsilon);
            let weight = (blended.round() as u32).max(MIN_WEIGHT);
            info!(
                "Updated weight for server {} from {} to {}",
                choice.server, choice.weight, weight
            );
            choices.push(Choice {
                server: choice.server.clone(),
                weight,
            });
        }

        self.state.store(Arc::new(ChooserState::with_choices(choices)));
        Ok(())
    }

    pub fn remove_server(&self, server: &Server) -> LbResult<()> {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.state.load();
        let idx = state
            .position(server)
            .ok_or_else(|| LbError::ServerNotFound(server.clone()))?;

        let mut choices = state.choices.clone();
        choices.remove(idx);
        info!("Removed server {} from chooser", server);
        self.state.store(Arc::new(ChooserState::with_choices(choices)));
        Ok(())
    }

    pub fn weights(&self) -> WeightTable {
        self.state
            .load()
            .choices
            .iter()
            .map(|c| (c.server.clone(), c.weight))
            .collect()
    }

    pub fn contains(&self, server: &Server) -> bool {
        self.state.load().position(server).is_some()
    }

    pub fn len(&self) -> usize {
        self.state.load().choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
