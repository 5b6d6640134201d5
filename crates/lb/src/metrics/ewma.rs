//! Lowest response time via a time-decayed moving average.
//!
//! Each finished request feeds its latency into the server's average with
//! `alpha = 1 - exp(-delta / window)`, where `delta` is the time since that
//! server's previous sample. Long gaps therefore let a fresh sample dominate.
//! Weights favour the servers closest to the fastest observed average.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::{LbError, LbResult};
use crate::hooks::{HookRegistrar, RequestId};
use crate::metrics::WeightProvider;
use crate::server::Server;
use crate::timing::TimingBuffer;
use crate::weights::WeightTable;

/// Assumed latency of a new server, low enough that it gets traffic to be
/// measured.
pub const INITIAL_RESPONSE_TIME_MS: f64 = 15.0;

// gap used for a server's first sample; makes alpha ~= 1
const FIRST_SAMPLE_DELTA_MS: f64 = 10_000_000.0;

const TOP_WEIGHT: f64 = 10.0;

/// `alpha * sample + (1 - alpha) * previous` with `alpha = 1 - e^(-delta/window)`.
pub fn exp_moving_avg(sample: f64, previous: f64, delta_ms: f64, window_ms: f64) -> f64 {
    let alpha = 1.0 - (-delta_ms / window_ms).exp();
    alpha * sample + (1.0 - alpha) * previous
}

/// `round(max(1, (10 / (avg / min_avg))^scaling))`
pub fn weight_for(avg: f64, min_avg: f64, scaling: f64) -> u32 {
    let ratio = if min_avg > 0.0 {
        avg / min_avg
    } else if avg > 0.0 {
        f64::INFINITY
    } else {
        1.0
    };

    (TOP_WEIGHT / ratio).powf(scaling).max(1.0).round() as u32
}

#[derive(Debug, Clone, Copy)]
struct Average {
    value_ms: f64,
    last_sample: Option<Instant>,
}

pub struct EwmaTracker {
    window_ms: f64,
    scaling: f64,
    averages: Mutex<HashMap<Server, Average>>,
    timings: TimingBuffer,
}

impl EwmaTracker {
    pub fn new(window: Duration, scaling: f64) -> LbResult<Self> {
        if window.is_zero() {
            return Err(LbError::Configuration(
                "EWMA window must be positive".to_string(),
            ));
        }
        if !scaling.is_finite() || scaling <= 0.0 {
            return Err(LbError::Configuration(format!(
                "EWMA scaling must be positive, found {scaling}"
            )));
        }

        Ok(Self {
            window_ms: window.as_secs_f64() * 1000.0,
            scaling,
            averages: Mutex::new(HashMap::new()),
            timings: TimingBuffer::new(),
        })
    }

    /// Registers this tracker's pre/post hooks with `registrar`.
    pub fn attach(self: &Arc<Self>, registrar: &dyn HookRegistrar) {
        let tracker = Arc::clone(self);
        registrar.register_pre_hook(Arc::new(move |server: &Server, id: RequestId| {
            tracker.pre_request(server, id)
        }));

        let tracker = Arc::clone(self);
        registrar.register_post_hook(Arc::new(move |server: &Server, id: RequestId| {
            tracker.post_request(server, id)
        }));
    }

    pub fn pre_request(&self, server: &Server, id: RequestId) {
        self.timings.start(server, id);
    }

    pub fn post_request(&self, server: &Server, id: RequestId) {
        let now = Instant::now();
        match self.timings.finish_at(server, id, now) {
            Some(elapsed) => self.observe(server, elapsed.as_secs_f64() * 1000.0, now),
            None => debug!("No start time recorded for {} on {}, dropping sample", id, server),
        }
    }

    /// Folds one latency sample into the server's average. Samples for
    /// servers that are not tracked are ignored.
    pub fn observe(&self, server: &Server, sample_ms: f64, now: Instant) {
        let mut averages = self.averages.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(average) = averages.get_mut(server) else {
            debug!("Ignoring sample for untracked server {}", server);
            return;
        };

        let delta_ms = average
            .last_sample
            .map_or(FIRST_SAMPLE_DELTA_MS, |last| {
                now.saturating_duration_since(last).as_secs_f64() * 1000.0
            });

        average.value_ms = exp_moving_avg(sample_ms, average.value_ms, delta_ms, self.window_ms);
        average.last_sample = Some(now);
        debug!(
            "Response time of {} is now {:.2} ms (sample {:.2} ms)",
            server, average.value_ms, sample_ms
        );
    }

    pub fn average(&self, server: &Server) -> Option<f64> {
        let averages = self.averages.lock().unwrap_or_else(PoisonError::into_inner);
        averages.get(server).map(|avg| avg.value_ms)
    }

    pub fn pending(&self) -> usize {
        self.timings.pending()
    }

    pub fn has_pending(&self, server: &Server) -> bool {
        self.timings.has_pending(server)
    }
}

impl WeightProvider for EwmaTracker {
    fn name(&self) -> &'static str {
        "ewma"
    }

    fn upsert_server(&self, server: &Server) {
        let mut averages = self.averages.lock().unwrap_or_else(PoisonError::into_inner);
        averages.entry(server.clone()).or_insert(Average {
            value_ms: INITIAL_RESPONSE_TIME_MS,
            last_sample: None,
        });
    }

    fn remove_server(&self, server: &Server) {
        let mut averages = self.averages.lock().unwrap_or_else(PoisonError::into_inner);
        averages.remove(server);
        drop(averages);

        let purged = self.timings.purge(server);
        if purged > 0 {
            info!("Dropped {} pending timings of removed server {}", purged, server);
        }
    }

    fn weights(&self) -> WeightTable {
        let averages = self.averages.lock().unwrap_or_else(PoisonError::into_inner);
        let min_avg = averages
            .values()
            .map(|avg| avg.value_ms)
            .fold(f64::INFINITY, f64::min);

        averages
            .iter()
            .map(|(server, avg)| {
                (
                    server.clone(),
                    weight_for(avg.value_ms, min_avg, self.scaling),
                )
            })
            .collect()
    }
}
