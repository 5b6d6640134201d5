//! Lowest response time via periodic sum/count averaging.
//!
//! Finished requests add their duration to a per-server accumulator. A
//! background task wakes up every window, turns each accumulator into a
//! target weight of `BASE_WEIGHT / average`, resets the accumulators and
//! patches the weighted random chooser with the result.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::chooser::WeightedRandomChooser;
use crate::error::{LbError, LbResult};
use crate::hooks::{HookRegistrar, RequestId};
use crate::metrics::WeightProvider;
use crate::server::Server;
use crate::timing::TimingBuffer;
use crate::weights::{MIN_WEIGHT, WeightTable};

/// Weight of a server averaging 1 ms per request.
pub const BASE_WEIGHT: f64 = 100_000.0;

/// Duration sum and sample count of one server since the last tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulator {
    pub sum_ms: u64,
    pub count: u64,
}

impl Accumulator {
    /// Neutral starting point; keeps the average defined with no samples.
    pub const BASELINE: Accumulator = Accumulator { sum_ms: 1, count: 1 };

    pub fn record(&mut self, duration_ms: u64) {
        self.sum_ms = self.sum_ms.saturating_add(duration_ms);
        self.count = self.count.saturating_add(1);
    }

    pub fn weight(&self) -> u32 {
        let average = self.sum_ms as f64 / self.count.max(1) as f64;
        let weight = if average > 0.0 {
            BASE_WEIGHT / average
        } else {
            BASE_WEIGHT
        };
        (weight.round() as u32).max(MIN_WEIGHT)
    }
}

type SharedAccumulator = Arc<Mutex<Accumulator>>;

pub struct PeriodicTracker {
    // BTreeMap so a full recalculation locks servers in identity order
    accumulators: RwLock<BTreeMap<Server, SharedAccumulator>>,
    chooser: Arc<WeightedRandomChooser>,
    timings: TimingBuffer,
    window: Duration,
    recalculations: AtomicU64,
}

impl PeriodicTracker {
    pub fn new(window: Duration, epsilon: f64) -> LbResult<Self> {
        if window.is_zero() {
            return Err(LbError::Configuration(
                "recalculation window must be positive".to_string(),
            ));
        }

        Ok(Self {
            accumulators: RwLock::new(BTreeMap::new()),
            chooser: Arc::new(WeightedRandomChooser::new(epsilon)?),
            timings: TimingBuffer::new(),
            window,
            recalculations: AtomicU64::new(0),
        })
    }

    /// The chooser this tracker pushes its weights into.
    pub fn chooser(&self) -> Arc<WeightedRandomChooser> {
        Arc::clone(&self.chooser)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Registers this tracker's pre/post hooks with `registrar`.
    pub fn attach(self: &Arc<Self>, registrar: &dyn HookRegistrar) {
        let tracker = Arc::clone(self);
        registrar.register_pre_hook(Arc::new(move |server: &Server, id: RequestId| {
            tracker.timings.start(server, id)
        }));

        let tracker = Arc::clone(self);
        registrar.register_post_hook(Arc::new(move |server: &Server, id: RequestId| {
            match tracker.timings.finish(server, id) {
                Some(elapsed) => tracker.record(server, elapsed),
                None => debug!("No start time recorded for {} on {}, dropping sample", id, server),
            }
        }));
    }

    /// Adds one request duration to `server`'s accumulator.
    pub fn record(&self, server: &Server, duration: Duration) {
        let accumulator = {
            let accumulators = self.accumulators.read().unwrap_or_else(PoisonError::into_inner);
            match accumulators.get(server) {
                Some(acc) => Arc::clone(acc),
                None => return,
            }
        };

        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        accumulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(duration_ms);
    }

    pub fn accumulator(&self, server: &Server) -> Option<Accumulator> {
        let accumulators = self.accumulators.read().unwrap_or_else(PoisonError::into_inner);
        accumulators
            .get(server)
            .map(|acc| *acc.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn pending(&self) -> usize {
        self.timings.pending()
    }

    pub fn has_pending(&self, server: &Server) -> bool {
        self.timings.has_pending(server)
    }

    /// Number of recalculations run so far.
    pub fn recalculation_count(&self) -> u64 {
        self.recalculations.load(Ordering::Acquire)
    }

    /// Computes target weights from every accumulator, resets them and
    /// patches the chooser.
    pub fn recalculate(&self) -> LbResult<()> {
        self.recalculations.fetch_add(1, Ordering::AcqRel);

        // Hold the map for the whole pass so the chooser and the accumulators
        // describe the same server set when the patch lands.
        let accumulators = self.accumulators.read().unwrap_or_else(PoisonError::into_inner);

        let mut guards: Vec<(&Server, MutexGuard<'_, Accumulator>)> = accumulators
            .iter()
            .map(|(server, acc)| (server, acc.lock().unwrap_or_else(PoisonError::into_inner)))
            .collect();

        let mut targets = WeightTable::new();
        for (server, acc) in guards.iter_mut() {
            targets.insert((*server).clone(), acc.weight());
            **acc = Accumulator::BASELINE;
        }
        drop(guards);

        debug!("Periodic targets: {}", targets);
        self.chooser.patch_weights(&targets)
    }

    /// Starts the recalculation loop on the current tokio runtime.
    pub fn spawn(self: &Arc<Self>) -> LbResult<RecalculationTask> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            LbError::Configuration("periodic recalculation needs a tokio runtime".to_string())
        })?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let tracker = Arc::clone(self);
        let period = self.window();
        let epsilon = self.chooser.epsilon();

        let task = handle.spawn(async move {
            info!(
                "Starting weight recalculation every {:?}, epsilon {}",
                period, epsilon
            );

            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Weight recalculation shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let started = Instant::now();
                        if let Err(err) = tracker.recalculate() {
                            error!("Weight recalculation failed: {}", err);
                        } else {
                            debug!("Weight recalculation took {:?}", started.elapsed());
                        }
                    }
                }
            }
        });

        Ok(RecalculationTask {
            shutdown: Some(shutdown_tx),
            handle: Some(task),
        })
    }
}

impl WeightProvider for PeriodicTracker {
    fn name(&self) -> &'static str {
        "periodic"
    }

    fn upsert_server(&self, server: &Server) {
        let mut accumulators = self.accumulators.write().unwrap_or_else(PoisonError::into_inner);
        if accumulators.contains_key(server) {
            return;
        }
        accumulators.insert(server.clone(), Arc::new(Mutex::new(Accumulator::BASELINE)));
        self.chooser.add_server(server);
    }

    fn remove_server(&self, server: &Server) {
        let mut accumulators = self.accumulators.write().unwrap_or_else(PoisonError::into_inner);
        accumulators.remove(server);
        if let Err(err) = self.chooser.remove_server(server) {
            debug!("Chooser did not track {}: {}", server, err);
        }
        drop(accumulators);

        let purged = self.timings.purge(server);
        if purged > 0 {
            info!("Dropped {} pending timings of removed server {}", purged, server);
        }
    }

    fn weights(&self) -> WeightTable {
        self.chooser.weights()
    }
}

/// Handle to the background recalculation loop.
///
/// [`stop`](Self::stop) consumes the handle, so the cancellation signal is
/// sent exactly once. A handle dropped without being stopped aborts the task.
pub struct RecalculationTask {
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl RecalculationTask {
    /// Signals the loop to stop and waits for it to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!("Weight recalculation task ended abnormally: {}", err);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for RecalculationTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
