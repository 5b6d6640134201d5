//! The facade the proxy talks to.
//!
//! A [`Dispatcher`] owns the registry, the active selector and the metrics
//! strategy chosen in the configuration. For every request it picks a server,
//! runs the pre hooks, forwards the rewritten request, runs the post hooks and
//! refreshes weights when they are due.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use http::{Request, Response};
use log::{debug, info, warn};
use thiserror::Error;

use sway_config::config::{Balancer, Config, Metrics};

use crate::error::{LbError, LbResult};
use crate::hooks::{Hook, HookList, HookRegistrar, RequestId};
use crate::metrics::{EwmaTracker, PeriodicTracker, RecalculationTask, WeightProvider};
use crate::registry::ServerRegistry;
use crate::selector::Selector;
use crate::server::Server;
use crate::weights::WeightTable;
use crate::wrr::WeightedRoundRobin;

/// The transport that actually sends a request to a backend.
///
/// The request URI already points at the chosen server. No timeout is applied
/// around this call; that is the transport's job.
pub trait Forward: Send + Sync {
    type Body: Send;
    type ResponseBody;
    type Error: std::error::Error + Send + Sync + 'static;

    fn forward(
        &self,
        request: Request<Self::Body>,
    ) -> impl Future<Output = Result<Response<Self::ResponseBody>, Self::Error>> + Send;
}

#[derive(Debug, Error)]
pub enum DispatchError<E: std::error::Error + 'static> {
    /// No server could serve the request; answer with 503.
    #[error("selection failed: {0}")]
    Selection(#[from] LbError),

    /// The chosen server cannot address the request; answer with 502.
    #[error("cannot rewrite request for server: {0}")]
    Rewrite(#[source] LbError),

    #[error("forward failed: {0}")]
    Forward(#[source] E),
}

enum Refresh {
    // weights never change
    Never,
    // recompute on the request path once `interval` has passed
    Pull {
        interval: Duration,
        last: Mutex<Instant>,
    },
    // a background task pushes weights
    Push,
}

// Runs the post hooks when the request finishes, errors or is cancelled, so
// no timing record outlives its request.
struct InFlight<'a> {
    hooks: &'a HookList,
    server: Server,
    id: RequestId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.hooks.invoke(&self.server, self.id);
    }
}

pub struct Dispatcher<F> {
    registry: ServerRegistry,
    selector: Arc<Selector>,
    pre_hooks: HookList,
    post_hooks: HookList,
    forward: F,
    next_request: AtomicU64,
    refresh: Refresh,
    strategy: &'static str,
    periodic: Option<Arc<PeriodicTracker>>,
    recalculation: Mutex<Option<RecalculationTask>>,
}

impl<F: Forward> Dispatcher<F> {
    /// Builds a dispatcher for `servers` using the strategy in `balancer`.
    ///
    /// The periodic strategy starts its task on the current tokio runtime.
    pub fn new(forward: F, servers: Vec<Server>, balancer: &Balancer) -> LbResult<Self> {
        if servers.is_empty() {
            return Err(LbError::Configuration(
                "initial server set is empty".to_string(),
            ));
        }

        let round_robin = || Arc::new(Selector::RoundRobin(WeightedRoundRobin::default()));

        let (mut dispatcher, periodic) = match &balancer.metrics {
            Metrics::None => (
                Self::assemble(forward, round_robin(), None, Refresh::Never, "none"),
                None,
            ),
            Metrics::Ewma { window_ms, scaling } => {
                let tracker = Arc::new(EwmaTracker::new(
                    Duration::from_millis(*window_ms),
                    *scaling,
                )?);
                let refresh = Refresh::Pull {
                    interval: Duration::from_millis(balancer.update_interval_ms),
                    last: Mutex::new(Instant::now()),
                };
                let dispatcher = Self::assemble(
                    forward,
                    round_robin(),
                    Some(tracker.clone()),
                    refresh,
                    tracker.name(),
                );
                tracker.attach(&dispatcher);
                (dispatcher, None)
            }
            Metrics::Periodic { window_ms, epsilon } => {
                let tracker = Arc::new(PeriodicTracker::new(
                    Duration::from_millis(*window_ms),
                    *epsilon,
                )?);
                let selector = Arc::new(Selector::Random(tracker.chooser()));
                let dispatcher = Self::assemble(
                    forward,
                    selector,
                    Some(tracker.clone()),
                    Refresh::Push,
                    tracker.name(),
                );
                tracker.attach(&dispatcher);
                (dispatcher, Some(tracker))
            }
        };

        for server in servers {
            dispatcher.registry.upsert(server);
        }

        if let Some(tracker) = periodic {
            let task = tracker.spawn()?;
            dispatcher.periodic = Some(tracker);
            *dispatcher
                .recalculation
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(task);
        }

        info!(
            "Dispatcher ready with {} servers, strategy {}, selector {}",
            dispatcher.registry.len(),
            dispatcher.strategy,
            dispatcher.selector.name()
        );
        Ok(dispatcher)
    }

    /// Builds a dispatcher from the `servers` and `balancer` sections.
    pub fn from_config(forward: F, config: &Config) -> LbResult<Self> {
        let servers = config
            .servers
            .iter()
            .map(|s| Server::parse(s))
            .collect::<LbResult<Vec<_>>>()?;
        Self::new(forward, servers, &config.balancer)
    }

    fn assemble(
        forward: F,
        selector: Arc<Selector>,
        provider: Option<Arc<dyn WeightProvider>>,
        refresh: Refresh,
        strategy: &'static str,
    ) -> Self {
        Self {
            registry: ServerRegistry::new(selector.clone(), provider),
            selector,
            pre_hooks: HookList::new(),
            post_hooks: HookList::new(),
            forward,
            next_request: AtomicU64::new(0),
            refresh,
            strategy,
            periodic: None,
            recalculation: Mutex::new(None),
        }
    }

    /// Sends `request` to the next selected server.
    pub async fn handle(
        &self,
        mut request: Request<F::Body>,
    ) -> Result<Response<F::ResponseBody>, DispatchError<F::Error>> {
        let server = self.selector.next()?;
        let target = server
            .rewrite(request.uri())
            .map_err(DispatchError::<F::Error>::Rewrite)?;
        *request.uri_mut() = target;

        let id = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        debug!(
            "Dispatching request {} to {} via {}",
            id,
            server,
            self.selector.name()
        );

        self.pre_hooks.invoke(&server, id);
        let in_flight = InFlight {
            hooks: &self.post_hooks,
            server,
            id,
        };
        let result = self.forward.forward(request).await;
        drop(in_flight);

        self.refresh_if_due();
        result.map_err(DispatchError::Forward)
    }

    fn refresh_if_due(&self) {
        let Refresh::Pull { interval, last } = &self.refresh else {
            return;
        };

        // another request is already refreshing
        let Ok(mut last) = last.try_lock() else {
            return;
        };
        if last.elapsed() < *interval {
            return;
        }
        *last = Instant::now();
        drop(last);

        debug!("Refreshing weights");
        self.registry.recompute();
    }

    /// Recomputes weights now instead of waiting for the interval or the
    /// next tick.
    pub fn refresh_weights(&self) -> LbResult<()> {
        match &self.periodic {
            Some(tracker) => tracker.recalculate(),
            None => {
                self.registry.recompute();
                Ok(())
            }
        }
    }

    pub fn upsert(&self, server: Server) -> bool {
        self.registry.upsert(server)
    }

    pub fn remove(&self, server: &Server) -> LbResult<()> {
        self.registry.remove(server)
    }

    pub fn list(&self) -> Vec<Server> {
        self.registry.list()
    }

    /// Weights the selector is currently using.
    pub fn weights(&self) -> WeightTable {
        self.selector.weights()
    }

    /// Name of the metrics strategy in use.
    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    pub fn pre_hooks(&self) -> &HookList {
        &self.pre_hooks
    }

    pub fn post_hooks(&self) -> &HookList {
        &self.post_hooks
    }

    /// Stops the background recalculation, if one runs. Only the first call
    /// does anything; it returns whether a task was stopped.
    pub async fn shutdown(&self) -> bool {
        let task = self
            .recalculation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match task {
            Some(task) => {
                if task.is_finished() {
                    warn!("Weight recalculation had already exited before shutdown");
                }
                task.stop().await;
                info!("Dispatcher shut down");
                true
            }
            None => false,
        }
    }
}

impl<F> HookRegistrar for Dispatcher<F> {
    fn register_pre_hook(&self, hook: Hook) {
        self.pre_hooks.register(hook);
    }

    fn register_post_hook(&self, hook: Hook) {
        self.post_hooks.register(hook);
    }
}
