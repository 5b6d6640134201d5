//! Adaptive load balancing core: server registry, smooth weighted round
//! robin, weighted random choice and the response-time strategies that keep
//! their weights current.

pub mod chooser;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod registry;
pub mod selector;
pub mod server;
pub mod timing;
pub mod weights;
pub mod wrr;

pub use chooser::WeightedRandomChooser;
pub use dispatch::{DispatchError, Dispatcher, Forward};
pub use error::{LbError, LbResult};
pub use hooks::{Hook, HookList, HookRegistrar, RequestId};
pub use metrics::{EwmaTracker, PeriodicTracker, RecalculationTask, WeightProvider};
pub use registry::ServerRegistry;
pub use selector::Selector;
pub use server::Server;
pub use weights::{MIN_WEIGHT, WeightTable};
pub use wrr::{WeightedRoundRobin, gcd};
