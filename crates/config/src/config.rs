use serde::{Deserialize, Serialize};

use crate::default::{
    get_default_address, get_default_balancer, get_default_epsilon, get_default_log,
    get_default_log_level, get_default_max_inflight, get_default_metrics, get_default_port,
    get_default_scaling, get_default_timeout_ms, get_default_update_interval,
    get_default_window_ms,
};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub listen: Listen,

    // normalized later by the balancer: scheme://host[:port][/path]
    pub servers: Vec<String>,

    #[serde(default = "get_default_balancer")]
    pub balancer: Balancer,

    #[serde(default)]
    pub transport: Transport,

    #[serde(default = "get_default_log")]
    pub log: Log,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Listen {
    #[serde(default = "get_default_port")]
    pub port: u32, // 8080

    #[serde(default = "get_default_address")]
    pub address: String, // "0.0.0.0"
}

impl Default for Listen {
    fn default() -> Self {
        Self {
            port: get_default_port(),
            address: get_default_address(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Balancer {
    // minimum time between two pull-based weight refreshes
    #[serde(default = "get_default_update_interval")]
    pub update_interval_ms: u64,

    #[serde(default = "get_default_metrics")]
    pub metrics: Metrics,
}

impl Default for Balancer {
    fn default() -> Self {
        get_default_balancer()
    }
}

/// Which response-time strategy feeds the balancer. Exactly one is active.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Metrics {
    /// Every server gets the same weight.
    None,

    /// Time-decayed moving average of response times, pulled on request.
    Ewma {
        #[serde(default = "get_default_window_ms")]
        window_ms: u64,

        #[serde(default = "get_default_scaling")]
        scaling: f64,
    },

    /// Sum/count averaging pushed by a background task every `window_ms`.
    Periodic {
        #[serde(default = "get_default_window_ms")]
        window_ms: u64,

        #[serde(default = "get_default_epsilon")]
        epsilon: f64,
    },
}

impl Metrics {
    pub fn name(&self) -> &'static str {
        match self {
            Metrics::None => "none",
            Metrics::Ewma { .. } => "ewma",
            Metrics::Periodic { .. } => "periodic",
        }
    }
}

/// Upstream client settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Transport {
    #[serde(default)]
    pub http2_only: bool,

    // 0 disables the limit
    #[serde(default = "get_default_max_inflight")]
    pub max_inflight: usize,

    // 0 disables the timeout
    #[serde(default = "get_default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            http2_only: false,
            max_inflight: get_default_max_inflight(),
            timeout_ms: get_default_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Log {
    #[serde(default = "get_default_log_level")]
    pub level: String, // "trace, debug, info, warn, error, off"
}

impl Default for Log {
    fn default() -> Self {
        get_default_log()
    }
}
