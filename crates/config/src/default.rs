use crate::config::{Balancer, Log, Metrics};

// default values
pub fn get_default_port() -> u32 {
    8080
}

pub fn get_default_address() -> String {
    String::from("0.0.0.0")
}

pub fn get_default_update_interval() -> u64 {
    1000
}

pub fn get_default_window_ms() -> u64 {
    10_000
}

pub fn get_default_scaling() -> f64 {
    1.0
}

pub fn get_default_epsilon() -> f64 {
    0.5
}

pub fn get_default_metrics() -> Metrics {
    Metrics::None
}

pub fn get_default_max_inflight() -> usize {
    0
}

pub fn get_default_timeout_ms() -> u64 {
    30_000
}

pub fn get_default_log_level() -> String {
    String::from("info")
}

pub fn get_default_balancer() -> Balancer {
    Balancer {
        update_interval_ms: get_default_update_interval(),
        metrics: get_default_metrics(),
    }
}

pub fn get_default_log() -> Log {
    Log { level: get_default_log_level() }
}
