use crate::config::{Config, Metrics};
use log::{error, info, warn};

pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

pub fn validate(config: &Config) -> bool {
    info!("Starting configuration validation...");

    // --- Validate Log level ---
    if !VALID_LOG_LEVELS
        .iter()
        .any(|lvl| lvl.eq_ignore_ascii_case(&config.log.level))
    {
        error!("Invalid Log Level: {}", config.log.level);
        return false;
    }

    // --- Validate listen address ---
    if config.listen.address.is_empty() {
        error!("Listen address is empty");
        return false;
    }

    // --- Validate listen port ---
    if config.listen.port == 0 || config.listen.port > 65535 {
        error!(
            "Invalid listen port: {} (must be between 1 and 65535)",
            config.listen.port
        );
        return false;
    }

    // --- Validate servers ---
    if config.servers.is_empty() {
        error!("No servers configured");
        return false;
    }

    for (idx, server) in config.servers.iter().enumerate() {
        if server.trim().is_empty() {
            error!("Server address is missing at position {}", idx);
            return false;
        }

        if server.chars().any(char::is_whitespace) {
            error!("Server address '{}' contains whitespace", server);
            return false;
        }

        if config.servers[..idx].contains(server) {
            warn!("Server '{}' is listed more than once, ignoring duplicate", server);
        }
    }

    // --- Validate balancer ---
    if !validate_metrics(&config.balancer.metrics) {
        return false;
    }

    if matches!(config.balancer.metrics, Metrics::Ewma { .. })
        && config.balancer.update_interval_ms == 0
    {
        warn!("Update interval is 0, weights will be recomputed after every request");
    }

    info!("Configuration validation passed successfully");

    true
}

pub fn validate_metrics(metrics: &Metrics) -> bool {
    match metrics {
        Metrics::None => true,
        Metrics::Ewma { window_ms, scaling } => {
            if *window_ms == 0 {
                error!("EWMA window is invalid (0)");
                return false;
            }
            if !scaling.is_finite() || *scaling <= 0.0 {
                error!("EWMA scaling must be a positive number, found {}", scaling);
                return false;
            }
            true
        }
        Metrics::Periodic { window_ms, epsilon } => {
            if *window_ms == 0 {
                error!("Periodic window is invalid (0)");
                return false;
            }
            if !(*epsilon > 0.0 && *epsilon <= 1.0) {
                error!("Epsilon must be in (0, 1], found {}", epsilon);
                return false;
            }
            true
        }
    }
}
