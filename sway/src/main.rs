//! Sway adaptive HTTP load balancer.

use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use sway_config::validator::validate as validate_config;
use sway_lb::Dispatcher;
use sway_transport::HttpForwarder;

mod server;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    // Sets a custom config file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    let config_path = cli
        .config
        .unwrap_or_else(|| "./config/config.yaml".to_string());

    // Read configuration file
    let config_yaml = match sway_config::loader::read_config(&config_path) {
        Ok(cfg) => cfg,
        Err(err_msg) => {
            eprintln!("Error loading config: {}", err_msg);
            std::process::exit(1);
        }
    };

    // Initialize the Logger
    sway_utils::logger::init_logger(&config_yaml.log.level);

    // Validate Configurations
    if !validate_config(&config_yaml) {
        error!("Configuration validation failed. Exiting...");
        std::process::exit(1);
    }

    let forwarder = HttpForwarder::from_config(&config_yaml.transport);
    let dispatcher = match Dispatcher::from_config(forwarder, &config_yaml) {
        Ok(dispatcher) => Arc::new(dispatcher),
        Err(err) => {
            error!("Failed to build the balancer: {}", err);
            std::process::exit(1);
        }
    };

    let addr = format!("{}:{}", config_yaml.listen.address, config_yaml.listen.port);
    info!(
        "Sway is starting with {} servers, metrics {}",
        config_yaml.servers.len(),
        config_yaml.balancer.metrics.name()
    );

    if let Err(err) = server::run(&addr, dispatcher).await {
        error!("Server failed: {}", err);
        std::process::exit(1);
    }

    info!("Sway stopped");
}
