mod collectors;
mod config;
mod error;
mod exporters;
mod logging;

use crate::config::{Config, Exporter};
use collectors::kernel::KernelCollector;
use collectors::login::LoginCollector;
use collectors::network::NetworkCollector;
use collectors::process::ProcessCollector;
use collectors::{Collector, Metric};
use reqwest::Client;
use std::env;
use std::path::Path;
use sysinfo::System;
use tokio::time::{self, Duration};
use tracing::{debug, error, info};

const CONFIG_PATH: &str = "hostprobe.toml";

async fn collect_all(collectors: &mut [Box<dyn Collector>]) -> Vec<Metric> {
    let mut metrics = Vec::new();
    for collector in collectors.iter_mut() {
        let collected = collector.collect().await;
        debug!(collector = collector.name(), count = collected.len(), "collected");
        metrics.extend(collected);
    }
    metrics
}

#[tokio::main]
async fn main() {
    logging::init_logging();

    // Check for --oneshot argument
    let oneshot = env::args().any(|arg| arg == "--oneshot");

    let config = match Config::load(Path::new(CONFIG_PATH)) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    debug!(?config, "loaded config");

    let Some(hostname) = System::host_name() else {
        error!("could not determine hostname");
        std::process::exit(1);
    };

    let mut collectors: Vec<Box<dyn Collector>> = Vec::new();
    if config.collectors.kernel {
        collectors.push(Box::new(KernelCollector::new()));
    }
    if config.collectors.processes {
        collectors.push(Box::new(ProcessCollector::new()));
    }
    if config.collectors.logins.enabled {
        collectors.push(Box::new(LoginCollector::new(config.collectors.logins.clone())));
    }
    if config.collectors.network.enabled {
        collectors.push(Box::new(NetworkCollector::new(
            config.collectors.network.interface_prefixes.clone(),
        )));
    }

    let names: Vec<&str> = collectors.iter().map(|c| c.name()).collect();
    info!(collectors = ?names, interval = config.collect_interval, "starting metrics collection");

    if oneshot {
        let metrics = collect_all(&mut collectors).await;
        println!("Collected metrics: {:#?}", metrics);
        return;
    }

    let client = Client::new();
    let mut interval = time::interval(Duration::from_secs(config.collect_interval));

    loop {
        interval.tick().await;
        let metrics = collect_all(&mut collectors).await;

        match &config.exporter {
            Exporter::InfluxDB(influx_config) => {
                let lines = exporters::influxdb::format_metrics(&metrics, &hostname);
                if let Err(e) = exporters::influxdb::export_metrics(&client, influx_config, &lines).await {
                    error!("failed to export metrics: {e}");
                }
            }
        }
    }
}
