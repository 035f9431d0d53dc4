// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! blockwatch: monitor BGP ASNs for hosts published by blocklists.

#![deny(clippy::all)]

mod args;
mod orchestrator;
mod report;

use crate::args::{CmdArgs, Parser};
use crate::orchestrator::Orchestrator;
use crate::report::LogSink;
use config::BlockwatchConfig;
use resolver::SystemResolver;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = CmdArgs::parse();
    init_logging(args.log_filter());
    info!("Starting blockwatch...");

    let cfg = match BlockwatchConfig::from_yaml_file(args.config_path()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            panic!("Configuration error. Aborting...");
        }
    };
    info!(
        "monitoring {} ASNs against {} blocklists",
        cfg.monitored_asns.len(),
        cfg.blocklists.len()
    );

    let dns = match SystemResolver::from_system_conf() {
        Ok(resolver) => resolver,
        Err(e) => {
            error!("Failed to initialize the system resolver: {e}");
            panic!("Resolver error. Aborting...");
        }
    };

    let mut orchestrator = Orchestrator::new(cfg, Box::new(dns), Box::new(LogSink));
    orchestrator.run().await;
}
