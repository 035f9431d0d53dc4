// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

pub use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "blockwatch")]
#[command(version)]
#[command(about = "Monitor BGP ASNs for hosts published by blocklists", long_about = None)]
pub struct CmdArgs {
    /// Path to the YAML configuration file
    #[arg(long, value_name = "path", default_value = "blockwatch.yaml")]
    config: PathBuf,

    /// Tracing filter, e.g. "debug" or "blockwatch=debug,hyper=off"
    #[arg(long, value_name = "filter", default_value = "info")]
    log_filter: String,
}

impl CmdArgs {
    pub fn config_path(&self) -> &Path {
        &self.config
    }
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }
}
