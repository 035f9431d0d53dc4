// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Seam towards whatever delivers the status report to subscribers.

use async_trait::async_trait;
use tracing::info;

/// Consumer of the consolidated status report. The production deployment
/// plugs the chat transport in here; the shipped implementation writes the
/// report to the log.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn emit(&self, report: &str);
}

pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    async fn emit(&self, report: &str) {
        info!("status report:\n{report}");
    }
}
