// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Blocklist ingestion: download the configured lists and turn their lines
//! into hostile-IP registry entries or scheduled DNS resolutions.

pub mod fetch;
pub mod parser;

pub use fetch::fetch_all;
pub use parser::{LineEntry, classify, process_line};
