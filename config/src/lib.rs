// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration model for the blockwatch daemon: which blocklists to
//! ingest, which ASNs to monitor, where the route servers and the bulk-whois
//! service live, and the timers and throttles governing a cycle. Loaded from
//! a YAML file; every knob that has a sane default carries one, so a minimal
//! config only names the lists, the servers and the sanity pair.

#![deny(clippy::all)]

pub mod errors;

pub use errors::ConfigError;

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// One blocklist source: a short tag naming the publishing organization and
/// the URL the list is fetched from. The tag ends up in the `orgs` set of
/// every address the list contributes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Blocklist {
    pub org: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockwatchConfig {
    /// Blocklists ingested each cycle.
    pub blocklists: Vec<Blocklist>,

    /// ASNs whose address space is audited, in report order.
    pub monitored_asns: Vec<String>,

    /// Public route servers, used round-robin across rebuilds.
    pub route_servers: Vec<String>,

    #[serde(default = "default_route_server_port")]
    pub route_server_port: u16,

    /// Command template for listing one ASN's announcements; `{asn}` is
    /// substituted per ASN.
    #[serde(default = "default_list_command")]
    pub list_command: String,

    /// A stable, well-known address inside one of the monitored ASNs,
    /// used to verify each freshly built prefix index.
    pub sanity_ip: Ipv4Addr,

    /// The ASN `sanity_ip` must resolve to.
    pub sanity_asn: String,

    /// Blocklist ingest period.
    #[serde(default = "default_ingest_interval_secs")]
    pub ingest_interval_secs: u64,

    /// Prefix-index rebuild period.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Wait between sanity-check retries.
    #[serde(default = "default_sanity_retry_secs")]
    pub sanity_retry_secs: u64,

    /// Consecutive sanity failures tolerated before forcing a rebuild
    /// against the next route server.
    #[serde(default = "default_sanity_failure_max")]
    pub sanity_failure_max: u32,

    /// Cap on concurrently outstanding DNS resolutions.
    #[serde(default = "default_dns_max_in_flight")]
    pub dns_max_in_flight: usize,

    /// How often to re-check DNS quiescence before the whois phase.
    #[serde(default = "default_dns_poll_secs")]
    pub dns_poll_secs: u64,

    /// Blank-line nudge period on the route-server session.
    #[serde(default = "default_enter_throttle_secs")]
    pub enter_throttle_secs: u64,

    /// Command prompts to sight before advancing to the next ASN.
    #[serde(default = "default_prompt_countdown")]
    pub prompt_countdown: u32,

    #[serde(default = "default_whois_host")]
    pub whois_host: String,

    #[serde(default = "default_whois_port")]
    pub whois_port: u16,

    /// Cap on addresses submitted to bulk whois per cycle.
    #[serde(default = "default_whois_batch_max")]
    pub whois_batch_max: usize,

    /// Minimum spacing between consecutive outbound status messages; the
    /// messaging collaborator enforces it when a report spans several
    /// messages.
    #[serde(default = "default_message_throttle_secs")]
    pub message_throttle_secs: u64,

    /// Joins multiple values of one field when a record is rendered.
    #[serde(default = "default_field_sep")]
    pub field_sep: String,

    /// Separates records in the outbound report.
    #[serde(default = "default_record_delim")]
    pub record_delim: String,
}

fn default_route_server_port() -> u16 {
    23
}
fn default_list_command() -> String {
    "show ip bgp regexp _{asn}$".to_string()
}
fn default_ingest_interval_secs() -> u64 {
    60 * 60 * 24
}
fn default_refresh_interval_secs() -> u64 {
    60 * 60 * 24 * 7
}
fn default_sanity_retry_secs() -> u64 {
    60 * 4
}
fn default_sanity_failure_max() -> u32 {
    3
}
fn default_dns_max_in_flight() -> usize {
    30
}
fn default_dns_poll_secs() -> u64 {
    60 * 5
}
fn default_enter_throttle_secs() -> u64 {
    2
}
fn default_prompt_countdown() -> u32 {
    2
}
fn default_whois_host() -> String {
    "whois.cymru.com".to_string()
}
fn default_whois_port() -> u16 {
    43
}
fn default_whois_batch_max() -> usize {
    20
}
fn default_message_throttle_secs() -> u64 {
    3
}
fn default_field_sep() -> String {
    " | ".to_string()
}
fn default_record_delim() -> String {
    "\r\n".to_string()
}

impl BlockwatchConfig {
    /// Load and validate a config file.
    ///
    /// # Errors
    /// Fails if the file cannot be read or parsed, or if a mandatory list is
    /// empty.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// # Errors
    /// Same conditions as [`BlockwatchConfig::from_yaml_file`], minus I/O.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.monitored_asns.is_empty() {
            return Err(ConfigError::Invalid("no ASNs to monitor"));
        }
        if self.route_servers.is_empty() {
            return Err(ConfigError::Invalid("no route servers configured"));
        }
        if !self.list_command.contains("{asn}") {
            return Err(ConfigError::Invalid(
                "list command template has no {asn} placeholder",
            ));
        }
        if self.dns_max_in_flight == 0 {
            return Err(ConfigError::Invalid("dns_max_in_flight must be non-zero"));
        }
        Ok(())
    }

    #[must_use]
    pub fn ingest_interval(&self) -> Duration {
        Duration::from_secs(self.ingest_interval_secs)
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    #[must_use]
    pub fn sanity_retry(&self) -> Duration {
        Duration::from_secs(self.sanity_retry_secs)
    }

    #[must_use]
    pub fn dns_poll(&self) -> Duration {
        Duration::from_secs(self.dns_poll_secs)
    }

    #[must_use]
    pub fn enter_throttle(&self) -> Duration {
        Duration::from_secs(self.enter_throttle_secs)
    }
}
