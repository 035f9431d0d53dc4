// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Classification of single blocklist lines.
//!
//! Published blocklists disagree wildly on format: bare addresses, addresses
//! with trailing commentary, full URLs, hostnames, even copy-pasted Cisco
//! access-list entries. Each line is classified into one shape and either
//! yields an address, a hostname needing resolution, or a logged drop;
//! nothing a list publishes may take the ingest down.

use registry::{Attrs, Registry};
use std::net::Ipv4Addr;
use tracing::{debug, warn};
use url::Url;

/// What a single blocklist line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEntry {
    /// Blank line or `#`/`!` comment.
    Ignored,
    /// A literal IPv4 address, with whatever description the line carried.
    Ip { ip: Ipv4Addr, desc: String },
    /// A hostname that has to go through DNS before it can be recorded.
    Host { name: String, desc: String },
    /// None of the recognized shapes.
    Unknown,
}

/// Classify one raw blocklist line.
#[must_use]
pub fn classify(line: &str) -> LineEntry {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
        return LineEntry::Ignored;
    }
    if line.starts_with("http") || line.starts_with("ftp") {
        return classify_url(line);
    }
    if line.starts_with("deny ") {
        return classify_ace(line);
    }
    // freeform: "<addr-or-hostname> [<description>]"
    let (addr, desc) = match line.split_once(char::is_whitespace) {
        Some((addr, desc)) => (addr, desc.trim()),
        None => (line, ""),
    };
    match addr.parse::<Ipv4Addr>() {
        Ok(ip) => LineEntry::Ip {
            ip,
            desc: desc.to_string(),
        },
        Err(_) => LineEntry::Host {
            name: addr.to_string(),
            desc: desc.to_string(),
        },
    }
}

/// A URL-shaped line: the host component is the entry, the whole URL is kept
/// as the description.
fn classify_url(line: &str) -> LineEntry {
    let Ok(url) = Url::parse(line) else {
        return LineEntry::Unknown;
    };
    if !matches!(url.scheme(), "http" | "https" | "ftp") {
        return LineEntry::Unknown;
    }
    let Some(host) = url.host_str() else {
        return LineEntry::Unknown;
    };
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => LineEntry::Ip {
            ip,
            desc: line.to_string(),
        },
        Err(_) => LineEntry::Host {
            name: host.to_string(),
            desc: line.to_string(),
        },
    }
}

/// A Cisco-style access-list entry: `deny ip host <addr> any log [<desc>]`.
/// The address slot holds an IPv4 literal by construction of the rule.
fn classify_ace(line: &str) -> LineEntry {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 6
        || tokens[0] != "deny"
        || tokens[1] != "ip"
        || tokens[2] != "host"
        || tokens[4] != "any"
        || tokens[5] != "log"
    {
        return LineEntry::Unknown;
    }
    let Ok(ip) = tokens[3].parse::<Ipv4Addr>() else {
        return LineEntry::Unknown;
    };
    LineEntry::Ip {
        ip,
        desc: tokens[6..].join(" "),
    }
}

/// Feed one line from the `org` blocklist into the registry, scheduling a
/// DNS resolution via `schedule_dns(hostname, desc)` when the line names a
/// host instead of an address. Malformed lines become log entries only.
pub fn process_line<F>(line: &str, org: &str, registry: &mut Registry, mut schedule_dns: F)
where
    F: FnMut(&str, &str),
{
    match classify(line) {
        LineEntry::Ignored => {}
        LineEntry::Ip { ip, desc } => {
            if let Err(e) = registry.insert(
                ip,
                Attrs {
                    desc: Some(&desc),
                    org: Some(org),
                    ..Attrs::default()
                },
            ) {
                warn!("blocklist {org}: dropped {ip}: {e}");
            }
        }
        LineEntry::Host { name, desc } => schedule_dns(&name, &desc),
        LineEntry::Unknown => {
            debug!("blocklist {org}: line has unknown format, ignored: '{line}'");
        }
    }
}
