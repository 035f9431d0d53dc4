// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Concurrent download of the configured blocklists.

use crate::parser::process_line;
use config::Blocklist;
use futures::future::join_all;
use registry::Registry;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Download every configured blocklist concurrently and feed each body,
/// line by line in source order, through the line parser. One failing list
/// is logged and skipped; the function returns only once every download has
/// settled. Returns the number of lists that were ingested.
pub async fn fetch_all<F>(
    client: &reqwest::Client,
    blocklists: &[Blocklist],
    registry: &Arc<Mutex<Registry>>,
    schedule_dns: F,
) -> usize
where
    F: Fn(&str, &str, &str),
{
    let fetches = blocklists
        .iter()
        .map(|list| fetch_one(client, list, registry, &schedule_dns));
    let results = join_all(fetches).await;
    let fetched = results.into_iter().filter(|ok| *ok).count();
    info!("ingested {fetched}/{} blocklists", blocklists.len());
    fetched
}

async fn fetch_one<F>(
    client: &reqwest::Client,
    list: &Blocklist,
    registry: &Arc<Mutex<Registry>>,
    schedule_dns: &F,
) -> bool
where
    F: Fn(&str, &str, &str),
{
    debug!("downloading blocklist {} from {}", list.org, list.url);
    let response = match client.get(&list.url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("blocklist {}: download failed: {e}", list.org);
            return false;
        }
    };
    if !response.status().is_success() {
        warn!(
            "blocklist {}: server answered {}",
            list.org,
            response.status()
        );
        return false;
    }
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!("blocklist {}: reading body failed: {e}", list.org);
            return false;
        }
    };
    let Ok(mut registry) = registry.lock() else {
        warn!("blocklist {}: registry lock poisoned, skipping", list.org);
        return false;
    };
    for line in body.lines() {
        process_line(line, &list.org, &mut registry, |host, desc| {
            schedule_dns(host, desc, &list.org);
        });
    }
    true
}
