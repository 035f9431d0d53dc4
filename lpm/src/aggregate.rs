// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Prefix aggregation: collapse a list of IPv4 prefixes into the minimal
//! equivalent set of supernets.

use ipnet::Ipv4Net;

/// Collapse `prefixes` into the smallest set covering exactly the same
/// addresses: contained prefixes are dropped and sibling pairs (adjacent,
/// equal length, aligned on the shorter mask) are merged into their
/// supernet, repeatedly, until stable. The result is sorted by network
/// address; the whole operation is deterministic for a fixed input.
#[must_use]
pub fn aggregate(prefixes: &[Ipv4Net]) -> Vec<Ipv4Net> {
    let mut current: Vec<Ipv4Net> = prefixes.iter().map(Ipv4Net::trunc).collect();
    current.sort_by_key(|p| (p.network(), p.prefix_len()));
    current.dedup();

    loop {
        let mut changed = false;
        let mut merged: Vec<Ipv4Net> = Vec::with_capacity(current.len());
        for prefix in current.drain(..) {
            let Some(last) = merged.last().copied() else {
                merged.push(prefix);
                continue;
            };
            if last.contains(&prefix) {
                changed = true;
                continue;
            }
            if last.prefix_len() == prefix.prefix_len() {
                if let Some(supernet) = last.supernet() {
                    let supernet = supernet.trunc();
                    // `last` must be the low sibling for the merge to be exact
                    if supernet.network() == last.network() && supernet.contains(&prefix) {
                        merged.pop();
                        merged.push(supernet);
                        changed = true;
                        continue;
                    }
                }
            }
            merged.push(prefix);
        }
        current = merged;
        if !changed {
            return current;
        }
    }
}
