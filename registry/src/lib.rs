// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Registry of hostile IPs collected during one ingest cycle.
//!
//! Entries are keyed by IPv4 address and carry four attribute sets: the ASNs
//! the address was reported under, country codes, the source blocklists that
//! listed it and free-form descriptions. Re-inserting an address unions the
//! provided attributes into the existing sets; nothing is ever replaced.
//! Keeping every blocklist hit (not just those in monitored ASNs) is what
//! allows arbitrary single-address queries between cycles.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::btree_map;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("new entry for {0} carries no source blocklist tag")]
    MissingOrg(Ipv4Addr),

    #[error("not an IPv4 address: '{0}'")]
    NotIpv4(String),

    #[error("whois line does not split into asn | ip | cc | desc: '{0}'")]
    BadWhoisLine(String),

    #[error("whois data for unlisted ip {0} discarded")]
    NotListed(Ipv4Addr),
}

/// Attributes accompanying one insertion. Every field is optional; blank or
/// whitespace-only values count as absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct Attrs<'a> {
    pub desc: Option<&'a str>,
    pub asn: Option<&'a str>,
    pub cc: Option<&'a str>,
    pub org: Option<&'a str>,
}

impl<'a> Attrs<'a> {
    fn trimmed(field: Option<&'a str>) -> Option<&'a str> {
        field.map(str::trim).filter(|s| !s.is_empty())
    }

    fn normalize(self) -> Self {
        Self {
            desc: Self::trimmed(self.desc),
            asn: Self::trimmed(self.asn),
            cc: Self::trimmed(self.cc),
            org: Self::trimmed(self.org),
        }
    }
}

/// Everything known about one hostile address. A single IP can legitimately
/// show up under more than one ASN in whois data, hence a set even there.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostileIp {
    pub asns: BTreeSet<String>,
    pub ccs: BTreeSet<String>,
    pub orgs: BTreeSet<String>,
    pub descs: BTreeSet<String>,
}

impl HostileIp {
    fn merge(&mut self, attrs: Attrs<'_>) {
        if let Some(asn) = attrs.asn {
            self.asns.insert(asn.to_string());
        }
        if let Some(cc) = attrs.cc {
            self.ccs.insert(cc.to_string());
        }
        if let Some(org) = attrs.org {
            self.orgs.insert(org.to_string());
        }
        if let Some(desc) = attrs.desc {
            self.descs.insert(desc.to_string());
        }
    }
}

/// The hostile-IP registry for the current ingest cycle. The orchestrator
/// replaces the whole registry at the start of every cycle.
#[derive(Debug, Default)]
pub struct Registry(BTreeMap<Ipv4Addr, HostileIp>);

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert or update the entry for `ip`, unioning the provided attributes
    /// into the existing sets. A new entry is only accepted when it names its
    /// source blocklist: whois and DNS data are enrichment and may not create
    /// entries on their own.
    ///
    /// # Errors
    /// Returns [`RegistryError::MissingOrg`] when `ip` is unknown and `attrs`
    /// has no org tag.
    pub fn insert(&mut self, ip: Ipv4Addr, attrs: Attrs<'_>) -> Result<(), RegistryError> {
        let attrs = attrs.normalize();
        match self.0.entry(ip) {
            btree_map::Entry::Occupied(mut entry) => {
                entry.get_mut().merge(attrs);
            }
            btree_map::Entry::Vacant(entry) => {
                if attrs.org.is_none() {
                    return Err(RegistryError::MissingOrg(ip));
                }
                let mut record = HostileIp::default();
                record.merge(attrs);
                entry.insert(record);
            }
        }
        Ok(())
    }

    /// Union the fields of a bulk-whois response line (`asn | ip | cc |
    /// desc`, arbitrary whitespace) into the entry for its IP.
    ///
    /// # Errors
    /// Returns [`RegistryError::BadWhoisLine`] or [`RegistryError::NotIpv4`]
    /// for malformed lines and [`RegistryError::NotListed`] when the IP was
    /// never reported by a blocklist; callers log and drop.
    pub fn merge_whois_line(&mut self, line: &str) -> Result<(), RegistryError> {
        let mut fields = line.splitn(4, '|');
        let (Some(asn), Some(ip), Some(cc), Some(desc)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(RegistryError::BadWhoisLine(line.to_string()));
        };
        let ip: Ipv4Addr = ip
            .trim()
            .parse()
            .map_err(|_| RegistryError::NotIpv4(ip.trim().to_string()))?;
        if !self.0.contains_key(&ip) {
            return Err(RegistryError::NotListed(ip));
        }
        debug!("whois update for {ip}: as {}", asn.trim());
        self.insert(
            ip,
            Attrs {
                desc: Some(desc),
                asn: Some(asn),
                cc: Some(cc),
                org: None,
            },
        )
    }

    #[must_use]
    pub fn get(&self, ip: &Ipv4Addr) -> Option<&HostileIp> {
        self.0.get(ip)
    }

    /// All entries, in ascending address order; keeps downstream report
    /// output deterministic for a fixed registry.
    pub fn iter(&self) -> impl Iterator<Item = (&Ipv4Addr, &HostileIp)> {
        self.0.iter()
    }

    /// Entries whose attribute sets contain every filter value provided.
    pub fn iter_filtered<'a>(
        &'a self,
        asn: Option<&'a str>,
        org: Option<&'a str>,
        cc: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a Ipv4Addr, &'a HostileIp)> + 'a {
        self.0.iter().filter(move |(_, record)| {
            asn.is_none_or(|asn| record.asns.contains(asn))
                && org.is_none_or(|org| record.orgs.contains(org))
                && cc.is_none_or(|cc| record.ccs.contains(cc))
        })
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const IP: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 9);

    fn seeded() -> Registry {
        let mut registry = Registry::new();
        registry
            .insert(
                IP,
                Attrs {
                    desc: Some("ssh scans"),
                    org: Some("dshield"),
                    ..Attrs::default()
                },
            )
            .expect("seed insert");
        registry
    }

    #[test]
    fn new_entry_requires_org() {
        let mut registry = Registry::new();
        let result = registry.insert(
            IP,
            Attrs {
                desc: Some("orphan"),
                ..Attrs::default()
            },
        );
        assert_eq!(result, Err(RegistryError::MissingOrg(IP)));
        assert!(registry.is_empty());
    }

    #[test]
    fn merge_is_idempotent() {
        let mut registry = seeded();
        let once = registry.get(&IP).expect("present").clone();
        registry
            .insert(
                IP,
                Attrs {
                    desc: Some("ssh scans"),
                    org: Some("dshield"),
                    ..Attrs::default()
                },
            )
            .expect("re-insert");
        assert_eq!(registry.get(&IP), Some(&once));
    }

    #[test]
    fn merge_is_commutative() {
        let inserts: [Attrs<'_>; 3] = [
            Attrs {
                desc: Some("ssh scans"),
                org: Some("dshield"),
                ..Attrs::default()
            },
            Attrs {
                desc: Some("botnet-cc"),
                org: Some("abuse-ch"),
                cc: Some("US"),
                ..Attrs::default()
            },
            Attrs {
                asn: Some("64500"),
                org: Some("dshield"),
                ..Attrs::default()
            },
        ];
        let permutations: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let mut outcomes = Vec::new();
        for order in permutations {
            let mut registry = Registry::new();
            for i in order {
                registry.insert(IP, inserts[i]).expect("insert");
            }
            outcomes.push(registry.get(&IP).expect("present").clone());
        }
        for outcome in &outcomes[1..] {
            assert_eq!(outcome, &outcomes[0]);
        }
    }

    #[test]
    fn fields_are_trimmed_and_unioned() {
        let mut registry = seeded();
        registry
            .insert(
                IP,
                Attrs {
                    asn: Some("  64500 "),
                    cc: Some(" CA"),
                    org: Some("dshield"),
                    desc: Some("   "),
                },
            )
            .expect("update");
        let record = registry.get(&IP).expect("present");
        assert_eq!(record.asns.iter().collect::<Vec<_>>(), ["64500"]);
        assert_eq!(record.ccs.iter().collect::<Vec<_>>(), ["CA"]);
        // blank desc was dropped, original one kept
        assert_eq!(record.descs.iter().collect::<Vec<_>>(), ["ssh scans"]);
    }

    #[test]
    fn whois_line_enriches_listed_ip() {
        let mut registry = seeded();
        registry
            .merge_whois_line("64500   | 198.51.100.9 | US | ExampleNet")
            .expect("listed ip");
        let record = registry.get(&IP).expect("present");
        assert!(record.asns.contains("64500"));
        assert!(record.ccs.contains("US"));
        assert!(record.descs.contains("ExampleNet"));
        assert!(record.descs.contains("ssh scans"));
        assert!(record.orgs.contains("dshield"));
    }

    #[test]
    fn whois_unknown_ip_dropped() {
        let mut registry = seeded();
        let result = registry.merge_whois_line("64500 | 203.0.113.7 | US | ExampleNet");
        assert_eq!(
            result,
            Err(RegistryError::NotListed(Ipv4Addr::new(203, 0, 113, 7)))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn whois_malformed_lines_rejected() {
        let mut registry = seeded();
        assert_eq!(
            registry.merge_whois_line("no pipes here"),
            Err(RegistryError::BadWhoisLine("no pipes here".to_string()))
        );
        assert_eq!(
            registry.merge_whois_line("64500 | not-an-ip | US | x"),
            Err(RegistryError::NotIpv4("not-an-ip".to_string()))
        );
    }

    #[test]
    fn filtered_enumeration() {
        let mut registry = seeded();
        registry
            .insert(
                Ipv4Addr::new(203, 0, 113, 7),
                Attrs {
                    org: Some("abuse-ch"),
                    ..Attrs::default()
                },
            )
            .expect("insert");
        registry
            .merge_whois_line("64500 | 198.51.100.9 | US | ExampleNet")
            .expect("merge");

        assert_eq!(registry.iter().count(), 2);
        assert_eq!(registry.iter_filtered(Some("64500"), None, None).count(), 1);
        assert_eq!(registry.iter_filtered(None, Some("abuse-ch"), None).count(), 1);
        assert_eq!(registry.iter_filtered(None, None, Some("US")).count(), 1);
        assert_eq!(
            registry
                .iter_filtered(Some("64500"), Some("dshield"), Some("US"))
                .count(),
            1
        );
        assert_eq!(registry.iter_filtered(Some("65000"), None, None).count(), 0);
    }

    #[test]
    fn clear_empties_the_registry() {
        let mut registry = seeded();
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.get(&IP), None);
    }
}
