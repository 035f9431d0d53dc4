// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Cycle orchestration.
//!
//! The orchestrator owns the long-lived state (current prefix index, current
//! registry, route-server rotation pointer, sanity failure counter, last
//! status report) and sequences each ingest cycle so that every phase sees
//! coherent inputs: sanity-check the index, replace the registry, fan out
//! the blocklist downloads, wait for the DNS pool to drain, cross-validate
//! the candidates over bulk whois, then compose and emit the report. No
//! error escapes a cycle; a failed phase degrades the report, never the
//! process.

use crate::report::ReportSink;
use config::BlockwatchConfig;
use lpm::PrefixIndex;
use registry::{HostileIp, Registry};
use resolver::{DnsPool, Resolve};
use routeserver::fetch_prefix_index;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Verdict of one sanity probe of the prefix index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SanityOutcome {
    /// The known-stable address mapped to its ASN; the index is usable.
    Proceed,
    /// Mismatch, but below the failure cap: check again after a pause.
    Retry,
    /// Too many consecutive mismatches: rebuild against the next server.
    Rebuild,
}

pub struct Orchestrator {
    cfg: BlockwatchConfig,
    index: Option<PrefixIndex<String>>,
    registry: Arc<Mutex<Registry>>,
    dns: DnsPool,
    http: reqwest::Client,
    /// Next route server to use; advances on every rebuild attempt so a bad
    /// server does not get asked twice in a row.
    rotation: usize,
    sanity_failures: u32,
    status: String,
    sink: Box<dyn ReportSink>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        cfg: BlockwatchConfig,
        dns_resolver: Box<dyn Resolve>,
        sink: Box<dyn ReportSink>,
    ) -> Self {
        let registry = Arc::new(Mutex::new(Registry::new()));
        let dns = DnsPool::new(
            dns_resolver,
            Arc::clone(&registry),
            cfg.dns_max_in_flight,
            &cfg.field_sep,
        );
        Self {
            index: None,
            registry,
            dns,
            http: reqwest::Client::new(),
            rotation: 0,
            sanity_failures: 0,
            status: "No status yet!".to_string(),
            cfg,
            sink,
        }
    }

    /// The most recently published report.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Run forever: an initial index build, then the two periodic drivers.
    pub async fn run(&mut self) {
        self.refresh_index().await;

        let mut ingest = tokio::time::interval(self.cfg.ingest_interval());
        ingest.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh = tokio::time::interval_at(
            tokio::time::Instant::now() + self.cfg.refresh_interval(),
            self.cfg.refresh_interval(),
        );
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ingest.tick() => self.ingest_cycle().await,
                _ = refresh.tick() => self.refresh_index().await,
            }
        }
    }

    fn next_route_server(&mut self) -> String {
        let host = self.cfg.route_servers[self.rotation % self.cfg.route_servers.len()].clone();
        self.rotation = (self.rotation + 1) % self.cfg.route_servers.len();
        host
    }

    /// Rebuild the prefix index from the next route server in the rotation.
    /// On failure the previous index stays installed; the sanity machinery
    /// decides whether it is still usable.
    async fn refresh_index(&mut self) {
        let host = self.next_route_server();
        match fetch_prefix_index(&self.cfg, &host).await {
            Ok(index) => {
                info!(
                    "installed fresh prefix index from {host}: {} prefixes, height {}",
                    index.len(),
                    index.height()
                );
                self.index = Some(index);
            }
            Err(e) => warn!("prefix index rebuild from {host} failed: {e}"),
        }
    }

    /// Probe the index with the configured known-stable address. At startup
    /// this fails until the first successful rebuild.
    fn check_sanity(&mut self) -> SanityOutcome {
        let found = self
            .index
            .as_ref()
            .and_then(|index| index.lookup(self.cfg.sanity_ip))
            .map(|(_, asn)| asn.clone());
        if found.as_deref() == Some(self.cfg.sanity_asn.as_str()) {
            debug!(
                "sanity check ok: {} is in as {}",
                self.cfg.sanity_ip, self.cfg.sanity_asn
            );
            self.sanity_failures = 0;
            return SanityOutcome::Proceed;
        }
        self.sanity_failures += 1;
        warn!(
            "sanity check failed: {} resolved to {found:?}, expected as {} (failure {})",
            self.cfg.sanity_ip, self.cfg.sanity_asn, self.sanity_failures
        );
        if self.sanity_failures >= self.cfg.sanity_failure_max {
            self.sanity_failures = 0;
            SanityOutcome::Rebuild
        } else {
            SanityOutcome::Retry
        }
    }

    /// One full ingest cycle, per the sequence in the module docs.
    async fn ingest_cycle(&mut self) {
        info!("ingest cycle starting");
        loop {
            match self.check_sanity() {
                SanityOutcome::Proceed => break,
                SanityOutcome::Retry => tokio::time::sleep(self.cfg.sanity_retry()).await,
                SanityOutcome::Rebuild => self.refresh_index().await,
            }
        }

        // fresh registry for this cycle
        if let Ok(mut registry) = self.registry.lock() {
            *registry = Registry::new();
        }

        let dns = self.dns.clone();
        blocklist::fetch_all(
            &self.http,
            &self.cfg.blocklists,
            &self.registry,
            |host, desc, org| dns.schedule(host, desc, org),
        )
        .await;

        while self.dns.busy() {
            debug!("dns lookups still in flight, waiting");
            tokio::time::sleep(self.cfg.dns_poll()).await;
        }

        let candidates = self.collect_candidates();
        if candidates.is_empty() {
            info!("no blocklisted addresses inside the monitored ASNs this cycle");
            self.publish("No hostile IPs found in ASNs of interest".to_string())
                .await;
            return;
        }

        let request = whois::build_request(&candidates);
        match whois::bulk_whois(
            &self.cfg.whois_host,
            self.cfg.whois_port,
            &request,
            &self.registry,
        )
        .await
        {
            Ok(merged) => debug!("bulk whois merged {merged} lines"),
            Err(e) => warn!("bulk whois failed, reporting blocklist data only: {e}"),
        }

        let report = self.compose_report();
        if report.is_empty() {
            warn!("cycle produced no report records, keeping the previous status");
            return;
        }
        self.publish(report).await;
    }

    /// Registry entries that the prefix index places inside a monitored ASN,
    /// capped at the whois batch limit.
    fn collect_candidates(&self) -> Vec<Ipv4Addr> {
        let Some(index) = &self.index else {
            return Vec::new();
        };
        let Ok(registry) = self.registry.lock() else {
            return Vec::new();
        };
        let mut hits: Vec<Ipv4Addr> = registry
            .iter()
            .filter(|(ip, _)| index.lookup(**ip).is_some())
            .map(|(ip, _)| *ip)
            .collect();
        if hits.len() > self.cfg.whois_batch_max {
            warn!(
                "whois batch capped at {}: dropping {} candidates this cycle",
                self.cfg.whois_batch_max,
                hits.len() - self.cfg.whois_batch_max
            );
            hits.truncate(self.cfg.whois_batch_max);
        }
        hits
    }

    /// One line per (monitored ASN, registry entry) pair, records separated
    /// by the configured delimiter. Empty when whois confirmed nothing.
    fn compose_report(&self) -> String {
        let Ok(registry) = self.registry.lock() else {
            return String::new();
        };
        let sep = &self.cfg.field_sep;
        let mut records = Vec::new();
        for asn in &self.cfg.monitored_asns {
            for (ip, record) in registry.iter_filtered(Some(asn), None, None) {
                records.push(render_record(*ip, record, sep));
            }
        }
        records.join(&self.cfg.record_delim)
    }

    /// Timestamp the new status, remember it and hand it to the sink.
    async fn publish(&mut self, body: String) {
        let stamp = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
        self.status = format!("{stamp} {body}");
        self.sink.emit(&self.status).await;
    }
}

fn join_set(set: &BTreeSet<String>, sep: &str) -> String {
    set.iter()
        .map(String::as_str)
        .collect::<Vec<&str>>()
        .join(sep)
}

fn render_record(ip: Ipv4Addr, record: &HostileIp, sep: &str) -> String {
    format!(
        "{ip} {} {} {} {}",
        join_set(&record.asns, sep),
        join_set(&record.ccs, sep),
        join_set(&record.orgs, sep),
        join_set(&record.descs, sep),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportSink;
    use async_trait::async_trait;
    use ipnet::Ipv4Net;
    use pretty_assertions::assert_eq;
    use registry::Attrs;

    struct NullResolver;

    #[async_trait]
    impl Resolve for NullResolver {
        async fn resolve_v4(&self, _name: &str) -> Option<Ipv4Addr> {
            None
        }
    }

    #[derive(Clone, Default)]
    struct CaptureSink(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl ReportSink for CaptureSink {
        async fn emit(&self, report: &str) {
            self.0.lock().expect("not poisoned").push(report.to_string());
        }
    }

    fn test_config() -> BlockwatchConfig {
        BlockwatchConfig::from_yaml(
            r#"
blocklists: []
monitored_asns: ["64500", "64501"]
route_servers: [rs-a.example.net, rs-b.example.net, rs-c.example.net]
sanity_ip: 198.51.100.53
sanity_asn: "64500"
whois_batch_max: 2
"#,
        )
        .expect("valid config")
    }

    fn orchestrator_with(sink: CaptureSink) -> Orchestrator {
        Orchestrator::new(test_config(), Box::new(NullResolver), Box::new(sink))
    }

    fn sane_index() -> PrefixIndex<String> {
        let mut index = PrefixIndex::new();
        index.insert(
            "198.51.100.0/24".parse::<Ipv4Net>().expect("bad prefix"),
            "64500".to_string(),
        );
        index
    }

    #[test]
    fn sanity_retries_then_forces_rebuild() {
        let mut orchestrator = orchestrator_with(CaptureSink::default());
        // no index yet: two paced retries, then a rebuild with the counter
        // reset
        assert_eq!(orchestrator.check_sanity(), SanityOutcome::Retry);
        assert_eq!(orchestrator.check_sanity(), SanityOutcome::Retry);
        assert_eq!(orchestrator.check_sanity(), SanityOutcome::Rebuild);
        assert_eq!(orchestrator.sanity_failures, 0);

        // a healthy index clears the streak immediately
        assert_eq!(orchestrator.check_sanity(), SanityOutcome::Retry);
        orchestrator.index = Some(sane_index());
        assert_eq!(orchestrator.check_sanity(), SanityOutcome::Proceed);
        assert_eq!(orchestrator.sanity_failures, 0);
    }

    #[test]
    fn sanity_rejects_wrong_asn() {
        let mut orchestrator = orchestrator_with(CaptureSink::default());
        let mut index = PrefixIndex::new();
        index.insert(
            "198.51.100.0/24".parse::<Ipv4Net>().expect("bad prefix"),
            "65000".to_string(),
        );
        orchestrator.index = Some(index);
        assert_eq!(orchestrator.check_sanity(), SanityOutcome::Retry);
    }

    #[test]
    fn route_server_rotation_wraps() {
        let mut orchestrator = orchestrator_with(CaptureSink::default());
        assert_eq!(orchestrator.next_route_server(), "rs-a.example.net");
        assert_eq!(orchestrator.next_route_server(), "rs-b.example.net");
        assert_eq!(orchestrator.next_route_server(), "rs-c.example.net");
        assert_eq!(orchestrator.next_route_server(), "rs-a.example.net");
    }

    #[test]
    fn candidates_filtered_by_index_and_capped() {
        let mut orchestrator = orchestrator_with(CaptureSink::default());
        orchestrator.index = Some(sane_index());
        {
            let mut registry = orchestrator.registry.lock().expect("not poisoned");
            for last in [9u8, 10, 11] {
                registry
                    .insert(
                        Ipv4Addr::new(198, 51, 100, last),
                        Attrs {
                            org: Some("dshield"),
                            ..Attrs::default()
                        },
                    )
                    .expect("insert");
            }
            // outside the monitored space
            registry
                .insert(
                    Ipv4Addr::new(203, 0, 113, 5),
                    Attrs {
                        org: Some("dshield"),
                        ..Attrs::default()
                    },
                )
                .expect("insert");
        }
        let candidates = orchestrator.collect_candidates();
        // whois_batch_max is 2 in the test config
        assert_eq!(candidates.len(), 2);
        assert!(
            candidates
                .iter()
                .all(|ip| ip.octets()[..3] == [198, 51, 100])
        );
    }

    #[test]
    fn report_groups_by_monitored_asn() {
        let mut orchestrator = orchestrator_with(CaptureSink::default());
        {
            let mut registry = orchestrator.registry.lock().expect("not poisoned");
            registry
                .insert(
                    Ipv4Addr::new(198, 51, 100, 9),
                    Attrs {
                        desc: Some("ssh scans"),
                        org: Some("dshield"),
                        ..Attrs::default()
                    },
                )
                .expect("insert");
            registry
                .merge_whois_line("64500 | 198.51.100.9 | US | ExampleNet")
                .expect("merge");
            registry
                .insert(
                    Ipv4Addr::new(203, 0, 113, 5),
                    Attrs {
                        desc: Some("drone"),
                        org: Some("abuse-ch"),
                        ..Attrs::default()
                    },
                )
                .expect("insert");
            registry
                .merge_whois_line("64501 | 203.0.113.5 | CA | OtherNet")
                .expect("merge");
            // never confirmed by whois: stays out of the report
            registry
                .insert(
                    Ipv4Addr::new(192, 0, 2, 99),
                    Attrs {
                        org: Some("dshield"),
                        ..Attrs::default()
                    },
                )
                .expect("insert");
        }
        let report = orchestrator.compose_report();
        assert_eq!(
            report,
            "198.51.100.9 64500 US dshield ExampleNet | ssh scans\r\n\
             203.0.113.5 64501 CA abuse-ch OtherNet | drone"
        );
    }

    #[tokio::test]
    async fn empty_cycle_reports_no_hostile_ips() {
        let sink = CaptureSink::default();
        let mut orchestrator = orchestrator_with(sink.clone());
        orchestrator.index = Some(sane_index());

        // no blocklists configured: the cycle runs end to end without I/O
        orchestrator.ingest_cycle().await;

        let emitted = sink.0.lock().expect("not poisoned");
        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].ends_with("No hostile IPs found in ASNs of interest"));
        assert_eq!(orchestrator.status(), emitted[0]);
    }
}
