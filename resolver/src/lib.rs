// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Bounded-concurrency DNS resolution feeding the hostile-IP registry.
//!
//! Blocklists full of hostnames can trigger thousands of lookups in one
//! ingest cycle. The pool admits at most `max_in_flight` resolutions at a
//! time; everything beyond that waits, with later arrivals waiting longer.
//! The orchestrator polls [`DnsPool::busy`] and moves on to the whois phase
//! once the pool has drained.

#![deny(clippy::all)]

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::error::ResolveError;
use registry::{Attrs, Registry};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Seam over the actual resolver so the pool can be driven by a stub in
/// tests. `None` covers both NXDOMAIN and transport errors: the pool treats
/// every failure the same way (log, drop, count down).
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve_v4(&self, name: &str) -> Option<Ipv4Addr>;
}

/// The system resolver (hickory, tokio runtime, `/etc/resolv.conf`).
pub struct SystemResolver(TokioAsyncResolver);

impl SystemResolver {
    /// # Errors
    /// Fails when the system resolver configuration cannot be read.
    pub fn from_system_conf() -> Result<Self, ResolveError> {
        Ok(Self(TokioAsyncResolver::tokio_from_system_conf()?))
    }
}

#[async_trait]
impl Resolve for SystemResolver {
    async fn resolve_v4(&self, name: &str) -> Option<Ipv4Addr> {
        match self.0.lookup_ip(name).await {
            Ok(lookup) => lookup.iter().find_map(|addr| match addr {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            }),
            Err(e) => {
                debug!("dns lookup for {name} failed: {e}");
                None
            }
        }
    }
}

struct PoolInner {
    resolver: Box<dyn Resolve>,
    registry: Arc<Mutex<Registry>>,
    field_sep: String,
    max_in_flight: usize,
    in_flight: AtomicUsize,
    queued: AtomicUsize,
}

impl PoolInner {
    /// Take an execution slot if one is free. The counters are only touched
    /// between await points of one event loop, so load-then-add is enough.
    fn try_acquire(&self) -> bool {
        if self.in_flight.load(Ordering::Relaxed) < self.max_in_flight {
            self.in_flight.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Admit the request now if a slot is free, else park it on the wait
    /// queue and retry after a delay that grows with the queue depth. The
    /// counters move before any task yields, so [`DnsPool::busy`] is already
    /// true when `schedule` returns.
    fn dispatch(self: Arc<Self>, name: String, desc: String, org: String) {
        if self.try_acquire() {
            tokio::spawn(self.resolve_and_record(name, desc, org));
            return;
        }
        let queued = self.queued.fetch_add(1, Ordering::Relaxed) + 1;
        #[allow(clippy::cast_precision_loss)]
        let delay = (self.max_in_flight + queued) as f64 / self.max_in_flight as f64;
        debug!("dns pool full, deferring {name} for {delay:.1}s ({queued} waiting)");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            self.queued.fetch_sub(1, Ordering::Relaxed);
            self.dispatch(name, desc, org);
        });
    }

    async fn resolve_and_record(self: Arc<Self>, name: String, desc: String, org: String) {
        if let Some(ip) = self.resolver.resolve_v4(&name).await {
            let desc = if desc.is_empty() {
                name.clone()
            } else {
                format!("{name}{}{desc}", self.field_sep)
            };
            if let Ok(mut registry) = self.registry.lock() {
                if let Err(e) = registry.insert(
                    ip,
                    Attrs {
                        desc: Some(&desc),
                        org: Some(&org),
                        ..Attrs::default()
                    },
                ) {
                    warn!("dns result for {name} dropped: {e}");
                }
            }
        }

        let remaining = self.in_flight.fetch_sub(1, Ordering::Relaxed) - 1;
        if remaining == 0 && self.queued.load(Ordering::Relaxed) == 0 {
            debug!("all dns lookups done");
        }
    }
}

/// Handle used to schedule lookups; cheap to clone.
#[derive(Clone)]
pub struct DnsPool {
    inner: Arc<PoolInner>,
}

impl DnsPool {
    #[must_use]
    pub fn new(
        resolver: Box<dyn Resolve>,
        registry: Arc<Mutex<Registry>>,
        max_in_flight: usize,
        field_sep: &str,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                resolver,
                registry,
                field_sep: field_sep.to_string(),
                max_in_flight,
                in_flight: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
            }),
        }
    }

    /// Schedule a lookup and return immediately. The resolved address lands
    /// in the registry as `org`-sourced, described as `name ⊕ desc`; because
    /// the blocklist tag rides along, a hostname resolving to a previously
    /// unseen address creates a fresh registry entry.
    pub fn schedule(&self, name: &str, desc: &str, org: &str) {
        debug!("scheduling dns lookup for {name} (org {org})");
        let inner = Arc::clone(&self.inner);
        inner.dispatch(name.to_string(), desc.to_string(), org.to_string());
    }

    /// True while any lookup is running or waiting for a slot.
    #[must_use]
    pub fn busy(&self) -> bool {
        self.inner.in_flight.load(Ordering::Relaxed) > 0
            || self.inner.queued.load(Ordering::Relaxed) > 0
    }
}
