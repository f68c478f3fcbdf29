//! Periodic reverse DNS refresh of stored hosts.

use crate::data::HostRepository;
use crate::error::{ResolutionError, StoreError};
use crate::model::{DnsInfo, UNKNOWN_HOSTNAME};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(120);
pub const DEFAULT_CUTOFF: Duration = Duration::from_secs(24 * 60 * 60);

pub trait ReverseResolver {
    /// Name the address reverse-resolves to.
    fn reverse(&self, address: IpAddr) -> Result<String, ResolutionError>;
}

/// Resolves through the operating system's resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl ReverseResolver for SystemResolver {
    fn reverse(&self, address: IpAddr) -> Result<String, ResolutionError> {
        match dns_lookup::lookup_addr(&address) {
            // getnameinfo falls back to the numeric form when there is no PTR record
            Ok(name) if name == address.to_string() => Err(ResolutionError::NotFound(address)),
            Ok(name) => Ok(name),
            Err(e) => Err(ResolutionError::Lookup {
                address,
                message: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    /// Hosts that were stale or never resolved.
    pub checked: usize,
    pub resolved: usize,
    /// Lookups that failed and were stored as the unknown-host sentinel.
    pub failed: usize,
    /// Hosts whose stored name changed.
    pub renamed: usize,
}

pub struct DnsRefresher<R, V> {
    repository: R,
    resolver: V,
    cutoff: Duration,
}

impl<R: HostRepository, V: ReverseResolver> DnsRefresher<R, V> {
    pub fn new(repository: R, resolver: V) -> Self {
        Self {
            repository,
            resolver,
            cutoff: DEFAULT_CUTOFF,
        }
    }

    /// Age after which a stored name is looked up again.
    pub fn with_cutoff(mut self, cutoff: Duration) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// One refresh cycle.
    ///
    /// Every stale host gets a fresh `last_resolved_at`, including the ones whose
    /// lookup failed, so nothing is looked up again until the cutoff passes.
    /// All updates are saved together at the end.
    pub fn refresh_once(&self, now: DateTime<Utc>) -> Result<RefreshSummary, StoreError> {
        let cutoff = TimeDelta::from_std(self.cutoff)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let hosts = self.repository.query_hosts_stale_or_unresolved(cutoff)?;

        let mut summary = RefreshSummary {
            checked: hosts.len(),
            ..RefreshSummary::default()
        };
        let mut updates = Vec::with_capacity(hosts.len());

        for mut host in hosts {
            let name = match self.resolver.reverse(host.address) {
                Ok(name) => {
                    summary.resolved += 1;
                    name
                }
                Err(e) => {
                    summary.failed += 1;
                    debug!(address = %host.address, error = %e, "reverse lookup failed");
                    UNKNOWN_HOSTNAME.to_string()
                }
            };

            if host.dns_name() != Some(name.as_str()) {
                summary.renamed += 1;
                debug!(address = %host.address, name = %name, "host renamed");
            }

            host.dns = Some(DnsInfo {
                name,
                last_resolved_at: now,
            });
            updates.push(host);
        }

        if !updates.is_empty() {
            self.repository.save_host_updates(&updates)?;
        }

        Ok(summary)
    }
}

impl<R, V> DnsRefresher<R, V>
where
    R: HostRepository + Send + 'static,
    V: ReverseResolver + Send + 'static,
{
    /// Refresh every `period` until `cancel` fires. The first cycle runs immediately.
    ///
    /// Lookups block, so each cycle runs on a blocking thread.
    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("DNS refresher running every {:?}", period);
        let mut refresher = self;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cycle = tokio::task::spawn_blocking(move || {
                let result = refresher.refresh_once(Utc::now());
                (refresher, result)
            });

            let (returned, result) = tokio::select! {
                _ = cancel.cancelled() => break,
                joined = cycle => match joined {
                    Ok(joined) => joined,
                    Err(e) => {
                        error!(error = %e, "DNS refresh cycle panicked");
                        return;
                    }
                },
            };
            refresher = returned;

            match result {
                Ok(summary) if summary.checked > 0 => info!(
                    checked = summary.checked,
                    resolved = summary.resolved,
                    failed = summary.failed,
                    renamed = summary.renamed,
                    "DNS refresh cycle complete"
                ),
                Ok(_) => debug!("no hosts due for DNS refresh"),
                Err(e) => warn!(error = %e, "DNS refresh cycle failed"),
            }
        }

        info!("DNS refresher stopped");
    }
}
