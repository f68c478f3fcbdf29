// Tests for the reverse DNS refresher

use chrono::{DateTime, Duration as TimeDelta, Utc};
use flowmap_core::data::{Database, HostRepository};
use flowmap_core::error::ResolutionError;
use flowmap_core::model::{DnsInfo, UNKNOWN_HOSTNAME};
use flowmap_core::refresh::{DnsRefresher, RefreshSummary, ReverseResolver};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Resolver backed by a fixed table. Addresses not in the table fail.
#[derive(Clone, Default)]
struct TableResolver {
    names: HashMap<IpAddr, String>,
    queried: Arc<Mutex<Vec<IpAddr>>>,
}

impl TableResolver {
    fn with(mut self, address: &str, name: &str) -> Self {
        self.names.insert(ip(address), name.to_string());
        self
    }

    fn queried(&self) -> Vec<IpAddr> {
        self.queried.lock().unwrap().clone()
    }
}

impl ReverseResolver for TableResolver {
    fn reverse(&self, address: IpAddr) -> Result<String, ResolutionError> {
        self.queried.lock().unwrap().push(address);
        self.names
            .get(&address)
            .cloned()
            .ok_or(ResolutionError::NotFound(address))
    }
}

// ============================================================================
// Refresh Cycle Tests
// ============================================================================

#[test]
fn test_refresh_resolves_unresolved_hosts() {
    let (_temp_dir, db) = create_test_db();
    db.get_or_create_host(ip("10.0.0.1")).unwrap();
    db.get_or_create_host(ip("10.0.0.2")).unwrap();

    let resolver = TableResolver::default()
        .with("10.0.0.1", "one.local")
        .with("10.0.0.2", "two.local");
    let refresher = DnsRefresher::new(db, resolver);

    let summary = refresher.refresh_once(now()).unwrap();
    assert_eq!(
        summary,
        RefreshSummary {
            checked: 2,
            resolved: 2,
            failed: 0,
            renamed: 2,
        }
    );

    let host = refresher.repository().get_host(ip("10.0.0.1")).unwrap().unwrap();
    assert_eq!(
        host.dns,
        Some(DnsInfo {
            name: "one.local".to_string(),
            last_resolved_at: now(),
        })
    );
}

#[test]
fn test_refresh_failure_stores_sentinel_and_continues() {
    let (_temp_dir, db) = create_test_db();
    db.get_or_create_host(ip("10.0.0.1")).unwrap();
    db.get_or_create_host(ip("10.0.0.2")).unwrap();

    let resolver = TableResolver::default().with("10.0.0.2", "two.local");
    let refresher = DnsRefresher::new(db, resolver);

    let summary = refresher.refresh_once(now()).unwrap();
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.failed, 1);

    let db = refresher.repository();
    let failed = db.get_host(ip("10.0.0.1")).unwrap().unwrap();
    assert_eq!(failed.dns_name(), Some(UNKNOWN_HOSTNAME));
    assert_eq!(failed.dns.unwrap().last_resolved_at, now());

    let resolved = db.get_host(ip("10.0.0.2")).unwrap().unwrap();
    assert_eq!(resolved.dns_name(), Some("two.local"));
}

#[test]
fn test_refresh_skips_hosts_inside_cutoff_even_with_sentinel() {
    let (_temp_dir, db) = create_test_db();
    let mut host = db.get_or_create_host(ip("10.0.0.1")).unwrap();
    host.dns = Some(DnsInfo {
        name: UNKNOWN_HOSTNAME.to_string(),
        last_resolved_at: now() - TimeDelta::hours(1),
    });
    db.save_host_updates(&[host]).unwrap();

    let resolver = TableResolver::default().with("10.0.0.1", "one.local");
    let refresher = DnsRefresher::new(db, resolver.clone());

    let summary = refresher.refresh_once(now()).unwrap();
    assert_eq!(summary.checked, 0);
    assert!(resolver.queried().is_empty());

    let host = refresher.repository().get_host(ip("10.0.0.1")).unwrap().unwrap();
    assert_eq!(host.dns_name(), Some(UNKNOWN_HOSTNAME));
}

#[test]
fn test_refresh_requeries_after_cutoff() {
    let (_temp_dir, db) = create_test_db();
    let mut host = db.get_or_create_host(ip("10.0.0.1")).unwrap();
    host.dns = Some(DnsInfo {
        name: "old.local".to_string(),
        last_resolved_at: now() - TimeDelta::hours(3),
    });
    db.save_host_updates(&[host]).unwrap();

    let resolver = TableResolver::default().with("10.0.0.1", "new.local");
    let refresher =
        DnsRefresher::new(db, resolver.clone()).with_cutoff(Duration::from_secs(2 * 60 * 60));

    let summary = refresher.refresh_once(now()).unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.renamed, 1);
    assert_eq!(resolver.queried(), vec![ip("10.0.0.1")]);

    let host = refresher.repository().get_host(ip("10.0.0.1")).unwrap().unwrap();
    assert_eq!(host.dns_name(), Some("new.local"));
}

#[test]
fn test_refresh_same_name_updates_timestamp_only() {
    let (_temp_dir, db) = create_test_db();
    let mut host = db.get_or_create_host(ip("10.0.0.1")).unwrap();
    host.dns = Some(DnsInfo {
        name: "same.local".to_string(),
        last_resolved_at: now() - TimeDelta::days(2),
    });
    db.save_host_updates(&[host]).unwrap();

    let resolver = TableResolver::default().with("10.0.0.1", "same.local");
    let refresher = DnsRefresher::new(db, resolver);

    let summary = refresher.refresh_once(now()).unwrap();
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.renamed, 0);

    let host = refresher.repository().get_host(ip("10.0.0.1")).unwrap().unwrap();
    assert_eq!(host.dns.unwrap().last_resolved_at, now());
}

#[test]
fn test_refresh_with_nothing_to_do() {
    let (_temp_dir, db) = create_test_db();
    let refresher = DnsRefresher::new(db, TableResolver::default());

    assert_eq!(refresher.refresh_once(now()).unwrap(), RefreshSummary::default());
}

// ============================================================================
// Background Loop Tests
// ============================================================================

#[tokio::test]
async fn test_run_refreshes_until_cancelled() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    db.get_or_create_host(ip("10.0.0.1")).unwrap();

    let resolver = TableResolver::default().with("10.0.0.1", "one.local");
    let refresher = DnsRefresher::new(db, resolver);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(refresher.run(Duration::from_millis(20), cancel.clone()));

    let check = Database::new(&db_path).unwrap();
    let mut named = false;
    for _ in 0..250 {
        let host = check.get_host(ip("10.0.0.1")).unwrap().unwrap();
        if host.dns_name() == Some("one.local") {
            named = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(named, "refresher never resolved the host");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("refresher did not stop")
        .unwrap();
}
