// Tests for trace import and the import worker pool

use chrono::{DateTime, Utc};
use flowmap_core::data::{Database, HostRepository};
use flowmap_core::error::StoreError;
use flowmap_core::import::{ImportPool, ImportPoolOptions, RepositoryFactory, TraceImportService};
use flowmap_core::model::{Host, NewTrace, Trace, TraceImportInfo, TraceProtocol};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn import_info(source: &str, destination: &str, protocol: u8) -> TraceImportInfo {
    TraceImportInfo {
        timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        exporter_address: ip("192.0.2.1"),
        source_address: ip(source),
        source_port: 40000,
        destination_address: ip(destination),
        destination_port: 443,
        protocol,
        byte_count: 1500,
        packet_count: 3,
    }
}

fn temp_db_path() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");
    Database::new(&path).unwrap();
    (temp_dir, path)
}

fn database_factory(path: PathBuf) -> RepositoryFactory<Database> {
    Arc::new(move || Database::new(&path))
}

/// Repository that blocks every host lookup until the test releases the gate.
struct GatedRepository {
    gate: Arc<Mutex<()>>,
    entered: mpsc::Sender<()>,
    next_id: Mutex<i64>,
}

impl GatedRepository {
    fn next(&self) -> i64 {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }
}

impl HostRepository for GatedRepository {
    fn get_host(&self, _address: IpAddr) -> Result<Option<Host>, StoreError> {
        Ok(None)
    }

    fn get_or_create_host(&self, address: IpAddr) -> Result<Host, StoreError> {
        let _ = self.entered.send(());
        let _open = self.gate.lock().unwrap();
        Ok(Host {
            id: self.next(),
            address,
            dns: None,
        })
    }

    fn add_trace(&self, trace: &NewTrace) -> Result<Trace, StoreError> {
        Ok(Trace::from_new(self.next(), trace))
    }

    fn query_hosts_stale_or_unresolved(&self, _cutoff: DateTime<Utc>) -> Result<Vec<Host>, StoreError> {
        Ok(Vec::new())
    }

    fn save_host_updates(&self, _hosts: &[Host]) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Repository whose writes always fail.
struct FailingRepository;

impl HostRepository for FailingRepository {
    fn get_host(&self, _address: IpAddr) -> Result<Option<Host>, StoreError> {
        Ok(None)
    }

    fn get_or_create_host(&self, address: IpAddr) -> Result<Host, StoreError> {
        Err(StoreError::Conflict { address })
    }

    fn add_trace(&self, _trace: &NewTrace) -> Result<Trace, StoreError> {
        unreachable!("host creation fails first")
    }

    fn query_hosts_stale_or_unresolved(&self, _cutoff: DateTime<Utc>) -> Result<Vec<Host>, StoreError> {
        Ok(Vec::new())
    }

    fn save_host_updates(&self, _hosts: &[Host]) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// Import Service Tests
// ============================================================================

#[test]
fn test_import_trace_creates_hosts_and_trace() {
    let (_temp_dir, path) = temp_db_path();
    let service = TraceImportService::new(Database::new(&path).unwrap());

    let trace = service
        .import_trace(&import_info("10.0.0.1", "10.0.0.2", 6))
        .unwrap();

    let db = service.repository();
    let source = db.get_host(ip("10.0.0.1")).unwrap().unwrap();
    let destination = db.get_host(ip("10.0.0.2")).unwrap().unwrap();

    // Source is resolved before destination
    assert!(source.id < destination.id);
    assert_eq!(trace.source_host_id, source.id);
    assert_eq!(trace.destination_host_id, destination.id);
    assert_eq!(trace.protocol, TraceProtocol::Tcp);
    assert_eq!(trace.byte_count, 1500);
    assert_eq!(trace.packet_count, 3);
    assert_eq!(trace.source_port, 40000);
    assert_eq!(trace.destination_port, 443);
    assert_eq!(trace.exporter_address, ip("192.0.2.1"));
}

#[test]
fn test_import_trace_reuses_hosts() {
    let (_temp_dir, path) = temp_db_path();
    let service = TraceImportService::new(Database::new(&path).unwrap());

    service.import_trace(&import_info("10.0.0.1", "10.0.0.2", 17)).unwrap();
    service.import_trace(&import_info("10.0.0.2", "10.0.0.1", 17)).unwrap();

    assert_eq!(service.repository().count_hosts().unwrap(), 2);
    assert_eq!(service.repository().count_traces().unwrap(), 2);
}

#[test]
fn test_import_trace_protocol_mapping() {
    let (_temp_dir, path) = temp_db_path();
    let service = TraceImportService::new(Database::new(&path).unwrap());

    let udp = service.import_trace(&import_info("10.0.0.1", "10.0.0.2", 17)).unwrap();
    let icmp = service.import_trace(&import_info("10.0.0.1", "10.0.0.2", 1)).unwrap();

    assert_eq!(udp.protocol, TraceProtocol::Udp);
    assert_eq!(icmp.protocol, TraceProtocol::Udp);
}

// ============================================================================
// Import Pool Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_imports_everything_dispatched() {
    let (_temp_dir, path) = temp_db_path();
    let options = ImportPoolOptions {
        workers: 4,
        queue_capacity: 256,
    };
    let pool = ImportPool::start(database_factory(path.clone()), options).unwrap();

    for i in 0..100 {
        let source = format!("10.0.0.{}", i % 5);
        assert!(pool.dispatch(import_info(&source, "10.0.1.1", 17)));
    }

    pool.shutdown().await;

    let stats = pool.stats();
    assert_eq!(stats.imported(), 100);
    assert_eq!(stats.failed(), 0);
    assert_eq!(stats.dropped(), 0);

    let db = Database::new(&path).unwrap();
    assert_eq!(db.count_traces().unwrap(), 100);
    assert_eq!(db.count_hosts().unwrap(), 6);
}

#[tokio::test]
async fn test_pool_drops_when_queue_full() {
    let gate = Arc::new(Mutex::new(()));
    let (entered_tx, entered_rx) = mpsc::channel();

    let worker_gate = Arc::clone(&gate);
    let factory: RepositoryFactory<GatedRepository> = Arc::new(move || {
        Ok(GatedRepository {
            gate: Arc::clone(&worker_gate),
            entered: entered_tx.clone(),
            next_id: Mutex::new(0),
        })
    });

    let closed = gate.lock().unwrap();
    let pool = ImportPool::start(
        factory,
        ImportPoolOptions {
            workers: 1,
            queue_capacity: 1,
        },
    )
    .unwrap();

    // The only worker picks up the first flow and blocks on the gate
    assert!(pool.dispatch(import_info("10.0.0.1", "10.0.0.2", 17)));
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert!(pool.dispatch(import_info("10.0.0.3", "10.0.0.4", 17)));
    assert!(!pool.dispatch(import_info("10.0.0.5", "10.0.0.6", 17)));

    drop(closed);
    pool.shutdown().await;

    let stats = pool.stats();
    assert_eq!(stats.imported(), 2);
    assert_eq!(stats.dropped(), 1);
}

#[tokio::test]
async fn test_pool_counts_failures_and_keeps_going() {
    let factory: RepositoryFactory<FailingRepository> = Arc::new(|| Ok(FailingRepository));
    let pool = ImportPool::start(
        factory,
        ImportPoolOptions {
            workers: 2,
            queue_capacity: 16,
        },
    )
    .unwrap();

    for _ in 0..5 {
        pool.dispatch(import_info("10.0.0.1", "10.0.0.2", 17));
    }
    pool.shutdown().await;

    assert_eq!(pool.stats().failed(), 5);
    assert_eq!(pool.stats().imported(), 0);
}

#[tokio::test]
async fn test_pool_refuses_after_close() {
    let (_temp_dir, path) = temp_db_path();
    let pool = ImportPool::start(database_factory(path), ImportPoolOptions::default()).unwrap();

    assert!(!pool.is_closed());
    pool.close();
    assert!(pool.is_closed());

    assert!(!pool.dispatch(import_info("10.0.0.1", "10.0.0.2", 17)));
    assert_eq!(pool.stats().dropped(), 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_pool_start_fails_when_store_unavailable() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("missing").join("nested").join("test.db");

    let result = ImportPool::start(database_factory(path), ImportPoolOptions::default());
    assert!(matches!(result, Err(StoreError::Unavailable(_))));
}
