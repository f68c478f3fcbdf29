//! Turning observed flows into stored traces.
//!
//! [`TraceImportService`] does the work for one flow. [`ImportPool`] runs a fixed
//! number of services on blocking threads behind a bounded queue, so the UDP
//! receive loop can hand flows off without ever waiting on SQLite.

use crate::data::HostRepository;
use crate::error::StoreError;
use crate::model::{NewTrace, Trace, TraceImportInfo, TraceProtocol};
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub struct TraceImportService<R: HostRepository> {
    repository: R,
}

impl<R: HostRepository> TraceImportService<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Resolve the source host, then the destination host, then append the trace.
    pub fn import_trace(&self, info: &TraceImportInfo) -> Result<Trace, StoreError> {
        let source = self.repository.get_or_create_host(info.source_address)?;
        let destination = self.repository.get_or_create_host(info.destination_address)?;

        let trace = NewTrace {
            exporter_address: info.exporter_address,
            timestamp: info.timestamp,
            protocol: TraceProtocol::from_iana(info.protocol),
            source_host_id: source.id,
            source_port: info.source_port,
            destination_host_id: destination.id,
            destination_port: info.destination_port,
            byte_count: info.byte_count,
            packet_count: info.packet_count,
        };

        self.repository.add_trace(&trace)
    }
}

/// Opens one repository per worker.
pub type RepositoryFactory<R> = Arc<dyn Fn() -> Result<R, StoreError> + Send + Sync>;

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct ImportPoolOptions {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ImportPoolOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Default)]
pub struct ImportStats {
    imported: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl ImportStats {
    pub fn imported(&self) -> u64 {
        self.imported.load(Ordering::Relaxed)
    }

    /// Imports that reached the store and failed there.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Flows refused because the queue was full or the pool was closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct ImportPool {
    sender: Mutex<Option<mpsc::Sender<TraceImportInfo>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<ImportStats>,
}

impl ImportPool {
    /// Open every worker's repository, then start the workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<R>(factory: RepositoryFactory<R>, options: ImportPoolOptions) -> Result<Self, StoreError>
    where
        R: HostRepository + Send + 'static,
    {
        let worker_count = options.workers.max(1);
        let repositories = (0..worker_count)
            .map(|_| factory())
            .collect::<Result<Vec<R>, StoreError>>()?;

        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(ImportStats::default());

        let workers = repositories
            .into_iter()
            .enumerate()
            .map(|(id, repository)| {
                let receiver = Arc::clone(&receiver);
                let stats = Arc::clone(&stats);
                tokio::task::spawn_blocking(move || {
                    run_worker(id, TraceImportService::new(repository), receiver, stats)
                })
            })
            .collect();

        info!(
            "Started {} import worker(s), queue capacity {}",
            worker_count, options.queue_capacity
        );

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            stats,
        })
    }

    pub fn stats(&self) -> Arc<ImportStats> {
        Arc::clone(&self.stats)
    }

    /// Queue a flow for import without waiting.
    ///
    /// Returns `false` when the flow was dropped: the queue is full or the pool is closed.
    pub fn dispatch(&self, info: TraceImportInfo) -> bool {
        let sender = self.sender.lock().unwrap_or_else(|p| p.into_inner());

        let Some(sender) = sender.as_ref() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sender.try_send(info) {
            Ok(()) => true,
            Err(TrySendError::Full(info)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    source = %info.source_address,
                    destination = %info.destination_address,
                    "import queue full, dropping flow"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Stop accepting new flows. Already queued flows are still imported.
    pub fn close(&self) {
        let mut sender = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        if sender.take().is_some() {
            debug!("import queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .map(|sender| sender.is_none())
            .unwrap_or(true)
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn shutdown(&self) {
        self.close();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|p| p.into_inner()));
        for result in join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "import worker panicked");
            }
        }

        info!(
            imported = self.stats.imported(),
            failed = self.stats.failed(),
            dropped = self.stats.dropped(),
            "Import pool stopped"
        );
    }
}

fn run_worker<R: HostRepository>(
    id: usize,
    service: TraceImportService<R>,
    receiver: Arc<Mutex<mpsc::Receiver<TraceImportInfo>>>,
    stats: Arc<ImportStats>,
) {
    loop {
        // One worker waits on the channel at a time; the rest wait on the lock.
        let next = receiver
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .blocking_recv();

        let Some(info) = next else {
            break;
        };

        match service.import_trace(&info) {
            Ok(imported) => {
                stats.imported.fetch_add(1, Ordering::Relaxed);
                trace!(worker = id, trace_id = imported.id, "imported trace");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker = id,
                    error = %e,
                    source = %info.source_address,
                    destination = %info.destination_address,
                    "failed to import trace"
                );
            }
        }
    }

    debug!(worker = id, "import worker finished");
}
