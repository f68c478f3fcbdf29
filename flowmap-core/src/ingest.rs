use crate::data::Database;
use crate::error::{IngestError, StoreError};
use crate::graph::TraceGraph;
use crate::import::{ImportPool, ImportPoolOptions, ImportStats, RepositoryFactory};
use crate::layer::{LayerContext, Pipeline};
use crate::model::TraceImportInfo;
use crate::refresh::{DnsRefresher, SystemResolver};
use crate::report::GraphDetails;
use chrono::{DateTime, Utc};
use flowmap_collector::{FlowListener, FlowRecord, ListenerStats, RecordCallback};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Options for a listen run
pub struct ListenOptions {
    pub bind: SocketAddr,
    pub database: PathBuf,
    pub pool: ImportPoolOptions,
    /// `None` disables the DNS refresher.
    pub refresh: Option<RefreshOptions>,
    pub show_progress: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshOptions {
    pub interval: Duration,
    pub cutoff: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenSummary {
    pub datagrams: u64,
    pub records: u64,
    pub rejected: u64,
    pub imported: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Listener, import pool and refresher wired together over one database.
pub struct IngestService {
    listener: FlowListener,
    pool: Arc<ImportPool>,
    refresher: Option<(DnsRefresher<Database, SystemResolver>, Duration)>,
    show_progress: bool,
}

impl IngestService {
    /// Bind the socket and open every database connection up front, so a bad
    /// port or database path fails before anything starts running.
    pub async fn start(options: ListenOptions) -> Result<Self, IngestError> {
        let listener = FlowListener::bind(options.bind).await?;

        let path = options.database.clone();
        let factory: RepositoryFactory<Database> = Arc::new(move || Database::new(&path));
        let pool = Arc::new(ImportPool::start(factory, options.pool)?);

        let refresher = match options.refresh {
            Some(refresh) => {
                let db = Database::new(&options.database)?;
                let refresher = DnsRefresher::new(db, SystemResolver).with_cutoff(refresh.cutoff);
                Some((refresher, refresh.interval))
            }
            None => None,
        };

        Ok(Self {
            listener,
            pool,
            refresher,
            show_progress: options.show_progress,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IngestError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn listener_stats(&self) -> Arc<ListenerStats> {
        self.listener.stats()
    }

    pub fn import_stats(&self) -> Arc<ImportStats> {
        self.pool.stats()
    }

    /// Ingest until `cancel` fires, then stop taking datagrams and wait for
    /// queued imports to finish.
    pub async fn run(self, cancel: CancellationToken) -> Result<ListenSummary, IngestError> {
        let shutdown = cancel.child_token();
        let listener_stats = self.listener.stats();
        let import_stats = self.pool.stats();

        let refresher = self
            .refresher
            .map(|(refresher, interval)| tokio::spawn(refresher.run(interval, shutdown.clone())));

        let progress = self.show_progress.then(|| {
            spawn_progress(
                Arc::clone(&listener_stats),
                Arc::clone(&import_stats),
                shutdown.clone(),
            )
        });

        let result = self
            .listener
            .run(import_callback(Arc::clone(&self.pool)), shutdown.clone())
            .await;

        // Stop the refresher and spinner even if the listener failed on its own
        shutdown.cancel();
        self.pool.shutdown().await;

        for task in [refresher, progress].into_iter().flatten() {
            if let Err(e) = task.await {
                warn!(error = %e, "background task failed");
            }
        }

        result?;

        let summary = ListenSummary {
            datagrams: listener_stats.datagrams(),
            records: listener_stats.records(),
            rejected: listener_stats.rejected(),
            imported: import_stats.imported(),
            failed: import_stats.failed(),
            dropped: import_stats.dropped(),
        };
        info!(?summary, "Ingest stopped");
        Ok(summary)
    }
}

/// Run a listener with the given options until `cancel` fires.
pub async fn execute_listen(
    options: ListenOptions,
    cancel: CancellationToken,
) -> Result<ListenSummary, IngestError> {
    IngestService::start(options).await?.run(cancel).await
}

/// Hand every record with both endpoints to the import pool.
pub fn import_callback(pool: Arc<ImportPool>) -> RecordCallback {
    Arc::new(move |record: FlowRecord, exporter: SocketAddr| {
        match TraceImportInfo::from_record(&record, exporter.ip(), Utc::now()) {
            Some(info) => {
                pool.dispatch(info);
            }
            None => debug!(%exporter, "skipping record without both endpoint addresses"),
        }
    })
}

fn spawn_progress(
    listener_stats: Arc<ListenerStats>,
    import_stats: Arc<ImportStats>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message("Waiting for flows...");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    pb.set_message(format!(
                        "{} datagram(s), {} flow(s), {} imported, {} dropped",
                        listener_stats.datagrams(),
                        listener_stats.records(),
                        import_stats.imported(),
                        import_stats.dropped()
                    ));
                    pb.tick();
                }
            }
        }
        pb.finish_and_clear();
    })
}

/// Aggregate the traces in `[from, to)`, build the graph and run the pipeline over it.
pub fn generate_graph(
    db: &Database,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    pipeline: &Pipeline,
) -> Result<GraphDetails, StoreError> {
    let traces = db.aggregate_traces(from, to)?;
    let mut graph = TraceGraph::build(&traces);

    let ctx = LayerContext::new(from, to);
    debug!(run_id = %ctx.run_id, traces = traces.len(), "built graph");
    pipeline.run(&mut graph, &ctx);

    Ok(GraphDetails::from_graph(&graph, &ctx))
}
