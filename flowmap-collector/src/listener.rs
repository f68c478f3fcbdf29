use crate::error::{ProtocolError, Result};
use crate::netflow;
use crate::record::FlowRecord;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, warn};
use uuid::Uuid;

/// Invoked once per decoded record with the address of the exporter that sent it.
pub type RecordCallback = Arc<dyn Fn(FlowRecord, SocketAddr) + Send + Sync>;

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM_LEN: usize = 65_535;

/// Running counters for a [`FlowListener`], shared with whoever wants to report them.
#[derive(Debug, Default)]
pub struct ListenerStats {
    datagrams: AtomicU64,
    records: AtomicU64,
    rejected: AtomicU64,
}

impl ListenerStats {
    pub fn datagrams(&self) -> u64 {
        self.datagrams.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Datagrams dropped because they failed to decode.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

pub struct FlowListener {
    socket: UdpSocket,
    stats: Arc<ListenerStats>,
}

impl FlowListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Receive datagrams until `cancel` fires.
    ///
    /// Decode failures and receive errors are logged and the loop keeps going;
    /// a single bad datagram never stops the listener.
    pub async fn run(self, on_record: RecordCallback, cancel: CancellationToken) -> Result<()> {
        let local = self.local_addr()?;
        info!("Listening for NetFlow v9 / IPFIX on {}", local);

        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (len, exporter) = match received {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "receive failed");
                    continue;
                }
            };

            let _ = process_datagram(&buf[..len], exporter, &on_record, &self.stats);
        }

        info!(
            datagrams = self.stats.datagrams(),
            records = self.stats.records(),
            rejected = self.stats.rejected(),
            "Listener on {} stopped",
            local
        );
        Ok(())
    }
}

/// Decode one payload and hand every record to `on_record`.
///
/// Each datagram gets its own span with a fresh id so the records it produced
/// can be traced back to it in the logs. Returns the number of records dispatched.
pub fn process_datagram(
    payload: &[u8],
    exporter: SocketAddr,
    on_record: &RecordCallback,
    stats: &ListenerStats,
) -> std::result::Result<usize, ProtocolError> {
    let span = debug_span!("datagram", id = %Uuid::new_v4(), %exporter, len = payload.len());
    let _enter = span.enter();

    stats.datagrams.fetch_add(1, Ordering::Relaxed);

    let decoded = match netflow::decode(payload) {
        Ok(decoded) => decoded,
        Err(e) => {
            stats.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "dropping datagram");
            return Err(e);
        }
    };

    let mut dispatched = 0;
    for record in decoded.records() {
        on_record(record, exporter);
        dispatched += 1;
    }
    stats.records.fetch_add(dispatched as u64, Ordering::Relaxed);

    debug!(
        sequence = decoded.header().sequence,
        records = dispatched,
        "decoded datagram"
    );
    Ok(dispatched)
}
