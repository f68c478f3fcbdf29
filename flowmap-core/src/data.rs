use crate::error::StoreError;
use crate::model::{
    address_from_octets, address_octets, AggregateTrace, DnsInfo, Host, NewTrace, Trace,
    UNKNOWN_HOSTNAME,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage contract consumed by the import service and the DNS refresher.
pub trait HostRepository {
    fn get_host(&self, address: IpAddr) -> Result<Option<Host>>;

    /// Return the host for `address`, creating it if it does not exist yet.
    /// Concurrent callers racing on a new address all get the same host.
    fn get_or_create_host(&self, address: IpAddr) -> Result<Host>;

    fn add_trace(&self, trace: &NewTrace) -> Result<Trace>;

    /// Hosts never resolved, or last resolved before `cutoff`.
    fn query_hosts_stale_or_unresolved(&self, cutoff: DateTime<Utc>) -> Result<Vec<Host>>;

    /// Persist the DNS info of every host in one transaction.
    fn save_host_updates(&self, hosts: &[Host]) -> Result<()>;
}

pub struct Database {
    conn: Connection,
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Read an address BLOB column.
fn address_column(row: &Row, idx: usize) -> rusqlite::Result<IpAddr> {
    let octets: Vec<u8> = row.get(idx)?;
    address_from_octets(&octets)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
}

fn host_from_row(row: &Row) -> rusqlite::Result<Host> {
    let name: Option<String> = row.get(2)?;
    let resolved_at: Option<i64> = row.get(3)?;

    Ok(Host {
        id: row.get(0)?,
        address: address_column(row, 1)?,
        dns: name.zip(resolved_at).map(|(name, at)| DnsInfo {
            name,
            last_resolved_at: from_timestamp(at),
        }),
    })
}

/// SQLite integers are signed; larger counters are stored as `i64::MAX`.
fn stored_counter(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl Database {
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Several import workers write through their own connections
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
-- One row per distinct address
CREATE TABLE IF NOT EXISTS hosts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address BLOB NOT NULL UNIQUE,   -- 4 or 16 raw octets
    created_at INTEGER NOT NULL,
    dns_name TEXT,
    dns_resolved_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_hosts_dns_resolved_at ON hosts(dns_resolved_at);

-- Append-only log of observed flows
CREATE TABLE IF NOT EXISTS traces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exporter_address BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    protocol TEXT NOT NULL CHECK(protocol IN ('udp', 'tcp')),
    source_host_id INTEGER NOT NULL,
    source_port INTEGER NOT NULL,
    destination_host_id INTEGER NOT NULL,
    destination_port INTEGER NOT NULL,
    byte_count INTEGER NOT NULL,
    packet_count INTEGER NOT NULL,

    FOREIGN KEY(source_host_id) REFERENCES hosts(id) ON DELETE CASCADE,
    FOREIGN KEY(destination_host_id) REFERENCES hosts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_traces_timestamp ON traces(timestamp);
CREATE INDEX IF NOT EXISTS idx_traces_pair ON traces(source_host_id, destination_host_id);
            ",
        )?;
        Ok(())
    }

    fn insert_host(&self, address: IpAddr) -> Result<Host> {
        let inserted = self.conn.execute(
            "INSERT INTO hosts (address, created_at) VALUES (?1, ?2)",
            params![address_octets(address), current_timestamp()],
        );

        match inserted {
            Ok(_) => Ok(Host {
                id: self.conn.last_insert_rowid(),
                address,
                dns: None,
            }),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict { address }),
            Err(e) => Err(e.into()),
        }
    }

    /// A lost insert race falls back to the winner's row.
    fn settle_insert(&self, address: IpAddr, inserted: Result<Host>) -> Result<Host> {
        match inserted {
            Ok(host) => {
                debug!(%address, id = host.id, "created host");
                Ok(host)
            }
            Err(StoreError::Conflict { address }) => {
                debug!(%address, "host created concurrently, using existing row");
                self.get_host(address)?
                    .ok_or(StoreError::Conflict { address })
            }
            Err(e) => Err(e),
        }
    }

    pub fn get_host_by_id(&self, id: i64) -> Result<Option<Host>> {
        let host = self
            .conn
            .query_row(
                "SELECT id, address, dns_name, dns_resolved_at FROM hosts WHERE id = ?1",
                params![id],
                host_from_row,
            )
            .optional()?;
        Ok(host)
    }

    pub fn list_hosts(&self) -> Result<Vec<Host>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, address, dns_name, dns_resolved_at FROM hosts ORDER BY id")?;

        let hosts = stmt
            .query_map([], host_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hosts)
    }

    pub fn count_hosts(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM hosts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_traces(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM traces", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Traces in `[from, to)` summed per (source, destination) host pair.
    ///
    /// Hosts whose lookup failed report no DNS name. Counters are summed as
    /// floats so a window of huge counters saturates instead of failing.
    pub fn aggregate_traces(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregateTrace>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.address, NULLIF(s.dns_name, ?3), d.address, NULLIF(d.dns_name, ?3),
                    TOTAL(t.byte_count), TOTAL(t.packet_count), COUNT(*)
             FROM traces t
             JOIN hosts s ON s.id = t.source_host_id
             JOIN hosts d ON d.id = t.destination_host_id
             WHERE t.timestamp >= ?1 AND t.timestamp < ?2
             GROUP BY t.source_host_id, t.destination_host_id
             ORDER BY t.source_host_id, t.destination_host_id",
        )?;

        let traces = stmt
            .query_map(
                params![from.timestamp(), to.timestamp(), UNKNOWN_HOSTNAME],
                |row| {
                    Ok(AggregateTrace {
                        source_address: address_column(row, 0)?,
                        source_dns_name: row.get(1)?,
                        destination_address: address_column(row, 2)?,
                        destination_dns_name: row.get(3)?,
                        byte_count: row.get::<_, f64>(4)? as u64,
                        packet_count: row.get::<_, f64>(5)? as u64,
                        trace_count: row.get::<_, i64>(6)? as u64,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(traces)
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}

impl HostRepository for Database {
    fn get_host(&self, address: IpAddr) -> Result<Option<Host>> {
        let host = self
            .conn
            .query_row(
                "SELECT id, address, dns_name, dns_resolved_at FROM hosts WHERE address = ?1",
                params![address_octets(address)],
                host_from_row,
            )
            .optional()?;
        Ok(host)
    }

    fn get_or_create_host(&self, address: IpAddr) -> Result<Host> {
        if let Some(host) = self.get_host(address)? {
            return Ok(host);
        }

        let inserted = self.insert_host(address);
        self.settle_insert(address, inserted)
    }

    fn add_trace(&self, trace: &NewTrace) -> Result<Trace> {
        self.conn.execute(
            "INSERT INTO traces (
                exporter_address, timestamp, protocol, source_host_id, source_port,
                destination_host_id, destination_port, byte_count, packet_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                address_octets(trace.exporter_address),
                trace.timestamp.timestamp(),
                trace.protocol.as_str(),
                trace.source_host_id,
                trace.source_port,
                trace.destination_host_id,
                trace.destination_port,
                stored_counter(trace.byte_count),
                stored_counter(trace.packet_count),
            ],
        )?;

        Ok(Trace::from_new(self.conn.last_insert_rowid(), trace))
    }

    fn query_hosts_stale_or_unresolved(&self, cutoff: DateTime<Utc>) -> Result<Vec<Host>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, address, dns_name, dns_resolved_at FROM hosts
             WHERE dns_resolved_at IS NULL OR dns_resolved_at < ?1
             ORDER BY id",
        )?;

        let hosts = stmt
            .query_map(params![cutoff.timestamp()], host_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hosts)
    }

    fn save_host_updates(&self, hosts: &[Host]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE hosts SET dns_name = ?1, dns_resolved_at = ?2 WHERE id = ?3",
            )?;
            for host in hosts {
                let name = host.dns.as_ref().map(|dns| dns.name.as_str());
                let resolved_at = host.dns.as_ref().map(|dns| dns.last_resolved_at.timestamp());
                stmt.execute(params![name, resolved_at, host.id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
