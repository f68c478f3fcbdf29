use crate::error::InvalidAddress;
use chrono::{DateTime, Utc};
use flowmap_collector::FlowRecord;
use flowmap_collector::record::IPPROTO_TCP;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Name stored for hosts whose reverse lookup failed.
pub const UNKNOWN_HOSTNAME: &str = "Unknown Hostname";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsInfo {
    pub name: String,
    pub last_resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub address: IpAddr,
    pub dns: Option<DnsInfo>,
}

impl Host {
    pub fn dns_name(&self) -> Option<&str> {
        self.dns.as_ref().map(|dns| dns.name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceProtocol {
    Udp,
    Tcp,
}

impl TraceProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceProtocol::Udp => "udp",
            TraceProtocol::Tcp => "tcp",
        }
    }

    /// Map an IANA protocol number. Only TCP is told apart; everything else is stored as UDP.
    pub fn from_iana(protocol: u8) -> Self {
        if protocol == IPPROTO_TCP {
            TraceProtocol::Tcp
        } else {
            TraceProtocol::Udp
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "udp" => Some(TraceProtocol::Udp),
            "tcp" => Some(TraceProtocol::Tcp),
            _ => None,
        }
    }
}

/// A trace ready to be appended to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrace {
    pub exporter_address: IpAddr,
    pub timestamp: DateTime<Utc>,
    pub protocol: TraceProtocol,
    pub source_host_id: i64,
    pub source_port: u16,
    pub destination_host_id: i64,
    pub destination_port: u16,
    pub byte_count: u64,
    pub packet_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub id: i64,
    pub exporter_address: IpAddr,
    pub timestamp: DateTime<Utc>,
    pub protocol: TraceProtocol,
    pub source_host_id: i64,
    pub source_port: u16,
    pub destination_host_id: i64,
    pub destination_port: u16,
    pub byte_count: u64,
    pub packet_count: u64,
}

impl Trace {
    pub fn from_new(id: i64, trace: &NewTrace) -> Self {
        Self {
            id,
            exporter_address: trace.exporter_address,
            timestamp: trace.timestamp,
            protocol: trace.protocol,
            source_host_id: trace.source_host_id,
            source_port: trace.source_port,
            destination_host_id: trace.destination_host_id,
            destination_port: trace.destination_port,
            byte_count: trace.byte_count,
            packet_count: trace.packet_count,
        }
    }
}

/// Everything the import service needs to persist one observed flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceImportInfo {
    pub timestamp: DateTime<Utc>,
    pub exporter_address: IpAddr,
    pub source_address: IpAddr,
    pub source_port: u16,
    pub destination_address: IpAddr,
    pub destination_port: u16,
    pub protocol: u8,
    pub byte_count: u64,
    pub packet_count: u64,
}

impl TraceImportInfo {
    /// `None` when the record lacks either endpoint address.
    pub fn from_record(
        record: &FlowRecord,
        exporter_address: IpAddr,
        timestamp: DateTime<Utc>,
    ) -> Option<Self> {
        let (source_address, destination_address) = record.endpoints()?;
        Some(Self {
            timestamp,
            exporter_address,
            source_address,
            source_port: record.source_port,
            destination_address,
            destination_port: record.destination_port,
            protocol: record.protocol,
            byte_count: record.byte_count,
            packet_count: record.packet_count,
        })
    }
}

/// Traffic between one (source, destination) host pair summed over a query window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateTrace {
    pub source_address: IpAddr,
    pub source_dns_name: Option<String>,
    pub destination_address: IpAddr,
    pub destination_dns_name: Option<String>,
    pub byte_count: u64,
    pub packet_count: u64,
    pub trace_count: u64,
}

impl AggregateTrace {
    pub fn new(source_address: IpAddr, destination_address: IpAddr) -> Self {
        Self {
            source_address,
            source_dns_name: None,
            destination_address,
            destination_dns_name: None,
            byte_count: 0,
            packet_count: 0,
            trace_count: 1,
        }
    }

    pub fn with_counts(mut self, byte_count: u64, packet_count: u64, trace_count: u64) -> Self {
        self.byte_count = byte_count;
        self.packet_count = packet_count;
        self.trace_count = trace_count;
        self
    }

    pub fn with_dns_names(mut self, source: Option<&str>, destination: Option<&str>) -> Self {
        self.source_dns_name = source.map(str::to_string);
        self.destination_dns_name = destination.map(str::to_string);
        self
    }
}

/// Raw octets of an address, 4 bytes for IPv4 and 16 for IPv6.
pub fn address_octets(address: IpAddr) -> Vec<u8> {
    match address {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

pub fn address_from_octets(octets: &[u8]) -> Result<IpAddr, InvalidAddress> {
    if let Ok(v4) = <[u8; 4]>::try_from(octets) {
        return Ok(IpAddr::V4(Ipv4Addr::from(v4)));
    }
    if let Ok(v6) = <[u8; 16]>::try_from(octets) {
        return Ok(IpAddr::V6(Ipv6Addr::from(v6)));
    }
    Err(InvalidAddress(octets.len()))
}
