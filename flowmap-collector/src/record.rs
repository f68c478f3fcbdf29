use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// IANA protocol number for TCP.
pub const IPPROTO_TCP: u8 = 6;
/// IANA protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;

/// One decoded flow observation.
///
/// Fields the exporter's template did not carry keep their defaults:
/// addresses stay `None`, counters and ports stay zero.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowRecord {
    pub source_address: Option<IpAddr>,
    pub source_port: u16,
    pub destination_address: Option<IpAddr>,
    pub destination_port: u16,
    pub protocol: u8,
    pub byte_count: u64,
    pub packet_count: u64,
}

impl FlowRecord {
    pub fn new(source: IpAddr, destination: IpAddr) -> Self {
        Self {
            source_address: Some(source),
            destination_address: Some(destination),
            ..Self::default()
        }
    }

    /// Both endpoints, if the template carried them.
    pub fn endpoints(&self) -> Option<(IpAddr, IpAddr)> {
        Some((self.source_address?, self.destination_address?))
    }
}
