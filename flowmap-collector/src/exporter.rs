// NetFlow v9 and IPFIX datagram encoding, for synthetic exporters and fixtures

use std::net::IpAddr;

use crate::netflow::{
    field, FieldSpec, Template, FLOWSET_HEADER_LEN, HEADER_LEN, IPFIX, IPFIX_HEADER_LEN,
    IPFIX_TEMPLATE_SET_ID, NETFLOW_V9, TEMPLATE_SET_ID,
};
use crate::record::FlowRecord;

/// Template id used by [`ipv4_template`] unless told otherwise.
pub const DEFAULT_TEMPLATE_ID: u16 = 256;

/// Addresses, ports, protocol and 32-bit counters for IPv4 flows.
pub fn ipv4_template(id: u16) -> Template {
    Template {
        id,
        fields: vec![
            FieldSpec::new(field::IPV4_SRC_ADDR, 4),
            FieldSpec::new(field::IPV4_DST_ADDR, 4),
            FieldSpec::new(field::L4_SRC_PORT, 2),
            FieldSpec::new(field::L4_DST_PORT, 2),
            FieldSpec::new(field::PROTOCOL, 1),
            FieldSpec::new(field::IN_PKTS, 4),
            FieldSpec::new(field::IN_BYTES, 4),
        ],
    }
}

/// Same as [`ipv4_template`] for IPv6 flows, with 64-bit counters.
pub fn ipv6_template(id: u16) -> Template {
    Template {
        id,
        fields: vec![
            FieldSpec::new(field::IPV6_SRC_ADDR, 16),
            FieldSpec::new(field::IPV6_DST_ADDR, 16),
            FieldSpec::new(field::L4_SRC_PORT, 2),
            FieldSpec::new(field::L4_DST_PORT, 2),
            FieldSpec::new(field::PROTOCOL, 1),
            FieldSpec::new(field::IN_PKTS, 8),
            FieldSpec::new(field::IN_BYTES, 8),
        ],
    }
}

/// Builds a single NetFlow v9 or IPFIX datagram flow-set by flow-set.
#[derive(Debug, Clone, Default)]
pub struct DatagramBuilder {
    ipfix: bool,
    sequence: u32,
    source_id: u32,
    unix_secs: u32,
    record_count: u16,
    sets: Vec<u8>,
}

impl DatagramBuilder {
    pub fn new(sequence: u32) -> Self {
        Self {
            sequence,
            ..Self::default()
        }
    }

    /// An IPFIX message. `with_source_id` sets the observation domain and
    /// `with_unix_secs` the export time.
    pub fn ipfix(sequence: u32) -> Self {
        Self {
            ipfix: true,
            sequence,
            ..Self::default()
        }
    }

    pub fn with_source_id(mut self, source_id: u32) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn with_unix_secs(mut self, unix_secs: u32) -> Self {
        self.unix_secs = unix_secs;
        self
    }

    /// Append a template flow-set announcing `template`.
    pub fn template(mut self, template: &Template) -> Self {
        let mut body = Vec::with_capacity(4 + template.fields.len() * 4);
        body.extend_from_slice(&template.id.to_be_bytes());
        body.extend_from_slice(&(template.fields.len() as u16).to_be_bytes());
        for spec in &template.fields {
            match spec.enterprise {
                Some(number) if self.ipfix => {
                    body.extend_from_slice(&(spec.field_type | 0x8000).to_be_bytes());
                    body.extend_from_slice(&spec.length.to_be_bytes());
                    body.extend_from_slice(&number.to_be_bytes());
                }
                _ => {
                    body.extend_from_slice(&spec.field_type.to_be_bytes());
                    body.extend_from_slice(&spec.length.to_be_bytes());
                }
            }
        }

        self.record_count = self.record_count.saturating_add(1);
        let set_id = if self.ipfix {
            IPFIX_TEMPLATE_SET_ID
        } else {
            TEMPLATE_SET_ID
        };
        self.push_set(set_id, &body)
    }

    /// Append a data flow-set with `records` laid out by `template`.
    pub fn data(mut self, template: &Template, records: &[FlowRecord]) -> Self {
        let mut body = Vec::with_capacity(template.record_len() * records.len());
        for record in records {
            for spec in &template.fields {
                encode_field(&mut body, spec, record);
            }
        }

        self.record_count = self.record_count.saturating_add(records.len() as u16);
        self.push_set(template.id, &body)
    }

    /// Append an arbitrary flow-set.
    pub fn raw_set(self, set_id: u16, body: &[u8]) -> Self {
        self.push_set(set_id, body)
    }

    pub fn build(&self) -> Vec<u8> {
        if self.ipfix {
            let length = (IPFIX_HEADER_LEN + self.sets.len()) as u16;
            let mut out = Vec::with_capacity(IPFIX_HEADER_LEN + self.sets.len());
            out.extend_from_slice(&IPFIX.to_be_bytes());
            out.extend_from_slice(&length.to_be_bytes());
            out.extend_from_slice(&self.unix_secs.to_be_bytes());
            out.extend_from_slice(&self.sequence.to_be_bytes());
            out.extend_from_slice(&self.source_id.to_be_bytes());
            out.extend_from_slice(&self.sets);
            return out;
        }

        let mut out = Vec::with_capacity(HEADER_LEN + self.sets.len());
        out.extend_from_slice(&NETFLOW_V9.to_be_bytes());
        out.extend_from_slice(&self.record_count.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&self.unix_secs.to_be_bytes());
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.source_id.to_be_bytes());
        out.extend_from_slice(&self.sets);
        out
    }

    fn push_set(mut self, set_id: u16, body: &[u8]) -> Self {
        let length = (FLOWSET_HEADER_LEN + body.len()) as u16;
        self.sets.extend_from_slice(&set_id.to_be_bytes());
        self.sets.extend_from_slice(&length.to_be_bytes());
        self.sets.extend_from_slice(body);
        self
    }
}

/// A datagram carrying `template` followed by `records`.
pub fn encode_flows(sequence: u32, template: &Template, records: &[FlowRecord]) -> Vec<u8> {
    DatagramBuilder::new(sequence)
        .template(template)
        .data(template, records)
        .build()
}

fn encode_field(out: &mut Vec<u8>, spec: &FieldSpec, record: &FlowRecord) {
    // Variable-length fields go out empty
    if spec.is_variable() {
        out.push(0);
        return;
    }

    let len = spec.length as usize;
    let bytes = match spec.field_type {
        field::IN_BYTES => uint_bytes(record.byte_count, len),
        field::IN_PKTS => uint_bytes(record.packet_count, len),
        field::PROTOCOL => uint_bytes(u64::from(record.protocol), len),
        field::L4_SRC_PORT => uint_bytes(u64::from(record.source_port), len),
        field::L4_DST_PORT => uint_bytes(u64::from(record.destination_port), len),
        field::IPV4_SRC_ADDR | field::IPV6_SRC_ADDR => address_bytes(record.source_address, len),
        field::IPV4_DST_ADDR | field::IPV6_DST_ADDR => address_bytes(record.destination_address, len),
        _ => vec![0; len],
    };
    out.extend_from_slice(&bytes);
}

/// Low `len` bytes of `value`, big-endian.
fn uint_bytes(value: u64, len: usize) -> Vec<u8> {
    let be = value.to_be_bytes();
    if len >= be.len() {
        let mut out = vec![0; len - be.len()];
        out.extend_from_slice(&be);
        out
    } else {
        be[be.len() - len..].to_vec()
    }
}

fn address_bytes(address: Option<IpAddr>, len: usize) -> Vec<u8> {
    match address {
        Some(IpAddr::V4(v4)) if len == 4 => v4.octets().to_vec(),
        Some(IpAddr::V6(v6)) if len == 16 => v6.octets().to_vec(),
        _ => vec![0; len],
    }
}
