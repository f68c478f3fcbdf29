//! NetFlow v9 and IPFIX datagram decoding.
//!
//! A datagram is a fixed packet header (20 bytes for v9, 16 for IPFIX)
//! followed by flow-sets. Template flow-sets describe record layouts, data
//! flow-sets carry records laid out by a template. Both versions share that
//! scheme and differ only in header layout, template set ids, enterprise
//! field specifiers and variable-length fields, which exist in IPFIX alone.
//!
//! Templates are only honoured within the datagram that carried them: a data
//! flow-set whose template was not sent earlier in the same datagram is
//! rejected with [`ProtocolError::TemplateMissing`].
//!
//! [`decode`] validates the whole datagram up front, so a bad datagram yields
//! an error and no records. Records are then produced lazily by [`FlowRecords`],
//! which borrows the receive buffer.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::trace;

use crate::error::ProtocolError;
use crate::record::FlowRecord;

pub const NETFLOW_V9: u16 = 9;
pub const IPFIX: u16 = 10;
pub const HEADER_LEN: usize = 20;
pub const IPFIX_HEADER_LEN: usize = 16;
pub const FLOWSET_HEADER_LEN: usize = 4;

pub const TEMPLATE_SET_ID: u16 = 0;
pub const OPTIONS_TEMPLATE_SET_ID: u16 = 1;
pub const IPFIX_TEMPLATE_SET_ID: u16 = 2;
pub const IPFIX_OPTIONS_TEMPLATE_SET_ID: u16 = 3;
/// Data flow-sets use the id of the template they are laid out by, which is always >= 256.
pub const MIN_DATA_SET_ID: u16 = 256;

/// IPFIX field length marking a value prefixed by its own length.
pub const VARIABLE_LENGTH: u16 = 0xffff;
const ENTERPRISE_BIT: u16 = 0x8000;

/// Field type ids this decoder maps into a [`FlowRecord`].
///
/// IPFIX information elements 1 through 28 carry the same numbers.
pub mod field {
    pub const IN_BYTES: u16 = 1;
    pub const IN_PKTS: u16 = 2;
    pub const PROTOCOL: u16 = 4;
    pub const L4_SRC_PORT: u16 = 7;
    pub const IPV4_SRC_ADDR: u16 = 8;
    pub const L4_DST_PORT: u16 = 11;
    pub const IPV4_DST_ADDR: u16 = 12;
    pub const IPV6_SRC_ADDR: u16 = 27;
    pub const IPV6_DST_ADDR: u16 = 28;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u16,
    /// Record count announced by a v9 header, zero for IPFIX.
    pub count: u16,
    /// Zero for IPFIX, which carries no uptime.
    pub sys_uptime: u32,
    /// Export time.
    pub unix_secs: u32,
    pub sequence: u32,
    /// v9 source id or IPFIX observation domain id.
    pub source_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field_type: u16,
    pub length: u16,
    /// Private enterprise number of an IPFIX enterprise-specific element.
    pub enterprise: Option<u32>,
}

impl FieldSpec {
    pub const fn new(field_type: u16, length: u16) -> Self {
        Self {
            field_type,
            length,
            enterprise: None,
        }
    }

    pub const fn enterprise(field_type: u16, length: u16, number: u32) -> Self {
        Self {
            field_type,
            length,
            enterprise: Some(number),
        }
    }

    pub fn is_variable(&self) -> bool {
        self.length == VARIABLE_LENGTH
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: u16,
    pub fields: Vec<FieldSpec>,
}

impl Template {
    /// Smallest width of one record laid out by this template. A
    /// variable-length field counts as its one byte length prefix.
    pub fn record_len(&self) -> usize {
        self.fields
            .iter()
            .map(|f| if f.is_variable() { 1 } else { f.length as usize })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    NetflowV9,
    Ipfix,
}

impl Dialect {
    fn template_set_id(self) -> u16 {
        match self {
            Dialect::NetflowV9 => TEMPLATE_SET_ID,
            Dialect::Ipfix => IPFIX_TEMPLATE_SET_ID,
        }
    }

    fn options_template_set_id(self) -> u16 {
        match self {
            Dialect::NetflowV9 => OPTIONS_TEMPLATE_SET_ID,
            Dialect::Ipfix => IPFIX_OPTIONS_TEMPLATE_SET_ID,
        }
    }
}

#[derive(Debug)]
struct DataSet<'a> {
    template: usize,
    body: &'a [u8],
}

/// A validated datagram whose data flow-sets are ready to be read.
#[derive(Debug)]
pub struct DecodedDatagram<'a> {
    header: PacketHeader,
    templates: Vec<Template>,
    data_sets: Vec<DataSet<'a>>,
}

impl<'a> DecodedDatagram<'a> {
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Number of records [`records`](Self::records) will yield.
    pub fn record_count(&self) -> usize {
        self.records().count()
    }

    pub fn records(&self) -> FlowRecords<'_, 'a> {
        FlowRecords {
            datagram: self,
            set: 0,
            offset: 0,
        }
    }
}

/// Lazy iterator over the records of a [`DecodedDatagram`].
///
/// Bytes at the end of a data flow-set too short to hold another record are padding.
pub struct FlowRecords<'d, 'a> {
    datagram: &'d DecodedDatagram<'a>,
    set: usize,
    offset: usize,
}

impl Iterator for FlowRecords<'_, '_> {
    type Item = FlowRecord;

    fn next(&mut self) -> Option<FlowRecord> {
        loop {
            let set = self.datagram.data_sets.get(self.set)?;
            let template = &self.datagram.templates[set.template];

            let mut reader = ByteReader::new(set.body.get(self.offset..).unwrap_or_default());
            if let Ok(record) = read_record(template, &mut reader) {
                self.offset += reader.pos;
                return Some(record);
            }

            self.set += 1;
            self.offset = 0;
        }
    }
}

/// Decode one UDP payload.
pub fn decode(datagram: &[u8]) -> Result<DecodedDatagram<'_>, ProtocolError> {
    let mut reader = ByteReader::new(datagram);

    let version = reader.read_u16()?;
    let (dialect, header) = match version {
        NETFLOW_V9 => {
            let header = PacketHeader {
                version,
                count: reader.read_u16()?,
                sys_uptime: reader.read_u32()?,
                unix_secs: reader.read_u32()?,
                sequence: reader.read_u32()?,
                source_id: reader.read_u32()?,
            };
            (Dialect::NetflowV9, header)
        }
        IPFIX => {
            let length = reader.read_u16()? as usize;
            let header = PacketHeader {
                version,
                count: 0,
                sys_uptime: 0,
                unix_secs: reader.read_u32()?,
                sequence: reader.read_u32()?,
                source_id: reader.read_u32()?,
            };

            // The message length bounds the sets, trailing bytes are ignored
            if length < IPFIX_HEADER_LEN || length > datagram.len() {
                return Err(ProtocolError::Truncated {
                    offset: 0,
                    needed: length.max(IPFIX_HEADER_LEN),
                    available: length.min(datagram.len()),
                });
            }
            reader.limit(length);
            (Dialect::Ipfix, header)
        }
        other => return Err(ProtocolError::UnsupportedVersion(other)),
    };

    let mut templates: Vec<Template> = Vec::new();
    let mut by_id: HashMap<u16, usize> = HashMap::new();
    let mut data_sets = Vec::new();

    while reader.remaining() > 0 {
        let set_offset = reader.position();
        let set_id = reader.read_u16()?;
        let length = reader.read_u16()? as usize;

        if length < FLOWSET_HEADER_LEN {
            return Err(ProtocolError::Truncated {
                offset: set_offset,
                needed: FLOWSET_HEADER_LEN,
                available: length,
            });
        }

        let body = reader.take(length - FLOWSET_HEADER_LEN)?;

        match set_id {
            id if id == dialect.template_set_id() => {
                for template in read_templates(body, set_offset + FLOWSET_HEADER_LEN, dialect)? {
                    if template.fields.is_empty() {
                        trace!(template_id = template.id, "template withdrawn");
                        by_id.remove(&template.id);
                        continue;
                    }
                    trace!(template_id = template.id, fields = template.fields.len(), "template");
                    by_id.insert(template.id, templates.len());
                    templates.push(template);
                }
            }
            id if id == dialect.options_template_set_id() => {
                trace!("skipping options template flow-set");
            }
            id if id < MIN_DATA_SET_ID => {
                trace!(set_id = id, "skipping reserved flow-set");
            }
            template_id => {
                let template = *by_id
                    .get(&template_id)
                    .ok_or(ProtocolError::TemplateMissing { template_id })?;
                data_sets.push(DataSet { template, body });
            }
        }
    }

    Ok(DecodedDatagram {
        header,
        templates,
        data_sets,
    })
}

/// Template records of one template flow-set. An IPFIX record without fields
/// withdraws its template and comes back with an empty field list.
fn read_templates(
    body: &[u8],
    base_offset: usize,
    dialect: Dialect,
) -> Result<Vec<Template>, ProtocolError> {
    let mut reader = ByteReader::with_base(body, base_offset);
    let mut templates = Vec::new();

    // Anything shorter than a template header is padding.
    while reader.remaining() >= FLOWSET_HEADER_LEN {
        let id = reader.read_u16()?;
        let field_count = reader.read_u16()?;

        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let raw_type = reader.read_u16()?;
            let length = reader.read_u16()?;

            let spec = if dialect == Dialect::Ipfix && raw_type & ENTERPRISE_BIT != 0 {
                FieldSpec::enterprise(raw_type & !ENTERPRISE_BIT, length, reader.read_u32()?)
            } else {
                FieldSpec::new(raw_type, length)
            };

            if dialect == Dialect::NetflowV9 && spec.is_variable() {
                return Err(ProtocolError::InvalidTemplate { template_id: id });
            }
            fields.push(spec);
        }

        let template = Template { id, fields };
        let withdrawal = dialect == Dialect::Ipfix && template.fields.is_empty();
        if template.record_len() == 0 && !withdrawal {
            return Err(ProtocolError::InvalidTemplate { template_id: id });
        }
        templates.push(template);
    }

    Ok(templates)
}

fn read_record(template: &Template, reader: &mut ByteReader<'_>) -> Result<FlowRecord, ProtocolError> {
    let mut record = FlowRecord::default();

    for spec in &template.fields {
        let len = if spec.is_variable() {
            match reader.read_u8()? {
                255 => reader.read_u16()? as usize,
                short => short as usize,
            }
        } else {
            spec.length as usize
        };
        let value = reader.take(len)?;

        if spec.enterprise.is_some() {
            continue;
        }

        match (spec.field_type, len) {
            (field::IN_BYTES, 1..=8) => record.byte_count = read_uint(value),
            (field::IN_PKTS, 1..=8) => record.packet_count = read_uint(value),
            (field::PROTOCOL, 1) => record.protocol = value[0],
            (field::L4_SRC_PORT, 2) => record.source_port = read_uint(value) as u16,
            (field::L4_DST_PORT, 2) => record.destination_port = read_uint(value) as u16,
            (field::IPV4_SRC_ADDR, 4) => record.source_address = Some(ipv4(value)),
            (field::IPV4_DST_ADDR, 4) => record.destination_address = Some(ipv4(value)),
            (field::IPV6_SRC_ADDR, 16) => record.source_address = Some(ipv6(value)),
            (field::IPV6_DST_ADDR, 16) => record.destination_address = Some(ipv6(value)),
            _ => {}
        }
    }

    Ok(record)
}

fn read_uint(value: &[u8]) -> u64 {
    value.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn ipv4(value: &[u8]) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
}

fn ipv6(value: &[u8]) -> IpAddr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(value);
    IpAddr::V6(Ipv6Addr::from(octets))
}

// ---------------------------------------------------------------------------
// Bounds-checked big-endian reader
// ---------------------------------------------------------------------------

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self::with_base(buf, 0)
    }

    /// `base` is the offset of `buf` inside the datagram, used in error reports.
    fn with_base(buf: &'a [u8], base: usize) -> Self {
        Self { buf, pos: 0, base }
    }

    fn position(&self) -> usize {
        self.base + self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or(ProtocolError::Truncated {
                offset: self.position(),
                needed: n,
                available: self.remaining(),
            })?;
        self.pos += n;
        Ok(bytes)
    }

    /// Stop reading at `len` bytes into the buffer.
    fn limit(&mut self, len: usize) {
        self.buf = &self.buf[..len.clamp(self.pos, self.buf.len())];
    }

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
