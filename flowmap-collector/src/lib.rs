pub mod error;
pub mod exporter;
pub mod listener;
pub mod netflow;
pub mod record;
pub mod replay;

pub use error::{CollectorError, ProtocolError};
pub use exporter::DatagramBuilder;
pub use listener::{FlowListener, ListenerStats, RecordCallback};
pub use netflow::{decode, DecodedDatagram};
pub use record::FlowRecord;
