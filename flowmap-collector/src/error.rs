use thiserror::Error;

/// Reasons a datagram is rejected by the NetFlow decoder.
///
/// None of these are fatal to the listener; the datagram is logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("datagram truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("data flow-set references template #{template_id} which was not sent in this datagram")]
    TemplateMissing { template_id: u16 },

    #[error("unsupported NetFlow version {0}")]
    UnsupportedVersion(u16),

    #[error("template #{template_id} describes an empty record")]
    InvalidTemplate { template_id: u16 },
}

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid hex payload on line {line}: {source}")]
    InvalidPayload {
        line: usize,
        #[source]
        source: hex::FromHexError,
    },

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CollectorError>;
