use std::net::IpAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Another writer inserted the host first. Recovered inside the store by
    /// re-reading the winner; only escapes if that row then cannot be found.
    #[error("host {address} was created concurrently")]
    Conflict { address: IpAddr },

    #[error("store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no reverse record for {0}")]
    NotFound(IpAddr),

    #[error("reverse lookup for {address} failed: {message}")]
    Lookup { address: IpAddr, message: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("address must be 4 or 16 bytes, got {0}")]
pub struct InvalidAddress(pub usize);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid network rule '{input}': {reason}")]
pub struct RuleParseError {
    pub input: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Collector error: {0}")]
    Collector(#[from] flowmap_collector::CollectorError),
}
