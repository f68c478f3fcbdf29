pub mod config;
pub mod data;
pub mod error;
pub mod graph;
pub mod import;
pub mod ingest;
pub mod layer;
pub mod model;
pub mod naming;
pub mod refresh;
pub mod report;

pub use config::Config;
pub use data::{Database, HostRepository};
pub use error::{ConfigError, IngestError, ResolutionError, StoreError};
pub use graph::{TraceEdge, TraceGraph, TraceNode};
pub use import::{ImportPool, TraceImportService};
pub use layer::{Layer, LayerContext, LayerEntry, LayerKind, Pipeline};
pub use naming::{AddressMatcher, NamingLayer, NamingRule};
pub use refresh::{DnsRefresher, ReverseResolver, SystemResolver};
