// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    build_listen_options, expand_path, format_hosts, init_config_dir, load_config, open_database,
    parse_protocol, parse_time, resolve_database_path, synthetic_datagram,
};

// Re-export ingest functionality from flowmap-core
pub use flowmap_core::ingest::{execute_listen, generate_graph, ListenOptions, ListenSummary};
