use chrono::{DateTime, Utc};
use flowmap::handlers::*;
use flowmap_collector::decode;
use flowmap_core::config::Config;
use flowmap_core::data::{Database, HostRepository};
use std::net::IpAddr;
use std::path::PathBuf;
use tempfile::{NamedTempFile, TempDir};

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

// ============================================================================
// Time Parsing Tests
// ============================================================================

#[test]
fn test_parse_time_now() {
    assert_eq!(parse_time("now", now()).unwrap(), now());
    assert_eq!(parse_time(" NOW ", now()).unwrap(), now());
}

#[test]
fn test_parse_time_rfc3339() {
    let parsed = parse_time("2023-11-14T22:13:20Z", now()).unwrap();
    assert_eq!(parsed, now());

    let offset = parse_time("2023-11-15T00:13:20+02:00", now()).unwrap();
    assert_eq!(offset, now());
}

#[test]
fn test_parse_time_unix_seconds() {
    assert_eq!(parse_time("1700000000", now()).unwrap(), now());
}

#[test]
fn test_parse_time_age() {
    assert_eq!(parse_time("90s", now()).unwrap().timestamp(), 1_700_000_000 - 90);
    assert_eq!(parse_time("30m", now()).unwrap().timestamp(), 1_700_000_000 - 1800);
    assert_eq!(parse_time("2h", now()).unwrap().timestamp(), 1_700_000_000 - 7200);
    assert_eq!(parse_time("1d", now()).unwrap().timestamp(), 1_700_000_000 - 86400);
}

#[test]
fn test_parse_time_invalid() {
    assert!(parse_time("", now()).is_err());
    assert!(parse_time("yesterday", now()).is_err());
    assert!(parse_time("5w", now()).is_err());
    assert!(parse_time("h", now()).is_err());
    assert!(parse_time("3é", now()).is_err());
}

// ============================================================================
// Flow Helper Tests
// ============================================================================

#[test]
fn test_parse_protocol() {
    assert_eq!(parse_protocol("tcp").unwrap(), 6);
    assert_eq!(parse_protocol("UDP").unwrap(), 17);
    assert_eq!(parse_protocol("1").unwrap(), 1);
    assert!(parse_protocol("sctp").is_err());
    assert!(parse_protocol("300").is_err());
}

#[test]
fn test_synthetic_datagram_ipv4() {
    let payload = synthetic_datagram(ip("10.0.0.1"), ip("10.0.0.2"), 1234, 5, 6).unwrap();
    let decoded = decode(&payload).unwrap();
    let records: Vec<_> = decoded.records().collect();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].endpoints(), Some((ip("10.0.0.1"), ip("10.0.0.2"))));
    assert_eq!(records[0].byte_count, 1234);
    assert_eq!(records[0].packet_count, 5);
    assert_eq!(records[0].protocol, 6);
}

#[test]
fn test_synthetic_datagram_ipv6() {
    let payload = synthetic_datagram(ip("fd00::1"), ip("fd00::2"), 1, 1, 17).unwrap();
    let decoded = decode(&payload).unwrap();
    let record = decoded.records().next().unwrap();

    assert_eq!(record.endpoints(), Some((ip("fd00::1"), ip("fd00::2"))));
}

#[test]
fn test_synthetic_datagram_rejects_mixed_families() {
    assert!(synthetic_datagram(ip("10.0.0.1"), ip("fd00::2"), 1, 1, 17).is_err());
}

// ============================================================================
// Config Tests
// ============================================================================

#[test]
fn test_load_config_defaults_without_file() {
    assert_eq!(load_config(None).unwrap(), Config::default());
}

#[test]
fn test_load_config_from_file() -> Result<(), Box<dyn std::error::Error>> {
    let temp_file = NamedTempFile::new()?;
    std::fs::write(temp_file.path(), r#"{ "listen": { "port": 9995 } }"#)?;

    let config = load_config(Some(&PathBuf::from(temp_file.path())))?;
    assert_eq!(config.listen.port, 9995);

    Ok(())
}

#[test]
fn test_load_config_bad_file() {
    let temp_file = NamedTempFile::new().unwrap();
    std::fs::write(temp_file.path(), "not json").unwrap();

    assert!(load_config(Some(&PathBuf::from(temp_file.path()))).is_err());
}

#[test]
fn test_resolve_database_path_prefers_flag() {
    let config = Config {
        database: "/from/config.db".to_string(),
        ..Config::default()
    };

    assert_eq!(
        resolve_database_path(Some("/from/flag.db"), &config),
        PathBuf::from("/from/flag.db")
    );
    assert_eq!(
        resolve_database_path(None, &config),
        PathBuf::from("/from/config.db")
    );
}

#[test]
fn test_expand_path_tilde() {
    let expanded = expand_path("~/flows.db");
    assert!(!expanded.to_string_lossy().starts_with('~'));
    assert!(expanded.ends_with("flows.db"));

    assert_eq!(expand_path("/tmp/flows.db"), PathBuf::from("/tmp/flows.db"));
}

#[test]
fn test_build_listen_options_overrides() {
    let config = Config::default();

    let options = build_listen_options(
        &config,
        PathBuf::from("/tmp/flows.db"),
        Some(9995),
        Some(ip("127.0.0.1")),
        Some(3),
        false,
    );
    assert_eq!(options.bind.to_string(), "127.0.0.1:9995");
    assert_eq!(options.pool.workers, 3);
    assert_eq!(options.pool.queue_capacity, config.import.queue_capacity);
    assert!(options.refresh.is_some());

    let defaults = build_listen_options(&config, PathBuf::from("/tmp/flows.db"), None, None, None, true);
    assert_eq!(defaults.bind.to_string(), "0.0.0.0:2055");
    assert_eq!(defaults.pool.workers, config.import.workers);
    assert!(defaults.refresh.is_none());
}

#[test]
fn test_build_listen_options_refresh_disabled_in_config() {
    let mut config = Config::default();
    config.refresh.enabled = false;

    let options = build_listen_options(&config, PathBuf::from("/tmp/flows.db"), None, None, None, false);
    assert!(options.refresh.is_none());
}

// ============================================================================
// Database Helper Tests
// ============================================================================

#[test]
fn test_open_database_requires_init() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("flowmap.db");

    assert!(open_database(&path).is_err());

    Database::new(&path).unwrap();
    assert!(open_database(&path).is_ok());
}

#[test]
fn test_init_config_dir_writes_default_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = temp_dir.path().join("flowmap");
    let db_path = config_dir.join("flowmap.db");
    let config_path = config_dir.join("flowmap.json");

    assert!(init_config_dir(&config_dir, &db_path, &config_path, false).unwrap());

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.database, db_path.display().to_string());
    assert_eq!(config.listen.port, 2055);

    // An existing config survives without force
    std::fs::write(&config_path, r#"{ "listen": { "port": 1 } }"#).unwrap();
    assert!(!init_config_dir(&config_dir, &db_path, &config_path, false).unwrap());
    assert_eq!(Config::load(&config_path).unwrap().listen.port, 1);

    assert!(init_config_dir(&config_dir, &db_path, &config_path, true).unwrap());
    assert_eq!(Config::load(&config_path).unwrap().listen.port, 2055);
}

#[test]
fn test_format_hosts() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("flowmap.db")).unwrap();
    db.get_or_create_host(ip("10.0.0.1")).unwrap();
    db.get_or_create_host(ip("fd00::1")).unwrap();

    let table = format_hosts(&db.list_hosts().unwrap());
    let lines: Vec<&str> = table.lines().collect();

    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("ID"));
    assert!(lines[1].contains("10.0.0.1"));
    assert!(lines[1].contains("never"));
    assert!(lines[2].contains("fd00::1"));
}
